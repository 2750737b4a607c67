//! Wiring of cache, resolver, activities and workflows into a host.

use std::sync::Arc;

use serde_json::Value;
use signflow_types::SigningRequest;

use crate::{
    activities::{Activities, EnvelopeApi},
    auth::{AssertionSigner, AuthResolver, CachedAuthResolver, TokenExchange},
    cache::CredentialCache,
    host::{ActivityRegistry, JournalHost, JournalStore, RunError, RunHandle, WorkflowRegistry},
    workflow::{SEND_FOR_SIGNATURE_WORKFLOW, SigningWorkflowConfig, register_activities, register_workflows},
};

/// Collaborators a [`SigningRuntime`] is built from.
pub struct RuntimeParts {
    pub api: Arc<dyn EnvelopeApi>,
    pub exchange: Arc<dyn TokenExchange>,
    pub signer: Arc<dyn AssertionSigner>,
    pub store: Arc<dyn JournalStore>,
    pub cache: Arc<CredentialCache>,
}

/// A process-wide signing runtime: one credential cache shared by every run.
pub struct SigningRuntime {
    host: JournalHost,
    cache: Arc<CredentialCache>,
    resolver: Arc<CachedAuthResolver>,
    config: Arc<SigningWorkflowConfig>,
}

impl SigningRuntime {
    /// Registers the signing activities and workflows and starts the cache
    /// sweep. Must be called inside a tokio runtime.
    pub fn new(parts: RuntimeParts, config: SigningWorkflowConfig) -> Self {
        let RuntimeParts {
            api,
            exchange,
            signer,
            store,
            cache,
        } = parts;
        let config = Arc::new(config);
        let resolver = Arc::new(CachedAuthResolver::new(Arc::clone(&cache), signer, exchange));

        let mut activities = ActivityRegistry::default();
        register_activities(
            &mut activities,
            Arc::new(Activities::new(api, Arc::clone(&resolver) as Arc<dyn AuthResolver>)),
        );
        let mut workflows = WorkflowRegistry::default();
        register_workflows(&mut workflows, Arc::clone(&config));

        cache.start();
        Self {
            host: JournalHost::with_task_queue(activities, workflows, store, config.task_queue.clone()),
            cache,
            resolver,
            config,
        }
    }

    pub fn host(&self) -> &JournalHost {
        &self.host
    }

    pub fn config(&self) -> &SigningWorkflowConfig {
        &self.config
    }

    pub fn resolver(&self) -> Arc<dyn AuthResolver> {
        Arc::clone(&self.resolver) as Arc<dyn AuthResolver>
    }

    /// Starts a send-for-signature run for `request`.
    pub fn start(&self, request: &SigningRequest) -> Result<RunHandle, RunError> {
        let input: Value = serde_json::to_value(request)?;
        self.host.start_run(SEND_FOR_SIGNATURE_WORKFLOW, input)
    }

    pub fn resume(&self, run_id: &str) -> Result<RunHandle, RunError> {
        self.host.resume_run(run_id)
    }

    /// Stops the cache sweep. Runs already started keep going.
    pub async fn shutdown(&self) {
        self.cache.stop().await;
    }
}
