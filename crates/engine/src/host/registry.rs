//! Name-keyed activity and workflow tables populated at process start.

use std::{collections::HashMap, fmt, future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use super::{ExecutionHost, RunError};
use crate::activities::ActivityError;

pub type ActivityFuture = Pin<Box<dyn Future<Output = Result<Value, ActivityError>> + Send>>;
pub type ActivityHandler = Arc<dyn Fn(Value) -> ActivityFuture + Send + Sync>;

#[derive(Default, Clone)]
pub struct ActivityRegistry {
    handlers: HashMap<String, ActivityHandler>,
}

impl fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("ActivityRegistry").field("activities", &names).finish()
    }
}

impl ActivityRegistry {
    /// Registers a typed activity. Input and output cross the journal as JSON;
    /// an input that does not decode fails without retry.
    pub fn register<I, O, F, Fut>(&mut self, name: impl Into<String>, activity: F)
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ActivityError>> + Send + 'static,
    {
        let activity = Arc::new(activity);
        let handler: ActivityHandler = Arc::new(move |input: Value| -> ActivityFuture {
            let input = match serde_json::from_value::<I>(input) {
                Ok(input) => input,
                Err(error) => return Box::pin(async move { Err(ActivityError::InvalidPayload(error.to_string())) }),
            };
            let pending = activity(input);
            Box::pin(async move {
                let output = pending.await?;
                serde_json::to_value(output).map_err(|error| ActivityError::InvalidPayload(error.to_string()))
            })
        });
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<ActivityHandler> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

/// A named, deterministic workflow body.
///
/// Implementations must reach every side effect through the host so replay
/// observes the same sequence of steps.
#[async_trait]
pub trait Workflow: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, host: &mut dyn ExecutionHost, input: Value) -> Result<Value, RunError>;
}

#[derive(Default, Clone)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, Arc<dyn Workflow>>,
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.workflows.keys().collect();
        names.sort();
        f.debug_struct("WorkflowRegistry").field("workflows", &names).finish()
    }
}

impl WorkflowRegistry {
    pub fn register(&mut self, workflow: Arc<dyn Workflow>) {
        self.workflows.insert(workflow.name().to_string(), workflow);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Workflow>> {
        self.workflows.get(name).cloned()
    }
}
