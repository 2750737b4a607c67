//! # Signflow Engine
//!
//! Durable orchestration of the send-for-signature process against the
//! signing provider.
//!
//! ## Architecture
//!
//! - **`cache`**: principal-keyed credential cache with a background sweep
//! - **`auth`**: cache-first credential resolution via the impersonation grant
//! - **`activities`**: the provider-facing steps (create, fill, send, poll)
//! - **`host`**: journaled execution host with retries, timeouts, durable
//!   sleeps and nested runs
//! - **`workflow`**: the signing state machine and its polling sub-process
//! - **`runtime`**: wiring of the above into a ready-to-use host
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use signflow_engine::{CredentialCache, MemoryJournalStore, RuntimeParts, SigningRuntime, SigningWorkflowConfig};
//!
//! let runtime = SigningRuntime::new(
//!     RuntimeParts {
//!         api: client.clone(),
//!         exchange: client,
//!         signer,
//!         store: Arc::new(MemoryJournalStore::new()),
//!         cache: Arc::new(CredentialCache::default()),
//!     },
//!     SigningWorkflowConfig::default(),
//! );
//! let handle = runtime.start(&request)?;
//! let status = handle.result().await?;
//! ```

pub mod activities;
pub mod auth;
pub mod cache;
pub mod host;
pub mod runtime;
pub mod workflow;

pub use activities::{Activities, ActivityError, EnvelopeApi, ValidationError, validate_required_fields};
pub use auth::{AssertionSigner, AuthError, AuthResolver, CachedAuthResolver, TokenExchange};
pub use cache::{AuthContext, CredentialCache, TOKEN_EXPIRY_BUFFER};
pub use host::{
    ActivityOptions, ActivityRegistry, ExecutionHost, FileJournalStore, JournalHost, JournalStore, MemoryJournalStore, RetryPolicy,
    RunError, RunHandle, Workflow, WorkflowRegistry,
};
pub use runtime::{RuntimeParts, SigningRuntime};
pub use workflow::{SEND_FOR_SIGNATURE_WORKFLOW, SigningWorkflowConfig, TemplateSettings, WAIT_FOR_SIGNING_WORKFLOW};
