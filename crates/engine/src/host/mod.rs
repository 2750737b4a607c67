//! Durable execution substrate for signing runs.
//!
//! Workflows are written against [`ExecutionHost`]: run an activity under a
//! retry policy and timeout, sleep durably, run a nested workflow. The
//! [`JournalHost`] implementation records every completed step so a resumed run
//! replays finished work instead of repeating it.

mod journal;
mod registry;
mod run;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use signflow_types::SigningState;
use thiserror::Error;

pub use journal::{FileJournalStore, JournalError, JournalRecord, JournalStore, MemoryJournalStore, RunJournal, RunOutcome};
pub use registry::{ActivityFuture, ActivityHandler, ActivityRegistry, Workflow, WorkflowRegistry};
pub use run::{DEFAULT_TASK_QUEUE, JournalHost, RunHandle, WorkflowContext};

use crate::activities::ActivityError;

/// Exponential backoff between activity attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
    /// Total attempts including the first; zero means unlimited.
    pub maximum_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(100),
            maximum_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt numbered `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let scaled = self.initial_interval.as_secs_f64() * self.backoff_coefficient.max(1.0).powi(exponent);
        let capped = scaled.min(self.maximum_interval.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.maximum_interval)
    }

    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.maximum_attempts == 0 || attempt <= self.maximum_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityOptions {
    /// Upper bound on a single attempt.
    pub start_to_close_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close_timeout: Duration::from_secs(60),
            retry_policy: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("activity {activity} failed after {attempts} attempt(s): {source}")]
    Activity {
        activity: String,
        attempts: u32,
        #[source]
        source: ActivityError,
    },

    #[error("run was cancelled")]
    Cancelled,

    #[error("no activity registered as {0}")]
    UnknownActivity(String),

    #[error("no workflow registered as {0}")]
    UnknownWorkflow(String),

    #[error("no journal found for run {0}")]
    UnknownRun(String),

    /// The workflow asked for a different step than the journal recorded.
    #[error("journal mismatch at step {seq}: workflow requested {requested}, journal holds {recorded}")]
    NonDeterministic { seq: u32, requested: String, recorded: String },

    #[error("workflow configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("workflow payload could not be converted: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("run task ended abnormally: {0}")]
    Aborted(String),
}

impl RunError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Activity { source, .. } => source.kind(),
            Self::Cancelled => "Cancelled",
            Self::UnknownActivity(_) => "UnknownActivity",
            Self::UnknownWorkflow(_) => "UnknownWorkflow",
            Self::UnknownRun(_) => "UnknownRun",
            Self::NonDeterministic { .. } => "NonDeterministic",
            Self::Configuration(_) => "Configuration",
            Self::Journal(_) => "Journal",
            Self::Payload(_) => "Payload",
            Self::Aborted(_) => "Aborted",
        }
    }

    pub fn activity_error(&self) -> Option<&ActivityError> {
        match self {
            Self::Activity { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Operations a workflow may perform. All progress goes through the host.
#[async_trait]
pub trait ExecutionHost: Send {
    fn run_id(&self) -> &str;

    async fn execute_activity(&mut self, name: &str, input: Value, options: &ActivityOptions) -> Result<Value, RunError>;

    /// Suspends the workflow for `duration`; cancellation ends the wait early
    /// with [`RunError::Cancelled`].
    async fn sleep(&mut self, duration: Duration) -> Result<(), RunError>;

    async fn execute_child(&mut self, workflow: &str, input: Value) -> Result<Value, RunError>;

    /// Discards the run's step history and numbers the following steps from
    /// zero, as if the workflow had just started with `input`. Long-lived
    /// loops call this periodically to keep their journal bounded; the caller
    /// must be at a point equivalent to the top of the workflow.
    fn continue_as_new(&mut self, input: Value) -> Result<(), RunError>;

    /// Reports a business-level state transition to observers.
    fn record_state(&mut self, state: SigningState);
}

/// Typed wrapper over [`ExecutionHost::execute_activity`].
pub async fn call_activity<I, O>(host: &mut dyn ExecutionHost, name: &str, input: &I, options: &ActivityOptions) -> Result<O, RunError>
where
    I: Serialize + Sync + ?Sized,
    O: DeserializeOwned,
{
    let input = serde_json::to_value(input)?;
    let output = host.execute_activity(name, input, options).await?;
    Ok(serde_json::from_value(output)?)
}

/// Typed wrapper over [`ExecutionHost::execute_child`].
pub async fn call_child<I, O>(host: &mut dyn ExecutionHost, workflow: &str, input: &I) -> Result<O, RunError>
where
    I: Serialize + Sync + ?Sized,
    O: DeserializeOwned,
{
    let input = serde_json::to_value(input)?;
    let output = host.execute_child(workflow, input).await?;
    Ok(serde_json::from_value(output)?)
}
