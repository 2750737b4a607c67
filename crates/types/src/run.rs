//! Run-level types shared by the engine and the CLI.
//!
//! A run is one signing request carried through the orchestrator. The engine
//! reports progress as [`RunEvent`]s over a channel owned by the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EnvelopeState, Principal, TemplateFieldRequest};

/// Input of the send-for-signature workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    /// Identity the provider calls are made on behalf of.
    pub principal: Principal,
    /// Field values for the template being instantiated.
    pub template: TemplateFieldRequest,
    /// Person the envelope is routed to for signature.
    pub recipient: Recipient,
}

/// Signer the template's signing role is assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub email: String,
}

/// Input of the nested polling workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitForSigningInput {
    pub envelope_id: String,
    pub principal: Principal,
}

/// Position of a signing run in the orchestrator's state machine.
///
/// There is no failed state: a step that exhausts its retries aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningState {
    Created,
    FieldsFilled,
    Sent,
    Completed,
    Voided,
    Declined,
}

impl SigningState {
    /// Maps a terminal provider status onto the matching final state.
    pub fn from_terminal(status: &EnvelopeState) -> Option<Self> {
        match status {
            EnvelopeState::Completed => Some(Self::Completed),
            EnvelopeState::Voided => Some(Self::Voided),
            EnvelopeState::Declined => Some(Self::Declined),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Voided | Self::Declined)
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Canceled,
}

/// Lifecycle events emitted while a run executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        workflow: String,
        at: DateTime<Utc>,
    },
    ActivityStarted {
        run_id: String,
        seq: u32,
        activity: String,
        attempt: u32,
    },
    ActivityRetrying {
        run_id: String,
        seq: u32,
        activity: String,
        attempt: u32,
        error: String,
        backoff_ms: u64,
    },
    ActivityCompleted {
        run_id: String,
        seq: u32,
        activity: String,
        attempts: u32,
        replayed: bool,
    },
    TimerStarted {
        run_id: String,
        seq: u32,
        wake_at: DateTime<Utc>,
    },
    StateChanged {
        run_id: String,
        state: SigningState,
    },
    RunCompleted {
        run_id: String,
        status: RunStatus,
        result: Option<String>,
        error: Option<String>,
        finished_at: DateTime<Utc>,
    },
}
