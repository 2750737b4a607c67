//! Envelope summaries and status projections returned by the provider.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Provider-side lifecycle status of an envelope.
///
/// Unknown statuses decode into [`EnvelopeState::Other`] so a new provider
/// status never fails a poll.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvelopeState {
    Created,
    Sent,
    Delivered,
    Signed,
    Completed,
    Declined,
    Voided,
    Other(String),
}

impl EnvelopeState {
    /// Returns the provider's wire name for the status.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Signed => "signed",
            Self::Completed => "completed",
            Self::Declined => "declined",
            Self::Voided => "voided",
            Self::Other(other) => other.as_str(),
        }
    }

    /// Completed, voided and declined envelopes expect no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Declined | Self::Voided)
    }
}

impl From<String> for EnvelopeState {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "sent" => Self::Sent,
            "delivered" => Self::Delivered,
            "signed" => Self::Signed,
            "completed" => Self::Completed,
            "declined" => Self::Declined,
            "voided" => Self::Voided,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for EnvelopeState {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<EnvelopeState> for String {
    fn from(value: EnvelopeState) -> Self {
        match value {
            EnvelopeState::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EnvelopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier and latest known status of an envelope.
///
/// `envelope_id` is assigned by the provider when the envelope is created and
/// never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeSummary {
    /// Latest status observed for the envelope.
    pub status: EnvelopeState,
    /// Provider-assigned envelope identifier.
    pub envelope_id: String,
}

impl EnvelopeSummary {
    /// Returns a copy carrying a refreshed status.
    pub fn with_status(&self, status: EnvelopeState) -> Self {
        Self {
            status,
            envelope_id: self.envelope_id.clone(),
        }
    }
}

/// Read-only status projection returned by a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeStatus {
    pub status: EnvelopeState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_exactly_completed_voided_declined() {
        let terminal: Vec<_> = ["created", "sent", "delivered", "signed", "completed", "declined", "voided", "correct"]
            .into_iter()
            .map(EnvelopeState::from)
            .filter(EnvelopeState::is_terminal)
            .collect();

        assert_eq!(terminal, vec![EnvelopeState::Completed, EnvelopeState::Declined, EnvelopeState::Voided]);
    }

    #[test]
    fn unknown_status_survives_decoding() {
        let status: EnvelopeStatus = serde_json::from_str(r#"{"status":"authoritativecopy"}"#).unwrap();
        assert_eq!(status.status, EnvelopeState::Other("authoritativecopy".into()));
        assert!(!status.status.is_terminal());
    }

    #[test]
    fn summary_uses_provider_field_names() {
        let summary: EnvelopeSummary = serde_json::from_str(
            r#"{"envelopeId":"E1","status":"created","statusDateTime":"2024-01-01T00:00:00Z","uri":"/envelopes/E1"}"#,
        )
        .unwrap();
        assert_eq!(summary.envelope_id, "E1");
        assert_eq!(summary.status, EnvelopeState::Created);

        let json = serde_json::to_value(summary.with_status(EnvelopeState::Sent)).unwrap();
        assert_eq!(json, serde_json::json!({"status": "sent", "envelopeId": "E1"}));
    }
}
