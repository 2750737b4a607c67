//! Shared type definitions for Signflow.
//!
//! These types cross crate boundaries: the provider client decodes them from
//! REST payloads, the engine passes them between activities as journaled JSON,
//! and the CLI renders them. They carry no behavior beyond small, pure helpers.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod envelope;
pub mod run;
pub mod template;

pub use envelope::{EnvelopeState, EnvelopeStatus, EnvelopeSummary};
pub use run::{Recipient, RunEvent, RunStatus, SigningRequest, SigningState, WaitForSigningInput};
pub use template::{DocumentFields, FormField, FormFieldsRequest, NdaTemplateFields, TemplateFieldRequest, TemplateKind};

/// Identity of the provider user the orchestration acts on behalf of.
///
/// The provider addresses users by an opaque GUID; the value is never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Principal {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_serializes_as_bare_string() {
        let principal = Principal::new("4e3a9121-335b-48dc-a20e-a0f46f4a277c");
        let json = serde_json::to_string(&principal).unwrap();
        assert_eq!(json, "\"4e3a9121-335b-48dc-a20e-a0f46f4a277c\"");

        let decoded: Principal = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, principal);
    }
}
