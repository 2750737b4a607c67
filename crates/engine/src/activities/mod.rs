//! Provider-facing steps of the signing process.
//!
//! Each activity resolves credentials for the acting principal, performs one
//! logical provider operation and returns a JSON-serializable result. Retries,
//! timeouts and journaling belong to the execution host; activities only
//! classify their failures through [`ActivityError::is_retryable`].

mod validation;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use signflow_api::{AccountSession, CustomFields, EnvelopeTemplateDefinition, ProviderClient, ProviderError, TemplateRole};
use signflow_types::{EnvelopeState, EnvelopeStatus, EnvelopeSummary, FormFieldsRequest, Principal, TemplateFieldRequest};
use thiserror::Error;
use tracing::{info, warn};

pub use validation::{ValidationError, validate_required_fields};

use crate::auth::{AuthError, AuthResolver};

pub const CREATE_ENVELOPE: &str = "CreateEnvelope";
pub const FILL_TEMPLATE_FIELDS: &str = "FillTemplateFields";
pub const SEND_DRAFT_ENVELOPE: &str = "SendDraftEnvelope";
pub const GET_ENVELOPE_STATUS: &str = "GetEnvelopeStatus";

/// Envelope custom field carrying the run's request key.
pub const REQUEST_KEY_FIELD: &str = "signflowRequestKey";

/// How far back the create step looks for an envelope it already made.
const REQUEST_KEY_LOOKBACK_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{operation} failed{}: {message}", .status.map(|status| format!(" with HTTP {status}")).unwrap_or_default())]
    Provider {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("envelope {envelope_id} has no document-generation documents")]
    NoDocuments { envelope_id: String },

    #[error("{activity} timed out after {timeout_ms} ms")]
    Timeout { activity: String, timeout_ms: u64 },

    /// The journaled input or output did not match the activity's types.
    #[error("invalid activity payload: {0}")]
    InvalidPayload(String),
}

impl ActivityError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Auth(error) => error.is_retryable(),
            Self::Provider { .. } | Self::NoDocuments { .. } | Self::Timeout { .. } => true,
            Self::Validation(_) | Self::InvalidPayload(_) => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(error) => error.kind(),
            Self::Provider { .. } => "Provider",
            Self::Validation(_) => "ValidationFailed",
            Self::NoDocuments { .. } => "NoDocuments",
            Self::Timeout { .. } => "Timeout",
            Self::InvalidPayload(_) => "InvalidPayload",
        }
    }

    /// HTTP status reported by the provider, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Auth(AuthError::ExchangeFailed { status, .. }) => Some(*status),
            Self::Provider { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<ProviderError> for ActivityError {
    fn from(error: ProviderError) -> Self {
        let operation = match &error {
            ProviderError::Http { operation, .. }
            | ProviderError::Transport { operation, .. }
            | ProviderError::Decode { operation, .. }
            | ProviderError::Schema { operation, .. } => (*operation).to_string(),
            ProviderError::UntrustedBaseUri(_) => "provider request".to_string(),
        };
        let message = match &error {
            ProviderError::Http { body, .. } => body.clone(),
            other => other.to_string(),
        };
        Self::Provider {
            operation,
            status: error.status(),
            message,
        }
    }
}

/// Account-scoped envelope operations the activities depend on.
#[async_trait]
pub trait EnvelopeApi: Send + Sync {
    async fn create_envelope(
        &self,
        session: &AccountSession,
        definition: &EnvelopeTemplateDefinition,
    ) -> Result<EnvelopeSummary, ProviderError>;

    async fn find_envelopes_by_custom_field(
        &self,
        session: &AccountSession,
        name: &str,
        value: &str,
        from_date: chrono::DateTime<Utc>,
    ) -> Result<Vec<EnvelopeSummary>, ProviderError>;

    async fn update_envelope_status(&self, session: &AccountSession, envelope_id: &str, status: &EnvelopeState) -> Result<(), ProviderError>;

    async fn get_envelope_status(&self, session: &AccountSession, envelope_id: &str) -> Result<EnvelopeStatus, ProviderError>;

    async fn get_form_fields(&self, session: &AccountSession, envelope_id: &str) -> Result<FormFieldsRequest, ProviderError>;

    async fn put_form_fields(&self, session: &AccountSession, envelope_id: &str, fields: &FormFieldsRequest) -> Result<(), ProviderError>;
}

#[async_trait]
impl EnvelopeApi for ProviderClient {
    async fn create_envelope(
        &self,
        session: &AccountSession,
        definition: &EnvelopeTemplateDefinition,
    ) -> Result<EnvelopeSummary, ProviderError> {
        ProviderClient::create_envelope(self, session, definition).await
    }

    async fn find_envelopes_by_custom_field(
        &self,
        session: &AccountSession,
        name: &str,
        value: &str,
        from_date: chrono::DateTime<Utc>,
    ) -> Result<Vec<EnvelopeSummary>, ProviderError> {
        ProviderClient::find_envelopes_by_custom_field(self, session, name, value, from_date).await
    }

    async fn update_envelope_status(&self, session: &AccountSession, envelope_id: &str, status: &EnvelopeState) -> Result<(), ProviderError> {
        ProviderClient::update_envelope_status(self, session, envelope_id, status).await
    }

    async fn get_envelope_status(&self, session: &AccountSession, envelope_id: &str) -> Result<EnvelopeStatus, ProviderError> {
        ProviderClient::get_envelope_status(self, session, envelope_id).await
    }

    async fn get_form_fields(&self, session: &AccountSession, envelope_id: &str) -> Result<FormFieldsRequest, ProviderError> {
        ProviderClient::get_form_fields(self, session, envelope_id).await
    }

    async fn put_form_fields(&self, session: &AccountSession, envelope_id: &str, fields: &FormFieldsRequest) -> Result<(), ProviderError> {
        ProviderClient::put_form_fields(self, session, envelope_id, fields).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEnvelopeInput {
    pub principal: Principal,
    pub template_id: String,
    pub signer: TemplateRole,
    /// Stable per run; lets a retried create find the envelope it already made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillTemplateFieldsInput {
    pub envelope: EnvelopeSummary,
    pub fields: TemplateFieldRequest,
    pub principal: Principal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendDraftEnvelopeInput {
    pub envelope: EnvelopeSummary,
    pub principal: Principal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetEnvelopeStatusInput {
    pub envelope_id: String,
    pub principal: Principal,
}

/// The four signing activities over shared provider and auth collaborators.
pub struct Activities {
    api: Arc<dyn EnvelopeApi>,
    auth: Arc<dyn AuthResolver>,
}

impl Activities {
    pub fn new(api: Arc<dyn EnvelopeApi>, auth: Arc<dyn AuthResolver>) -> Self {
        Self { api, auth }
    }

    async fn session(&self, principal: &Principal) -> Result<AccountSession, ActivityError> {
        Ok(self.auth.resolve(principal).await?.session)
    }

    /// Instantiates the template as a draft envelope, or returns the draft a
    /// previous attempt with the same request key already created.
    pub async fn create_envelope(&self, input: CreateEnvelopeInput) -> Result<EnvelopeSummary, ActivityError> {
        let session = self.session(&input.principal).await?;

        if let Some(request_key) = input.request_key.as_deref() {
            let since = Utc::now() - ChronoDuration::days(REQUEST_KEY_LOOKBACK_DAYS);
            match self
                .api
                .find_envelopes_by_custom_field(&session, REQUEST_KEY_FIELD, request_key, since)
                .await
            {
                Ok(existing) => {
                    if let Some(envelope) = existing.into_iter().next() {
                        info!(envelope_id = %envelope.envelope_id, request_key, "reusing envelope from an earlier attempt");
                        return Ok(envelope);
                    }
                }
                Err(error) => warn!(%error, request_key, "envelope lookup failed; creating a new envelope"),
            }
        }

        let definition = EnvelopeTemplateDefinition {
            template_id: input.template_id.clone(),
            status: EnvelopeState::Created.as_str().to_string(),
            template_roles: vec![input.signer.clone()],
            custom_fields: input
                .request_key
                .as_deref()
                .map(|request_key| CustomFields::hidden_text(REQUEST_KEY_FIELD, request_key)),
        };
        let envelope = self.api.create_envelope(&session, &definition).await?;
        info!(envelope_id = %envelope.envelope_id, template_id = %input.template_id, "envelope created");
        Ok(envelope)
    }

    /// Validates and writes the template's document-generation fields.
    ///
    /// Nothing is written unless every required field has a value.
    pub async fn fill_template_fields(&self, input: FillTemplateFieldsInput) -> Result<EnvelopeSummary, ActivityError> {
        let FillTemplateFieldsInput {
            envelope,
            mut fields,
            principal,
        } = input;
        let session = self.session(&principal).await?;

        let current = self.api.get_form_fields(&session, &envelope.envelope_id).await?;
        let Some(document) = current.documents.first() else {
            return Err(ActivityError::NoDocuments {
                envelope_id: envelope.envelope_id,
            });
        };
        if current.documents.len() > 1 {
            warn!(
                envelope_id = %envelope.envelope_id,
                documents = current.documents.len(),
                "envelope has several generated documents; filling the first"
            );
        }

        fields.stamp_document_id(document.document_id.clone());
        let request = fields.form_fields();
        let generated: Vec<_> = request.documents.iter().flat_map(|doc| doc.fields.iter().cloned()).collect();
        validate_required_fields(&document.fields, &generated)?;

        self.api.put_form_fields(&session, &envelope.envelope_id, &request).await?;
        info!(envelope_id = %envelope.envelope_id, document_id = %document.document_id, "template fields filled");
        Ok(envelope)
    }

    pub async fn send_draft_envelope(&self, input: SendDraftEnvelopeInput) -> Result<EnvelopeSummary, ActivityError> {
        let session = self.session(&input.principal).await?;
        self.api
            .update_envelope_status(&session, &input.envelope.envelope_id, &EnvelopeState::Sent)
            .await?;
        info!(envelope_id = %input.envelope.envelope_id, "envelope sent");
        Ok(input.envelope.with_status(EnvelopeState::Sent))
    }

    pub async fn get_envelope_status(&self, input: GetEnvelopeStatusInput) -> Result<EnvelopeStatus, ActivityError> {
        let session = self.session(&input.principal).await?;
        Ok(self.api.get_envelope_status(&session, &input.envelope_id).await?)
    }
}
