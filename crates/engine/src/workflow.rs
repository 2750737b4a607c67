//! The send-for-signature process and its polling sub-process.
//!
//! `Created → FieldsFilled → Sent`, then a nested run polls the envelope until
//! it is completed, voided or declined. There is no failed state: a step that
//! exhausts its retries aborts the run with the step's error.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use signflow_api::TemplateRole;
use signflow_types::{EnvelopeState, EnvelopeStatus, EnvelopeSummary, SigningRequest, SigningState, TemplateKind, WaitForSigningInput};
use tracing::debug;

use crate::{
    activities::{
        Activities, CREATE_ENVELOPE, CreateEnvelopeInput, FILL_TEMPLATE_FIELDS, FillTemplateFieldsInput, GET_ENVELOPE_STATUS,
        GetEnvelopeStatusInput, SEND_DRAFT_ENVELOPE, SendDraftEnvelopeInput,
    },
    host::{ActivityOptions, ActivityRegistry, DEFAULT_TASK_QUEUE, ExecutionHost, RunError, Workflow, WorkflowRegistry, call_activity, call_child},
};

pub const SEND_FOR_SIGNATURE_WORKFLOW: &str = "send_for_signature";
pub const WAIT_FOR_SIGNING_WORKFLOW: &str = "wait_for_signing";

pub const NDA_TEMPLATE_ID: &str = "ad54810f-f5b2-435a-9f9b-3741cbb3a3a3";
pub const DEFAULT_SIGNER_ROLE: &str = "Vendor";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_POLLS_PER_HISTORY: u32 = 100;

/// Provider template backing a [`TemplateKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSettings {
    pub template_id: String,
    /// Role in the template the recipient is assigned to.
    pub signer_role: String,
}

#[derive(Debug, Clone)]
pub struct SigningWorkflowConfig {
    /// Queue identity runs are started on.
    pub task_queue: String,
    pub poll_interval: Duration,
    /// Status reads kept in the polling run's history before it continues
    /// with a fresh one. Zero keeps the whole history.
    pub polls_per_history: u32,
    pub activity_options: ActivityOptions,
    pub templates: HashMap<TemplateKind, TemplateSettings>,
}

impl Default for SigningWorkflowConfig {
    fn default() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            TemplateKind::Nda,
            TemplateSettings {
                template_id: NDA_TEMPLATE_ID.to_string(),
                signer_role: DEFAULT_SIGNER_ROLE.to_string(),
            },
        );
        Self {
            task_queue: DEFAULT_TASK_QUEUE.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            polls_per_history: DEFAULT_POLLS_PER_HISTORY,
            activity_options: ActivityOptions::default(),
            templates,
        }
    }
}

impl SigningWorkflowConfig {
    pub fn template(&self, kind: TemplateKind) -> Result<&TemplateSettings, RunError> {
        self.templates
            .get(&kind)
            .ok_or_else(|| RunError::Configuration(format!("no provider template configured for {kind}")))
    }
}

/// Runs the signing process and returns the envelope's terminal status.
pub async fn send_for_signature(
    host: &mut dyn ExecutionHost,
    config: &SigningWorkflowConfig,
    request: SigningRequest,
) -> Result<EnvelopeState, RunError> {
    let SigningRequest {
        principal,
        template,
        recipient,
    } = request;
    let settings = config.template(template.kind())?;
    let options = &config.activity_options;

    let create = CreateEnvelopeInput {
        principal: principal.clone(),
        template_id: settings.template_id.clone(),
        signer: TemplateRole {
            email: recipient.email,
            name: recipient.name,
            role_name: settings.signer_role.clone(),
        },
        request_key: Some(host.run_id().to_string()),
    };
    let envelope: EnvelopeSummary = call_activity(host, CREATE_ENVELOPE, &create, options).await?;
    host.record_state(SigningState::Created);

    let fill = FillTemplateFieldsInput {
        envelope,
        fields: template,
        principal: principal.clone(),
    };
    let envelope: EnvelopeSummary = call_activity(host, FILL_TEMPLATE_FIELDS, &fill, options).await?;
    host.record_state(SigningState::FieldsFilled);

    let send = SendDraftEnvelopeInput {
        envelope,
        principal: principal.clone(),
    };
    let envelope: EnvelopeSummary = call_activity(host, SEND_DRAFT_ENVELOPE, &send, options).await?;
    host.record_state(SigningState::Sent);

    let wait = WaitForSigningInput {
        envelope_id: envelope.envelope_id,
        principal,
    };
    let status: EnvelopeState = call_child(host, WAIT_FOR_SIGNING_WORKFLOW, &wait).await?;
    if let Some(state) = SigningState::from_terminal(&status) {
        host.record_state(state);
    }
    Ok(status)
}

/// Polls until the envelope reaches a terminal status, sleeping
/// `config.poll_interval` between reads. Every `config.polls_per_history`
/// reads the run continues with a fresh history.
pub async fn wait_for_signing(
    host: &mut dyn ExecutionHost,
    config: &SigningWorkflowConfig,
    input: WaitForSigningInput,
) -> Result<EnvelopeState, RunError> {
    let restart = serde_json::to_value(&input)?;
    let query = GetEnvelopeStatusInput {
        envelope_id: input.envelope_id,
        principal: input.principal,
    };
    let mut polls = 0;
    loop {
        let current: EnvelopeStatus = call_activity(host, GET_ENVELOPE_STATUS, &query, &config.activity_options).await?;
        if current.status.is_terminal() {
            return Ok(current.status);
        }
        debug!(envelope_id = %query.envelope_id, status = %current.status, "envelope not finished; waiting");
        host.sleep(config.poll_interval).await?;

        polls += 1;
        if config.polls_per_history > 0 && polls >= config.polls_per_history {
            host.continue_as_new(restart.clone())?;
            polls = 0;
        }
    }
}

pub struct SendForSignatureWorkflow {
    config: Arc<SigningWorkflowConfig>,
}

impl SendForSignatureWorkflow {
    pub fn new(config: Arc<SigningWorkflowConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Workflow for SendForSignatureWorkflow {
    fn name(&self) -> &str {
        SEND_FOR_SIGNATURE_WORKFLOW
    }

    async fn run(&self, host: &mut dyn ExecutionHost, input: Value) -> Result<Value, RunError> {
        let request: SigningRequest = serde_json::from_value(input)?;
        let status = send_for_signature(host, &self.config, request).await?;
        Ok(Value::String(status.as_str().to_string()))
    }
}

pub struct WaitForSigningWorkflow {
    config: Arc<SigningWorkflowConfig>,
}

impl WaitForSigningWorkflow {
    pub fn new(config: Arc<SigningWorkflowConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Workflow for WaitForSigningWorkflow {
    fn name(&self) -> &str {
        WAIT_FOR_SIGNING_WORKFLOW
    }

    async fn run(&self, host: &mut dyn ExecutionHost, input: Value) -> Result<Value, RunError> {
        let input: WaitForSigningInput = serde_json::from_value(input)?;
        let status = wait_for_signing(host, &self.config, input).await?;
        Ok(serde_json::to_value(status)?)
    }
}

/// Registers the four signing activities under their well-known names.
pub fn register_activities(registry: &mut ActivityRegistry, activities: Arc<Activities>) {
    let create = Arc::clone(&activities);
    registry.register(CREATE_ENVELOPE, move |input: CreateEnvelopeInput| {
        let activities = Arc::clone(&create);
        async move { activities.create_envelope(input).await }
    });

    let fill = Arc::clone(&activities);
    registry.register(FILL_TEMPLATE_FIELDS, move |input: FillTemplateFieldsInput| {
        let activities = Arc::clone(&fill);
        async move { activities.fill_template_fields(input).await }
    });

    let send = Arc::clone(&activities);
    registry.register(SEND_DRAFT_ENVELOPE, move |input: SendDraftEnvelopeInput| {
        let activities = Arc::clone(&send);
        async move { activities.send_draft_envelope(input).await }
    });

    registry.register(GET_ENVELOPE_STATUS, move |input: GetEnvelopeStatusInput| {
        let activities = Arc::clone(&activities);
        async move { activities.get_envelope_status(input).await }
    });
}

pub fn register_workflows(registry: &mut WorkflowRegistry, config: Arc<SigningWorkflowConfig>) {
    registry.register(Arc::new(SendForSignatureWorkflow::new(Arc::clone(&config))));
    registry.register(Arc::new(WaitForSigningWorkflow::new(config)));
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use serde_json::json;
    use signflow_types::{NdaTemplateFields, Principal, Recipient, TemplateFieldRequest};

    use super::*;
    use crate::activities::{ActivityError, ValidationError};

    /// Host double that answers activities from a script and counts sleeps.
    struct ScriptedHost {
        config: SigningWorkflowConfig,
        calls: Vec<String>,
        statuses: VecDeque<&'static str>,
        sleeps: Vec<Duration>,
        states: Vec<SigningState>,
        restarts: Vec<Value>,
        fail_fill: bool,
    }

    impl ScriptedHost {
        fn new(statuses: &[&'static str]) -> Self {
            Self {
                config: SigningWorkflowConfig::default(),
                calls: Vec::new(),
                statuses: statuses.iter().copied().collect(),
                sleeps: Vec::new(),
                states: Vec::new(),
                restarts: Vec::new(),
                fail_fill: false,
            }
        }
    }

    #[async_trait]
    impl ExecutionHost for ScriptedHost {
        fn run_id(&self) -> &str {
            "send_for_signature-test"
        }

        async fn execute_activity(&mut self, name: &str, input: Value, _options: &ActivityOptions) -> Result<Value, RunError> {
            self.calls.push(name.to_string());
            match name {
                CREATE_ENVELOPE => Ok(json!({"envelopeId": "E1", "status": "created"})),
                FILL_TEMPLATE_FIELDS if self.fail_fill => Err(RunError::Activity {
                    activity: name.to_string(),
                    attempts: 1,
                    source: ActivityError::Validation(ValidationError {
                        missing: vec!["vendorTaxId".into()],
                    }),
                }),
                FILL_TEMPLATE_FIELDS => Ok(input["envelope"].clone()),
                SEND_DRAFT_ENVELOPE => Ok(json!({"envelopeId": "E1", "status": "sent"})),
                GET_ENVELOPE_STATUS => {
                    let status = self.statuses.pop_front().unwrap_or("sent");
                    Ok(json!({ "status": status }))
                }
                other => Err(RunError::UnknownActivity(other.to_string())),
            }
        }

        async fn sleep(&mut self, duration: Duration) -> Result<(), RunError> {
            self.sleeps.push(duration);
            Ok(())
        }

        async fn execute_child(&mut self, workflow: &str, input: Value) -> Result<Value, RunError> {
            assert_eq!(workflow, WAIT_FOR_SIGNING_WORKFLOW);
            let input: WaitForSigningInput = serde_json::from_value(input)?;
            let config = self.config.clone();
            let status = wait_for_signing(self, &config, input).await?;
            Ok(serde_json::to_value(status)?)
        }

        fn continue_as_new(&mut self, input: Value) -> Result<(), RunError> {
            self.restarts.push(input);
            Ok(())
        }

        fn record_state(&mut self, state: SigningState) {
            self.states.push(state);
        }
    }

    fn request() -> SigningRequest {
        SigningRequest {
            principal: Principal::new("U1"),
            template: TemplateFieldRequest::Nda(NdaTemplateFields {
                vendor_name: "Acme".into(),
                signer_name: "Jo".into(),
                vendor_tax_id: "123".into(),
                document_id: None,
            }),
            recipient: Recipient {
                name: "Jo".into(),
                email: "jo@example.com".into(),
            },
        }
    }

    #[tokio::test]
    async fn steps_run_in_order_and_end_in_terminal_state() {
        let mut host = ScriptedHost::new(&["completed"]);
        let config = SigningWorkflowConfig::default();

        let status = send_for_signature(&mut host, &config, request()).await.unwrap();

        assert_eq!(status, EnvelopeState::Completed);
        assert_eq!(host.calls, vec![CREATE_ENVELOPE, FILL_TEMPLATE_FIELDS, SEND_DRAFT_ENVELOPE, GET_ENVELOPE_STATUS]);
        assert_eq!(
            host.states,
            vec![SigningState::Created, SigningState::FieldsFilled, SigningState::Sent, SigningState::Completed]
        );
        assert!(host.sleeps.is_empty());
    }

    #[tokio::test]
    async fn polls_with_one_sleep_between_non_terminal_reads() {
        let mut host = ScriptedHost::new(&["sent", "sent", "completed"]);
        let config = SigningWorkflowConfig::default();

        let status = send_for_signature(&mut host, &config, request()).await.unwrap();

        assert_eq!(status, EnvelopeState::Completed);
        assert_eq!(host.sleeps, vec![DEFAULT_POLL_INTERVAL, DEFAULT_POLL_INTERVAL]);
        assert_eq!(host.calls.iter().filter(|call| *call == GET_ENVELOPE_STATUS).count(), 3);
    }

    #[tokio::test]
    async fn long_polls_continue_with_a_fresh_history() {
        let mut host = ScriptedHost::new(&["sent", "sent", "sent", "sent", "sent", "completed"]);
        let config = SigningWorkflowConfig {
            polls_per_history: 2,
            ..SigningWorkflowConfig::default()
        };
        let input = WaitForSigningInput {
            envelope_id: "E1".into(),
            principal: Principal::new("U1"),
        };

        let status = wait_for_signing(&mut host, &config, input.clone()).await.unwrap();

        assert_eq!(status, EnvelopeState::Completed);
        assert_eq!(host.sleeps.len(), 5);
        assert_eq!(host.restarts.len(), 2);
        assert!(host.restarts.iter().all(|restart| *restart == serde_json::to_value(&input).unwrap()));
    }

    #[tokio::test]
    async fn zero_polls_per_history_never_restarts() {
        let mut host = ScriptedHost::new(&["sent", "sent", "sent", "completed"]);
        let config = SigningWorkflowConfig {
            polls_per_history: 0,
            ..SigningWorkflowConfig::default()
        };
        host.config = config.clone();

        send_for_signature(&mut host, &config, request()).await.unwrap();

        assert_eq!(host.sleeps.len(), 3);
        assert!(host.restarts.is_empty());
    }

    #[tokio::test]
    async fn declined_and_voided_are_terminal() {
        for (status, state) in [("declined", SigningState::Declined), ("voided", SigningState::Voided)] {
            let mut host = ScriptedHost::new(&["delivered", status]);
            let outcome = send_for_signature(&mut host, &SigningWorkflowConfig::default(), request()).await.unwrap();
            assert_eq!(outcome.as_str(), status);
            assert_eq!(host.states.last(), Some(&state));
            assert_eq!(host.sleeps.len(), 1);
        }
    }

    #[tokio::test]
    async fn failed_fill_never_sends() {
        let mut host = ScriptedHost::new(&[]);
        host.fail_fill = true;

        let error = send_for_signature(&mut host, &SigningWorkflowConfig::default(), request()).await.unwrap_err();

        assert_eq!(error.kind(), "ValidationFailed");
        assert_eq!(host.calls, vec![CREATE_ENVELOPE, FILL_TEMPLATE_FIELDS]);
        assert_eq!(host.states, vec![SigningState::Created]);
    }

    #[tokio::test]
    async fn create_request_carries_template_role_and_request_key() {
        struct CapturingHost {
            create_input: Option<Value>,
        }

        #[async_trait]
        impl ExecutionHost for CapturingHost {
            fn run_id(&self) -> &str {
                "send_for_signature-abc"
            }
            async fn execute_activity(&mut self, _name: &str, input: Value, _options: &ActivityOptions) -> Result<Value, RunError> {
                self.create_input = Some(input);
                Err(RunError::Cancelled)
            }
            async fn sleep(&mut self, _duration: Duration) -> Result<(), RunError> {
                Ok(())
            }
            async fn execute_child(&mut self, _workflow: &str, _input: Value) -> Result<Value, RunError> {
                Ok(Value::Null)
            }
            fn continue_as_new(&mut self, _input: Value) -> Result<(), RunError> {
                Ok(())
            }
            fn record_state(&mut self, _state: SigningState) {}
        }

        let mut host = CapturingHost { create_input: None };
        let _ = send_for_signature(&mut host, &SigningWorkflowConfig::default(), request()).await;

        let input: CreateEnvelopeInput = serde_json::from_value(host.create_input.unwrap()).unwrap();
        assert_eq!(input.template_id, NDA_TEMPLATE_ID);
        assert_eq!(input.signer.role_name, DEFAULT_SIGNER_ROLE);
        assert_eq!(input.signer.email, "jo@example.com");
        assert_eq!(input.request_key.as_deref(), Some("send_for_signature-abc"));
    }

    #[tokio::test]
    async fn unconfigured_template_is_a_configuration_error() {
        let mut host = ScriptedHost::new(&[]);
        let config = SigningWorkflowConfig {
            templates: HashMap::new(),
            ..SigningWorkflowConfig::default()
        };

        let error = send_for_signature(&mut host, &config, request()).await.unwrap_err();
        assert!(matches!(error, RunError::Configuration(_)));
        assert!(host.calls.is_empty());
    }
}
