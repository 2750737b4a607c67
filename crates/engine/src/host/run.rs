//! In-process journaled host: one tokio task per run.
//!
//! [`JournalHost::start_run`] spawns the workflow and hands back a
//! [`RunHandle`] carrying the event receiver, a cancel switch and the final
//! result. Every completed activity, armed timer and finished child run is
//! appended to the run's journal and saved before the workflow continues, so
//! [`JournalHost::resume_run`] can pick the run up after a restart.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use signflow_types::{RunEvent, RunStatus, SigningState};
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::{
    ActivityOptions, ActivityRegistry, ExecutionHost, RunError, WorkflowRegistry,
    journal::{JournalRecord, JournalStore, RunJournal, RunOutcome},
};
use crate::activities::ActivityError;

pub const DEFAULT_TASK_QUEUE: &str = "nda";

struct HostInner {
    activities: ActivityRegistry,
    workflows: WorkflowRegistry,
    store: Arc<dyn JournalStore>,
    task_queue: String,
}

/// Starts and resumes journaled runs.
#[derive(Clone)]
pub struct JournalHost {
    inner: Arc<HostInner>,
}

impl JournalHost {
    pub fn new(activities: ActivityRegistry, workflows: WorkflowRegistry, store: Arc<dyn JournalStore>) -> Self {
        Self::with_task_queue(activities, workflows, store, DEFAULT_TASK_QUEUE)
    }

    pub fn with_task_queue(
        activities: ActivityRegistry,
        workflows: WorkflowRegistry,
        store: Arc<dyn JournalStore>,
        task_queue: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(HostInner {
                activities,
                workflows,
                store,
                task_queue: task_queue.into(),
            }),
        }
    }

    pub fn task_queue(&self) -> &str {
        &self.inner.task_queue
    }

    /// Starts `workflow` under a generated `"{workflow}-{uuid}"` run id.
    pub fn start_run(&self, workflow: &str, input: Value) -> Result<RunHandle, RunError> {
        let run_id = format!("{workflow}-{}", Uuid::new_v4());
        self.start_run_with_id(workflow, run_id, input)
    }

    pub fn start_run_with_id(&self, workflow: &str, run_id: impl Into<String>, input: Value) -> Result<RunHandle, RunError> {
        if self.inner.workflows.get(workflow).is_none() {
            return Err(RunError::UnknownWorkflow(workflow.to_string()));
        }
        let journal = RunJournal::new(run_id, workflow, self.inner.task_queue.clone(), input);
        self.inner.store.save(&journal)?;
        Ok(self.spawn(journal))
    }

    /// Continues a persisted run. Finished steps replay from the journal; a
    /// run that already succeeded reports its recorded output.
    pub fn resume_run(&self, run_id: &str) -> Result<RunHandle, RunError> {
        let journal = self
            .inner
            .store
            .load(run_id)?
            .ok_or_else(|| RunError::UnknownRun(run_id.to_string()))?;
        if self.inner.workflows.get(&journal.workflow).is_none() {
            return Err(RunError::UnknownWorkflow(journal.workflow));
        }
        Ok(self.spawn(journal))
    }

    fn spawn(&self, journal: RunJournal) -> RunHandle {
        let (event_tx, event_rx) = unbounded_channel();
        let cancel = CancellationToken::new();
        let run_id = journal.run_id.clone();
        let span = info_span!("run", run_id = %run_id, workflow = %journal.workflow);
        let task = tokio::spawn(drive_run(Arc::clone(&self.inner), journal, cancel.clone(), event_tx).instrument(span));

        RunHandle {
            run_id,
            cancel,
            events: event_rx,
            task,
        }
    }
}

/// Caller's side of a running workflow.
pub struct RunHandle {
    run_id: String,
    cancel: CancellationToken,
    events: UnboundedReceiver<RunEvent>,
    task: JoinHandle<Result<Value, RunError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Requests cancellation; pending sleeps and retry backoffs end at once.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn events(&mut self) -> &mut UnboundedReceiver<RunEvent> {
        &mut self.events
    }

    /// Waits for the run to finish. Events not yet received are dropped.
    pub async fn result(self) -> Result<Value, RunError> {
        let Self { events, task, .. } = self;
        drop(events);
        match task.await {
            Ok(result) => result,
            Err(error) => Err(RunError::Aborted(error.to_string())),
        }
    }
}

async fn drive_run(
    inner: Arc<HostInner>,
    journal: RunJournal,
    cancel: CancellationToken,
    event_tx: UnboundedSender<RunEvent>,
) -> Result<Value, RunError> {
    let run_id = journal.run_id.clone();
    let _ = event_tx.send(RunEvent::RunStarted {
        run_id: run_id.clone(),
        workflow: journal.workflow.clone(),
        at: Utc::now(),
    });

    if let Some(RunOutcome::Succeeded { output }) = &journal.outcome {
        info!("run already succeeded; reporting recorded output");
        emit_completed(&event_tx, &run_id, &Ok(output.clone()));
        return Ok(output.clone());
    }

    let mut context = WorkflowContext::new(inner, journal, cancel, event_tx.clone());
    let result = context.run_to_completion().await;
    emit_completed(&event_tx, &run_id, &result);
    result
}

fn emit_completed(event_tx: &UnboundedSender<RunEvent>, run_id: &str, result: &Result<Value, RunError>) {
    let (status, output, error) = match result {
        Ok(output) => (RunStatus::Succeeded, Some(render_output(output)), None),
        Err(RunError::Cancelled) => (RunStatus::Canceled, None, Some(RunError::Cancelled.to_string())),
        Err(error) => (RunStatus::Failed, None, Some(error.to_string())),
    };
    let _ = event_tx.send(RunEvent::RunCompleted {
        run_id: run_id.to_string(),
        status,
        result: output,
        error,
        finished_at: Utc::now(),
    });
}

fn render_output(output: &Value) -> String {
    match output {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Per-run implementation of [`ExecutionHost`].
///
/// Steps are numbered in the order the workflow requests them. A step whose
/// number already has a record is answered from the journal.
pub struct WorkflowContext {
    inner: Arc<HostInner>,
    journal: RunJournal,
    next_seq: u32,
    cancel: CancellationToken,
    events: UnboundedSender<RunEvent>,
}

impl WorkflowContext {
    fn new(inner: Arc<HostInner>, journal: RunJournal, cancel: CancellationToken, events: UnboundedSender<RunEvent>) -> Self {
        Self {
            inner,
            journal,
            next_seq: 0,
            cancel,
            events,
        }
    }

    pub fn journal(&self) -> &RunJournal {
        &self.journal
    }

    async fn run_to_completion(&mut self) -> Result<Value, RunError> {
        let workflow = self
            .inner
            .workflows
            .get(&self.journal.workflow)
            .ok_or_else(|| RunError::UnknownWorkflow(self.journal.workflow.clone()))?;
        let input = self.journal.input.clone();

        let result = workflow.run(self, input).await;
        self.journal.outcome = Some(match &result {
            Ok(output) => RunOutcome::Succeeded { output: output.clone() },
            Err(RunError::Cancelled) => RunOutcome::Canceled,
            Err(error) => RunOutcome::Failed {
                kind: error.kind().to_string(),
                error: error.to_string(),
            },
        });
        if let Err(error) = self.persist() {
            warn!(%error, "could not record run outcome");
        }

        match &result {
            Ok(_) => info!("run succeeded"),
            Err(RunError::Cancelled) => info!("run cancelled"),
            Err(error) => warn!(kind = error.kind(), %error, "run failed"),
        }
        result
    }

    fn allocate_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn persist(&self) -> Result<(), RunError> {
        self.inner.store.save(&self.journal)?;
        Ok(())
    }

    fn append(&mut self, record: JournalRecord) -> Result<(), RunError> {
        self.journal.push(record);
        self.persist()
    }

    fn emit(&self, event: RunEvent) {
        let _ = self.events.send(event);
    }

    fn mismatch(&self, seq: u32, requested: String) -> RunError {
        let recorded = self
            .journal
            .latest(seq)
            .map(JournalRecord::describe)
            .unwrap_or_else(|| "nothing".to_string());
        RunError::NonDeterministic { seq, requested, recorded }
    }

    /// Waits for `duration` unless the run is cancelled first.
    async fn cancellable_wait(&self, duration: Duration) -> Result<(), RunError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RunError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[async_trait]
impl ExecutionHost for WorkflowContext {
    fn run_id(&self) -> &str {
        &self.journal.run_id
    }

    async fn execute_activity(&mut self, name: &str, input: Value, options: &ActivityOptions) -> Result<Value, RunError> {
        let seq = self.allocate_seq();
        match self.journal.latest(seq) {
            Some(JournalRecord::ActivityCompleted {
                name: recorded,
                output,
                attempts,
                ..
            }) if recorded == name => {
                debug!(seq, activity = name, "replaying completed activity");
                let (output, attempts) = (output.clone(), *attempts);
                self.emit(RunEvent::ActivityCompleted {
                    run_id: self.journal.run_id.clone(),
                    seq,
                    activity: name.to_string(),
                    attempts,
                    replayed: true,
                });
                return Ok(output);
            }
            Some(_) => return Err(self.mismatch(seq, format!("activity {name}"))),
            None => {}
        }

        let handler = self
            .inner
            .activities
            .get(name)
            .ok_or_else(|| RunError::UnknownActivity(name.to_string()))?;
        let timeout = options.start_to_close_timeout;
        let mut attempt = 0;

        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            self.emit(RunEvent::ActivityStarted {
                run_id: self.journal.run_id.clone(),
                seq,
                activity: name.to_string(),
                attempt,
            });

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(RunError::Cancelled),
                outcome = tokio::time::timeout(timeout, handler(input.clone())) => outcome,
            };
            let error = match outcome {
                Ok(Ok(output)) => {
                    self.append(JournalRecord::ActivityCompleted {
                        seq,
                        name: name.to_string(),
                        output: output.clone(),
                        attempts: attempt,
                    })?;
                    info!(seq, activity = name, attempt, "activity completed");
                    self.emit(RunEvent::ActivityCompleted {
                        run_id: self.journal.run_id.clone(),
                        seq,
                        activity: name.to_string(),
                        attempts: attempt,
                        replayed: false,
                    });
                    return Ok(output);
                }
                Ok(Err(error)) => error,
                Err(_) => ActivityError::Timeout {
                    activity: name.to_string(),
                    timeout_ms: timeout.as_millis().try_into().unwrap_or(u64::MAX),
                },
            };

            if !error.is_retryable() || !options.retry_policy.allows_attempt(attempt + 1) {
                warn!(seq, activity = name, attempt, kind = error.kind(), %error, "activity failed");
                return Err(RunError::Activity {
                    activity: name.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            let backoff = options.retry_policy.backoff_for(attempt);
            warn!(seq, activity = name, attempt, backoff_ms = backoff.as_millis() as u64, %error, "activity attempt failed; retrying");
            self.emit(RunEvent::ActivityRetrying {
                run_id: self.journal.run_id.clone(),
                seq,
                activity: name.to_string(),
                attempt,
                error: error.to_string(),
                backoff_ms: backoff.as_millis().try_into().unwrap_or(u64::MAX),
            });
            self.cancellable_wait(backoff).await?;
        }
    }

    async fn sleep(&mut self, duration: Duration) -> Result<(), RunError> {
        let seq = self.allocate_seq();
        let wake_at = match self.journal.latest(seq) {
            Some(JournalRecord::TimerFired { .. }) => return Ok(()),
            Some(JournalRecord::TimerStarted { wake_at, .. }) => *wake_at,
            Some(_) => return Err(self.mismatch(seq, "timer".to_string())),
            None => {
                let span = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
                let wake_at = Utc::now().checked_add_signed(span).unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);
                self.append(JournalRecord::TimerStarted { seq, wake_at })?;
                wake_at
            }
        };

        self.emit(RunEvent::TimerStarted {
            run_id: self.journal.run_id.clone(),
            seq,
            wake_at,
        });
        let remaining = (wake_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(seq, remaining_ms = remaining.as_millis() as u64, "sleeping");
        self.cancellable_wait(remaining).await?;
        self.append(JournalRecord::TimerFired { seq })
    }

    async fn execute_child(&mut self, workflow: &str, input: Value) -> Result<Value, RunError> {
        let seq = self.allocate_seq();
        let child_run_id = format!("{}.{seq}", self.journal.run_id);
        match self.journal.latest(seq) {
            Some(JournalRecord::ChildCompleted { name, output, .. }) if name == workflow => return Ok(output.clone()),
            Some(JournalRecord::ChildStarted { name, .. }) if name == workflow => {}
            Some(_) => return Err(self.mismatch(seq, format!("child workflow {workflow}"))),
            None => self.append(JournalRecord::ChildStarted {
                seq,
                name: workflow.to_string(),
                child_run_id: child_run_id.clone(),
            })?,
        }

        let child_journal = match self.inner.store.load(&child_run_id)? {
            Some(journal) => journal,
            None => {
                let journal = RunJournal::new(child_run_id.clone(), workflow, self.journal.task_queue.clone(), input);
                self.inner.store.save(&journal)?;
                journal
            }
        };
        info!(child_run_id = %child_run_id, workflow, "running child workflow");
        self.emit(RunEvent::RunStarted {
            run_id: child_run_id.clone(),
            workflow: workflow.to_string(),
            at: Utc::now(),
        });

        let mut child = WorkflowContext::new(
            Arc::clone(&self.inner),
            child_journal,
            self.cancel.child_token(),
            self.events.clone(),
        );
        let result = child.run_to_completion().await;
        emit_completed(&self.events, &child_run_id, &result);
        let output = result?;

        self.append(JournalRecord::ChildCompleted {
            seq,
            name: workflow.to_string(),
            output: output.clone(),
        })?;
        Ok(output)
    }

    fn continue_as_new(&mut self, input: Value) -> Result<(), RunError> {
        let discarded = self.journal.records.len();
        self.journal.continue_as_new(input);
        self.next_seq = 0;
        info!(discarded, continued = self.journal.continued, "continuing run with a fresh history");
        self.persist()
    }

    fn record_state(&mut self, state: SigningState) {
        info!(?state, "signing state changed");
        self.emit(RunEvent::StateChanged {
            run_id: self.journal.run_id.clone(),
            state,
        });
    }
}
