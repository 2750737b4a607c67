mod cli;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use signflow_api::{JwtAssertionSigner, ProviderClient, ProviderConfig};
use signflow_engine::{
    AuthResolver, CachedAuthResolver, CredentialCache, EnvelopeApi, FileJournalStore, JournalStore, RunError, RunHandle, RuntimeParts, SigningRuntime,
    SigningWorkflowConfig, TokenExchange,
};
use signflow_types::{Principal, RunEvent, RunStatus};
use signflow_util::status_error_message;
use tracing::{info, warn};

use crate::cli::{Cli, Command, ResumeArgs, RunArgs, StatusArgs};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Resume(args) => resume(args).await,
        Command::Status(args) => status(args).await,
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

struct ProviderStack {
    client: Arc<ProviderClient>,
    signer: Arc<JwtAssertionSigner>,
}

fn provider_stack() -> Result<ProviderStack> {
    let config = ProviderConfig::from_env().context("loading provider configuration")?;
    let signer = JwtAssertionSigner::from_config(&config).context("loading the assertion signing key")?;
    let client = ProviderClient::new(&config).context("building the provider HTTP client")?;
    info!(auth_base = %config.auth_base_url, "provider configuration loaded");
    Ok(ProviderStack {
        client: Arc::new(client),
        signer: Arc::new(signer),
    })
}

fn signing_runtime(journal_dir: std::path::PathBuf, config: SigningWorkflowConfig) -> Result<SigningRuntime> {
    let ProviderStack { client, signer } = provider_stack()?;
    let store = FileJournalStore::new(journal_dir);
    info!(journal_dir = %store.directory().display(), "journaling runs");

    Ok(SigningRuntime::new(
        RuntimeParts {
            api: Arc::clone(&client) as Arc<dyn EnvelopeApi>,
            exchange: client as Arc<dyn TokenExchange>,
            signer,
            store: Arc::new(store),
            cache: Arc::new(CredentialCache::default()),
        },
        config,
    ))
}

async fn run(args: RunArgs) -> Result<()> {
    let runtime = signing_runtime(args.journal.resolve(), args.workflow_config())?;
    let request = args.signing_request();
    let handle = runtime.start(&request).context("starting the signing run")?;
    info!(run_id = handle.run_id(), principal = %request.principal, "signing run started");

    let outcome = follow(handle).await;
    runtime.shutdown().await;
    outcome
}

async fn resume(args: ResumeArgs) -> Result<()> {
    let journal_dir = args.journal.resolve();
    let recorded = FileJournalStore::new(journal_dir.clone())
        .load(&args.run_id)
        .with_context(|| format!("reading the journal of run {}", args.run_id))?
        .ok_or_else(|| anyhow!("no journal for run {} under {}", args.run_id, journal_dir.display()))?;
    let config = SigningWorkflowConfig {
        task_queue: recorded.task_queue,
        poll_interval: Duration::from_secs(args.poll_interval_secs),
        ..SigningWorkflowConfig::default()
    };
    let runtime = signing_runtime(journal_dir, config)?;
    let handle = runtime
        .resume(&args.run_id)
        .with_context(|| format!("resuming run {}", args.run_id))?;

    let outcome = follow(handle).await;
    runtime.shutdown().await;
    outcome
}

/// Streams run events to the log until the run ends; Ctrl-C cancels it.
async fn follow(mut handle: RunHandle) -> Result<()> {
    let run_id = handle.run_id().to_string();
    let cancel = handle.cancellation_token();
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = handle.events().recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                if let Err(error) = signal {
                    warn!(%error, "could not listen for Ctrl-C");
                }
                warn!(%run_id, "interrupt received; cancelling run");
                interrupted = true;
                cancel.cancel();
            }
        }
    }

    match handle.result().await {
        Ok(output) => {
            let status = output.as_str().map(str::to_owned).unwrap_or_else(|| output.to_string());
            println!("{status}");
            Ok(())
        }
        Err(RunError::Cancelled) => Err(anyhow!(
            "run {run_id} was cancelled; continue it with `signflow resume --run-id {run_id}`"
        )),
        Err(error) => Err(anyhow!(failure_message(&run_id, &error))),
    }
}

/// One-line failure summary naming the error kind and HTTP status, followed by
/// a hint for well-known statuses.
fn failure_message(run_id: &str, error: &RunError) -> String {
    let status = error.activity_error().and_then(|source| source.status());
    let http = status.map(|status| format!(", HTTP {status}")).unwrap_or_default();
    let mut message = format!("run {run_id} failed ({}{http}): {error}", error.kind());
    if let Some(hint) = status.and_then(status_error_message) {
        message.push('\n');
        message.push_str(&hint);
    }
    message
}

fn log_event(event: &RunEvent) {
    match event {
        RunEvent::RunStarted { run_id, workflow, .. } => info!(%run_id, %workflow, "run started"),
        RunEvent::ActivityStarted {
            run_id, activity, attempt, ..
        } => info!(%run_id, %activity, attempt, "activity started"),
        RunEvent::ActivityRetrying {
            run_id,
            activity,
            attempt,
            error,
            backoff_ms,
            ..
        } => warn!(%run_id, %activity, attempt, backoff_ms, %error, "activity will be retried"),
        RunEvent::ActivityCompleted {
            run_id,
            activity,
            attempts,
            replayed,
            ..
        } => info!(%run_id, %activity, attempts, replayed, "activity completed"),
        RunEvent::TimerStarted { run_id, wake_at, .. } => info!(%run_id, %wake_at, "waiting"),
        RunEvent::StateChanged { run_id, state } => info!(%run_id, ?state, "state changed"),
        RunEvent::RunCompleted {
            run_id, status, error, ..
        } => match status {
            RunStatus::Succeeded => info!(%run_id, "run finished"),
            _ => warn!(%run_id, ?status, error = error.as_deref().unwrap_or_default(), "run ended"),
        },
    }
}

async fn status(args: StatusArgs) -> Result<()> {
    let ProviderStack { client, signer } = provider_stack()?;
    let resolver = CachedAuthResolver::new(
        Arc::new(CredentialCache::default()),
        signer,
        Arc::clone(&client) as Arc<dyn TokenExchange>,
    );
    let principal = Principal::new(args.principal);
    let context = resolver
        .resolve(&principal)
        .await
        .with_context(|| format!("resolving credentials for {principal}"))?;
    let status = client
        .get_envelope_status(&context.session, &args.envelope_id)
        .await
        .map_err(|error| {
            let hint = error.hint();
            let error = anyhow::Error::new(error).context(format!("reading status of envelope {}", args.envelope_id));
            match hint {
                Some(hint) => error.context(hint),
                None => error,
            }
        })?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
