//! Command-line surface.

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};
use signflow_engine::{SigningWorkflowConfig, host::DEFAULT_TASK_QUEUE};
use signflow_types::{NdaTemplateFields, Principal, Recipient, SigningRequest, TemplateFieldRequest, TemplateKind};

#[derive(Debug, Parser)]
#[command(name = "signflow", version, about = "Send provider templates for signature and follow them to completion")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a signing run and wait for the envelope to finish.
    Run(RunArgs),
    /// Continue a run from its journal.
    Resume(ResumeArgs),
    /// Print the provider's current status for an envelope.
    Status(StatusArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TemplateArg {
    Nda,
}

impl From<TemplateArg> for TemplateKind {
    fn from(value: TemplateArg) -> Self {
        match value {
            TemplateArg::Nda => TemplateKind::Nda,
        }
    }
}

#[derive(Debug, Args)]
pub struct JournalArgs {
    /// Directory holding run journals; defaults to the platform data directory.
    #[arg(long, env = "SIGNFLOW_JOURNAL_DIR")]
    pub journal_dir: Option<PathBuf>,
}

impl JournalArgs {
    pub fn resolve(&self) -> PathBuf {
        self.journal_dir.clone().unwrap_or_else(signflow_util::default_journal_dir)
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Provider user the envelope is sent on behalf of.
    #[arg(long, env = "SIGNFLOW_PRINCIPAL")]
    pub principal: String,

    #[arg(long, value_enum, default_value_t = TemplateArg::Nda)]
    pub template: TemplateArg,

    #[arg(long)]
    pub vendor_name: String,

    #[arg(long)]
    pub signer_name: String,

    #[arg(long)]
    pub signer_email: String,

    #[arg(long, default_value = "")]
    pub vendor_tax_id: String,

    #[command(flatten)]
    pub journal: JournalArgs,

    /// Seconds between envelope status checks.
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_secs: u64,

    #[arg(long, default_value = DEFAULT_TASK_QUEUE)]
    pub task_queue: String,
}

impl RunArgs {
    pub fn signing_request(&self) -> SigningRequest {
        let template = match TemplateKind::from(self.template) {
            TemplateKind::Nda => TemplateFieldRequest::Nda(NdaTemplateFields {
                vendor_name: self.vendor_name.clone(),
                signer_name: self.signer_name.clone(),
                vendor_tax_id: self.vendor_tax_id.clone(),
                document_id: None,
            }),
        };
        SigningRequest {
            principal: Principal::new(self.principal.clone()),
            template,
            recipient: Recipient {
                name: self.signer_name.clone(),
                email: self.signer_email.clone(),
            },
        }
    }

    pub fn workflow_config(&self) -> SigningWorkflowConfig {
        SigningWorkflowConfig {
            task_queue: self.task_queue.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            ..SigningWorkflowConfig::default()
        }
    }
}

#[derive(Debug, Args)]
pub struct ResumeArgs {
    #[arg(long)]
    pub run_id: String,

    #[command(flatten)]
    pub journal: JournalArgs,

    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[arg(long, env = "SIGNFLOW_PRINCIPAL")]
    pub principal: String,

    #[arg(long)]
    pub envelope_id: String,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        temp_env::with_vars_unset(["SIGNFLOW_PRINCIPAL", "SIGNFLOW_JOURNAL_DIR"], || Cli::try_parse_from(args).unwrap())
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_arguments_build_an_nda_request() {
        let cli = parse(&[
            "signflow",
            "run",
            "--principal",
            "4e3a9121-335b-48dc-a20e-a0f46f4a277c",
            "--vendor-name",
            "Acme",
            "--signer-name",
            "Jo",
            "--signer-email",
            "jo@example.com",
            "--vendor-tax-id",
            "12-345",
            "--poll-interval-secs",
            "5",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };

        let request = args.signing_request();
        assert_eq!(request.principal.as_str(), "4e3a9121-335b-48dc-a20e-a0f46f4a277c");
        assert_eq!(request.template.kind(), TemplateKind::Nda);
        assert_eq!(request.recipient.email, "jo@example.com");

        let config = args.workflow_config();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.task_queue, "nda");
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let result = temp_env::with_vars_unset(["SIGNFLOW_PRINCIPAL"], || {
            Cli::try_parse_from([
                "signflow",
                "run",
                "--principal",
                "U1",
                "--vendor-name",
                "Acme",
                "--signer-name",
                "Jo",
                "--signer-email",
                "jo@example.com",
                "--poll-interval-secs",
                "0",
            ])
        });
        assert!(result.is_err());
    }

    #[test]
    fn principal_can_come_from_the_environment() {
        let cli = temp_env::with_var("SIGNFLOW_PRINCIPAL", Some("U1"), || {
            Cli::try_parse_from(["signflow", "status", "--envelope-id", "E1"]).unwrap()
        });
        let Command::Status(args) = cli.command else {
            panic!("expected status");
        };
        assert_eq!(args.principal, "U1");
        assert_eq!(args.envelope_id, "E1");
    }
}
