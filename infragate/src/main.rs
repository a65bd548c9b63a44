//! Infragate CLI
//!
//! Runs one pipeline against a Terraform working directory and prints the
//! flattened outputs as JSON on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use infragate::approval::{ApprovalBroker, ApprovalEvent, StaticApprovalPolicy};
use infragate::config::PipelineInvocation;
use infragate::context::{PipelineContext, RunIdentity};
use infragate::core::PipelineOutputs;
use infragate::credentials::EnvCredentialProvider;
use infragate::events::LoggingEventSink;
use infragate::executor::TerraformExecutor;
use infragate::observability::{init_logging, LogFormat};
use infragate::pipeline::{CiPipeline, DeployPipeline, DestroyPipeline, GateServices, Pipeline};
use infragate::tools::ProcessToolRunner;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "infragate", version)]
#[command(about = "Terraform CI, deploy and destroy pipelines with approval gates", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "infragate=info")]
    log_filter: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the CI checks
    Ci(RunArgs),
    /// Plan, wait for one approval, then apply
    Deploy(GatedArgs),
    /// Confirm, plan a destroy, wait for two approvals, then apply
    Destroy(GatedArgs),
    /// Parse and validate an invocation file without running anything
    ValidateInvocation {
        /// Invocation JSON file
        #[arg(long, value_name = "FILE")]
        invocation: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Invocation JSON file; defaults apply when omitted
    #[arg(long, value_name = "FILE")]
    invocation: Option<PathBuf>,

    /// Branch that triggered the run
    #[arg(long, env = "INFRAGATE_BRANCH")]
    branch: Option<String>,

    /// Event that triggered the run
    #[arg(long, env = "INFRAGATE_EVENT")]
    event: Option<String>,

    /// Who started the run
    #[arg(long, env = "INFRAGATE_ACTOR")]
    actor: Option<String>,
}

#[derive(Args, Debug)]
struct GatedArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Approval events as JSON lines; `-` reads them from stdin as they arrive
    #[arg(long, value_name = "FILE")]
    approvals: Option<String>,

    /// Reviewer policy JSON file; without one anyone may approve
    #[arg(long, value_name = "FILE")]
    policy: Option<PathBuf>,

    /// Confirmation word, overriding the invocation file
    #[arg(long)]
    confirmation: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_logging(format, &cli.log_filter).context("installing log subscriber")?;

    let outputs = match cli.command {
        Commands::ValidateInvocation { invocation } => return validate_invocation(&invocation),
        Commands::Ci(args) => {
            let invocation = load_invocation(args.invocation.as_deref())?;
            let pipeline = CiPipeline::new(Arc::new(ProcessToolRunner))
                .with_credential_provider(Arc::new(EnvCredentialProvider::default()));
            run_pipeline(&pipeline, invocation, identity(&args)).await
        }
        Commands::Deploy(args) => {
            let (invocation, gates) = prepare_gated(&args).await?;
            let pipeline = DeployPipeline::new(terraform()).with_gates(gates);
            run_pipeline(&pipeline, invocation, identity(&args.run)).await
        }
        Commands::Destroy(args) => {
            let (invocation, gates) = prepare_gated(&args).await?;
            let pipeline = DestroyPipeline::new(terraform()).with_gates(gates);
            run_pipeline(&pipeline, invocation, identity(&args.run)).await
        }
    };

    println!("{}", serde_json::to_string_pretty(&outputs.to_output_map())?);
    Ok(ExitCode::from(exit_status(&outputs)))
}

fn exit_status(outputs: &PipelineOutputs) -> u8 {
    u8::from(!outputs.success())
}

fn validate_invocation(path: &Path) -> Result<ExitCode> {
    let invocation = PipelineInvocation::from_file(path)
        .with_context(|| format!("reading {}", path.display()))?;
    match invocation.validate() {
        Ok(()) => {
            println!("{}", serde_json::to_string_pretty(&invocation)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("invalid invocation: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn load_invocation(path: Option<&Path>) -> Result<PipelineInvocation> {
    match path {
        Some(path) => PipelineInvocation::from_file(path)
            .with_context(|| format!("reading {}", path.display())),
        None => Ok(PipelineInvocation::new()),
    }
}

fn identity(args: &RunArgs) -> RunIdentity {
    let mut identity = RunIdentity::new();
    if let Some(branch) = &args.branch {
        identity = identity.with_branch(branch.clone());
    }
    if let Some(event) = &args.event {
        identity = identity.with_event(event.clone());
    }
    if let Some(actor) = &args.actor {
        identity = identity.with_actor(actor.clone());
    }
    identity
}

fn terraform() -> Arc<TerraformExecutor> {
    Arc::new(
        TerraformExecutor::new(Arc::new(ProcessToolRunner))
            .with_credential_provider(Arc::new(EnvCredentialProvider::default())),
    )
}

async fn prepare_gated(args: &GatedArgs) -> Result<(PipelineInvocation, GateServices)> {
    let mut invocation = load_invocation(args.run.invocation.as_deref())?;
    if let Some(word) = &args.confirmation {
        invocation = invocation.with_confirmation(word.clone());
    }

    let policy = match &args.policy {
        Some(path) => StaticApprovalPolicy::from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => StaticApprovalPolicy::new(),
    };

    let broker = ApprovalBroker::buffering();
    match args.approvals.as_deref() {
        None => {}
        Some("-") => {
            tokio::spawn(forward_stdin(broker.clone(), invocation.environment.clone()));
        }
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {path}"))?;
            let queued = feed_lines(&broker, &invocation.environment, path, &raw)?;
            tracing::info!(source = %path, events = queued, "Queued approval events");
        }
    }

    Ok((invocation, GateServices::new(broker, Arc::new(policy))))
}

/// Submits every non-blank JSON line of `raw`, in order.
///
/// Stops at the first malformed line, naming it as `source:line`.
fn feed_lines(
    broker: &ApprovalBroker,
    environment: &str,
    source: &str,
    raw: &str,
) -> Result<usize> {
    let mut queued = 0;
    for (number, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event = ApprovalEvent::from_json_line(line)
            .with_context(|| format!("{source}:{}", number + 1))?;
        submit(broker, environment, event);
        queued += 1;
    }
    Ok(queued)
}

/// Events that name neither a gate nor an environment go to the run's environment.
fn submit(broker: &ApprovalBroker, environment: &str, mut event: ApprovalEvent) {
    if event.gate_id.is_none() && event.environment.is_none() {
        event.environment = Some(environment.to_string());
    }
    broker.submit(event);
}

async fn forward_stdin(broker: ApprovalBroker, environment: String) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match ApprovalEvent::from_json_line(&line) {
                Ok(event) => submit(&broker, &environment, event),
                Err(e) => tracing::warn!(error = %e, "Ignoring malformed approval line"),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Stopped reading approvals from stdin");
                break;
            }
        }
    }
}

async fn run_pipeline(
    pipeline: &dyn Pipeline,
    invocation: PipelineInvocation,
    identity: RunIdentity,
) -> PipelineOutputs {
    let ctx = Arc::new(
        PipelineContext::new(pipeline.name(), invocation)
            .with_identity(identity)
            .with_event_sink(Arc::new(LoggingEventSink::default())),
    );

    let interrupt = {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling run");
                ctx.cancel("interrupted");
            }
        })
    };

    let outputs = pipeline.run(ctx).await;
    interrupt.abort();
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use infragate::errors::ErrorKind;
    use infragate::testing::RecordingExecutor;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn gated(approvals: Option<String>, confirmation: &str) -> GatedArgs {
        GatedArgs {
            run: RunArgs {
                invocation: None,
                branch: Some("main".into()),
                event: None,
                actor: Some("ci-bot".into()),
            },
            approvals,
            policy: None,
            confirmation: Some(confirmation.into()),
        }
    }

    fn approvals_file(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[test]
    fn test_unaddressed_events_go_to_run_environment() {
        let broker = ApprovalBroker::buffering();
        let raw = r#"{"reviewer": "alice", "decision": "approve"}

{"reviewer": "bob", "decision": "approve", "environment": "staging"}"#;

        let queued = feed_lines(&broker, "prod", "approvals.jsonl", raw).unwrap();

        assert_eq!(queued, 2);
        assert_eq!(broker.backlog_len("prod"), 1);
        assert_eq!(broker.backlog_len("staging"), 1);
    }

    #[test]
    fn test_malformed_line_is_named() {
        let broker = ApprovalBroker::buffering();
        let raw = "{\"reviewer\": \"alice\", \"decision\": \"approve\"}\n\n{not json\n";

        let err = feed_lines(&broker, "prod", "approvals.jsonl", raw).unwrap_err();

        assert!(format!("{err:#}").contains("approvals.jsonl:3"));
        assert_eq!(broker.backlog_len("prod"), 1);
    }

    #[tokio::test]
    async fn test_file_fed_destroy_passes_both_gates() {
        let file = approvals_file(&[
            r#"{"reviewer": "alice", "decision": "approve"}"#,
            r#"{"reviewer": "bob", "decision": "approve"}"#,
        ]);
        let args = gated(Some(file.path().display().to_string()), "DESTROY");

        let (invocation, gates) = prepare_gated(&args).await.unwrap();
        let executor = Arc::new(RecordingExecutor::new());
        let pipeline = DestroyPipeline::new(executor.clone()).with_gates(gates);
        let outputs = run_pipeline(&pipeline, invocation, identity(&args.run)).await;

        assert!(outputs.success(), "{:?}", outputs.error);
        assert_eq!(
            outputs.get("approval").map(|r| r.detail.as_str()),
            Some("approved by alice; then bob")
        );
        assert_eq!(executor.applied().len(), 1);
        assert_eq!(exit_status(&outputs), 0);
    }

    #[tokio::test]
    async fn test_failed_run_exits_nonzero() {
        let file = approvals_file(&[r#"{"reviewer": "alice", "decision": "approve"}"#]);
        let args = gated(Some(file.path().display().to_string()), "destroy");

        let (invocation, gates) = prepare_gated(&args).await.unwrap();
        let executor = Arc::new(RecordingExecutor::new());
        let pipeline = DestroyPipeline::new(executor.clone()).with_gates(gates);
        let outputs = run_pipeline(&pipeline, invocation, identity(&args.run)).await;

        assert_eq!(outputs.error_kind, Some(ErrorKind::ConfirmationMismatch));
        assert_eq!(outputs.to_output_map()["error_kind"], "confirmation_mismatch");
        assert_eq!(exit_status(&outputs), 1);
        assert_eq!(executor.plan_count(), 0);
    }

    #[test]
    fn test_identity_from_flags() {
        let args = gated(None, "DESTROY");
        let identity = identity(&args.run);
        assert_eq!(identity.branch.as_deref(), Some("main"));
        assert_eq!(identity.actor.as_deref(), Some("ci-bot"));
        assert!(identity.event.is_none());
    }
}
