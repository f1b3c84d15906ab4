use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use insight_worker::{build_pipeline, AuditLog, DocumentJob, Worker, WorkerConfig};
use orchestration::prompts::ArtifactDraft;
use orchestration::{PipelineOutcome, Strictness};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Worker configuration file (TOML). Defaults plus environment when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract and validate insights for every job in a JSON file.
    Run {
        /// JSON array of `{document_id, scope_id, source_text, prompts}`.
        #[arg(long)]
        input: PathBuf,

        /// JSONL audit log (overrides `audit_log` / INSIGHT_AUDIT_LOG).
        #[arg(long)]
        audit_log: Option<PathBuf>,
    },
    /// Run one validation pass over a drafted artifact and print the report.
    Critique {
        /// Artifact draft JSON: `{content, excerpt, significance, themes, confidence}`.
        #[arg(long)]
        artifact: PathBuf,

        /// Source text file the excerpt is cited from.
        #[arg(long)]
        source: PathBuf,

        #[arg(long)]
        strictness: Option<Strictness>,

        #[arg(long, default_value = "cli")]
        scope: String,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = WorkerConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Run { input, audit_log } => {
            if audit_log.is_some() {
                config.audit_log = audit_log;
            }
            run_jobs(&config, &input).await
        }
        Command::Critique {
            artifact,
            source,
            strictness,
            scope,
        } => critique(&config, &artifact, &source, strictness, &scope).await,
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn run_jobs(config: &WorkerConfig, input: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read jobs from {}", input.display()))?;
    let jobs: Vec<DocumentJob> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse jobs in {}", input.display()))?;

    let pipeline = Arc::new(build_pipeline(config)?);
    let mut worker = Worker::new(pipeline);
    if let Some(path) = &config.audit_log {
        worker = worker.with_audit(Arc::new(AuditLog::open(path)?));
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current chunk");
            ctrl_c.cancel();
        }
    });

    let (handle, mut results, task) = worker.spawn(config.queue_capacity, cancel);
    info!(jobs = jobs.len(), "submitting jobs");
    let producer = tokio::spawn(async move {
        for job in jobs {
            if handle.submit(job).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = results.recv().await {
        match &result.outcome {
            Ok(PipelineOutcome::Completed(outcome)) => info!(
                document = %result.document_id,
                chunk = result.chunk_index,
                status = ?outcome.status,
                iterations = outcome.iterations(),
                content = %outcome.artifact.content,
                "chunk done"
            ),
            Ok(PipelineOutcome::Duplicate(found)) => info!(
                document = %result.document_id,
                chunk = result.chunk_index,
                duplicate_of = %found.id,
                score = found.score,
                "chunk skipped as duplicate"
            ),
            Err(e) if e.is_retry_later() => warn!(
                document = %result.document_id,
                chunk = result.chunk_index,
                error = %e,
                "providers unavailable, retry later"
            ),
            Err(e) => error!(
                document = %result.document_id,
                chunk = result.chunk_index,
                error = %e,
                "chunk failed"
            ),
        }
    }

    producer.await.context("job producer panicked")?;
    let summary = task.await.context("worker task panicked")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn critique(
    config: &WorkerConfig,
    artifact: &Path,
    source: &Path,
    strictness: Option<Strictness>,
    scope: &str,
) -> Result<()> {
    let raw = std::fs::read_to_string(artifact)
        .with_context(|| format!("failed to read artifact {}", artifact.display()))?;
    let source_text = std::fs::read_to_string(source)
        .with_context(|| format!("failed to read source {}", source.display()))?;
    let artifact = ArtifactDraft::parse(&raw)?.into_artifact(scope);

    let pipeline = build_pipeline(config)?;
    let strictness = strictness.unwrap_or(config.orchestration.strictness);
    let report = pipeline.critique(&artifact, &source_text, strictness).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
