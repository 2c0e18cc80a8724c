// Trainhub - Asynchronous model-training job orchestrator
// Main entry point

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::prelude::*;

use trainhub::config::{load_config, Config};
use trainhub::errors::admission_error_message;
use trainhub::jobs::{JobConfig, JobRecord, JobStatus};
use trainhub::models::{register_builtin_strategies, ModelRegistry};
use trainhub::training::{Orchestrator, ShutdownMode, TrainingRequest};

#[derive(Parser, Debug)]
#[command(name = "trainhub")]
#[command(about = "Asynchronous model-training job orchestrator", version)]
struct Args {
    /// Config file (default: ~/.trainhub/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train one model and wait for the result
    Train {
        /// Registered model type (see `trainhub models`)
        #[arg(long = "model-type")]
        model_type: String,

        /// Dataset reference: `sample`, a table name or a .jsonl path
        #[arg(long, default_value = "sample")]
        dataset: String,

        /// Job config as a JSON object, e.g. '{"alpha": 0.1}'
        #[arg(long = "config-json")]
        config_json: Option<String>,

        #[arg(long)]
        user: Option<String>,

        /// Publish the trained artifact
        #[arg(long)]
        publish: bool,

        /// Cancel the job and exit after this many seconds
        #[arg(long = "timeout-secs")]
        timeout_secs: Option<u64>,
    },
    /// Submit every request in a JSONL file and wait for all of them
    Batch {
        /// One training request per line
        file: PathBuf,
    },
    /// List registered model types
    Models,
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Train {
            model_type,
            dataset,
            config_json,
            user,
            publish,
            timeout_secs,
        } => {
            let job_config = match config_json {
                Some(json) => serde_json::from_str::<JobConfig>(&json)
                    .context("--config-json must be a JSON object")?,
                None => JobConfig::new(),
            };
            let request = TrainingRequest {
                user_id: user,
                model_type,
                dataset_reference: dataset,
                config: job_config,
                publish,
            };
            run_train(config, request, timeout_secs.map(Duration::from_secs)).await
        }
        Command::Batch { file } => run_batch(config, &file).await,
        Command::Models => {
            for model_type in init_registry().list_types() {
                println!("{}", model_type);
            }
            Ok(())
        }
        Command::ShowConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Register every strategy before anything reads the registry
fn init_registry() -> Arc<ModelRegistry> {
    let mut builder = ModelRegistry::builder();
    register_builtin_strategies(&mut builder);
    Arc::new(builder.build())
}

/// Submit one job and wait for it to finish
async fn run_train(
    config: Config,
    request: TrainingRequest,
    timeout: Option<Duration>,
) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config, init_registry())?;

    let job_id = match orchestrator.submit(request).await {
        Ok(job_id) => job_id,
        Err(e) => {
            orchestrator.shutdown(ShutdownMode::Drain).await;
            bail!("{}", admission_error_message(&e));
        }
    };
    println!("Submitted job {}", job_id);

    let waited = match timeout {
        Some(limit) => tokio::time::timeout(limit, orchestrator.wait_for_terminal(&job_id)).await,
        None => Ok(orchestrator.wait_for_terminal(&job_id).await),
    };
    let job = match waited {
        Ok(job) => job?,
        Err(_) => {
            eprintln!("\x1b[1;33m⚠ Timed out, cancelling job {}\x1b[0m", job_id);
            if let Err(e) = orchestrator.cancel(&job_id) {
                tracing::warn!(job_id = %job_id, error = %e, "Cancel after timeout failed");
            }
            print_job(&orchestrator.get_status(&job_id)?);

            // The strategy may still be running on a blocking thread, and
            // both draining and runtime teardown would wait for it.
            std::process::exit(1);
        }
    };

    orchestrator.shutdown(ShutdownMode::Drain).await;
    print_job(&job);

    if job.status != JobStatus::Completed {
        bail!("job {} finished as {}", job.job_id, job.status);
    }
    Ok(())
}

/// Submit each request of a JSONL file, then wait for every admitted job
async fn run_batch(config: Config, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read batch file: {}", file.display()))?;

    let orchestrator = Orchestrator::from_config(config, init_registry())?;
    let mut job_ids = Vec::new();
    let mut rejected = 0;

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let request: TrainingRequest = serde_json::from_str(line)
            .with_context(|| format!("Invalid request on line {}", line_no + 1))?;

        match orchestrator.submit(request).await {
            Ok(job_id) => {
                println!("Submitted job {}", job_id);
                job_ids.push(job_id);
            }
            Err(e) => {
                rejected += 1;
                eprintln!("Line {}: {}", line_no + 1, admission_error_message(&e));
            }
        }
    }

    for job_id in &job_ids {
        let job = orchestrator.wait_for_terminal(job_id).await?;
        print_job(&job);
    }
    orchestrator.shutdown(ShutdownMode::Drain).await;

    let stats = orchestrator.stats();
    println!(
        "\n{} submitted, {} rejected: {} completed, {} failed, {} cancelled",
        job_ids.len(),
        rejected,
        stats.completed,
        stats.failed,
        stats.cancelled
    );

    if stats.failed > 0 || rejected > 0 {
        bail!("{} job(s) failed, {} rejected", stats.failed, rejected);
    }
    Ok(())
}

fn print_job(job: &JobRecord) {
    let marker = match job.status {
        JobStatus::Completed => "\x1b[1;32m✓\x1b[0m",
        JobStatus::Failed => "\x1b[1;31m✗\x1b[0m",
        _ => "\x1b[1;33m⚠\x1b[0m",
    };
    println!("\n{} Job {} ({})", marker, job.job_id, job.model_type);
    println!("  Status:   {}", job.status);
    println!("  Progress: {}%", job.progress);

    for (name, value) in &job.metrics {
        println!("  {:<16} {:.6}", name, value);
    }
    if let Some(path) = &job.model_path {
        println!("  Model:    {}", path.display());
    }
    if let Some(remote) = &job.remote_artifact_id {
        println!("  Remote:   {}", remote);
    }
    if let Some(url) = &job.run_tracking_url {
        println!("  Run:      {}", url);
    }
    if let Some(error) = &job.error {
        println!("  Error:    {}", error);
    }
}

fn init_tracing() {
    let show_debug = std::env::var("TRAINHUB_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    // Default: INFO, overridable with RUST_LOG; TRAINHUB_DEBUG wins
    let env_filter = if show_debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}
