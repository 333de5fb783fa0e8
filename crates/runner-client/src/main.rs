//! `nbforge-report`: report notebook runner status to the control plane.
//!
//! Reads `API_URL`, `JOB_ID` and `CALLBACK_TOKEN` from the environment the
//! control plane injects into every runner workload.

use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nbforge_runner_client::{CallbackClient, RunnerConfig, StatusReport};

#[derive(Parser)]
#[command(name = "nbforge-report")]
#[command(version, about = "Report notebook execution status to NBForge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Send once instead of retrying transient failures
    #[arg(long)]
    no_retry: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// The notebook started executing
    Running,

    /// The notebook finished successfully
    Completed {
        /// Object key of the executed notebook
        #[arg(long)]
        output_notebook: String,

        /// Object key of the HTML rendering
        #[arg(long)]
        output_html: Option<String>,

        /// JSON file with extracted outputs
        #[arg(long, value_name = "FILE")]
        outputs: Option<PathBuf>,
    },

    /// The notebook failed
    Failed {
        /// Error message shown to the user
        #[arg(long)]
        error: String,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,nbforge_runner_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = RunnerConfig::from_env()?;
    let client = CallbackClient::from_config(&config);

    let report = match cli.command {
        Commands::Running => StatusReport::running(Utc::now()),
        Commands::Completed {
            output_notebook,
            output_html,
            outputs,
        } => {
            let outputs = match outputs {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    Some(serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?)
                }
                None => None,
            };
            StatusReport::completed(output_notebook, output_html, outputs)
        }
        Commands::Failed { error } => StatusReport::failed(error),
    };

    if cli.no_retry {
        client.report(&report).await?;
    } else {
        client.report_with_retry(&report).await?;
    }

    tracing::info!(
        execution_id = %config.job_id,
        status = ?report.status,
        "Status reported"
    );
    Ok(())
}
