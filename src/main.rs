use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use foreman::config::ForemanConfig;
use foreman::logging::{LogOptions, init_logging};

mod cmd;

#[derive(Parser)]
#[command(name = "foreman")]
#[command(version, about = "Run the Claude CLI on coding jobs and monitor their progress")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Config file (default: .foreman/foreman.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Job log directory. Overrides foreman.toml and FOREMAN_DATA_DIR.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the monitor API (history, list, stats, live feeds)
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,

        /// Permissive CORS and listen on all interfaces
        #[arg(long)]
        dev: bool,
    },
    /// Run one job through the Claude CLI and record its events
    Exec {
        /// Task description passed to the tool
        task: String,

        /// Job id (default: a new UUID)
        #[arg(long)]
        job: Option<String>,

        /// Read-only planning run
        #[arg(long)]
        plan: bool,

        /// Continue the previous session in the working directory
        #[arg(long = "continue")]
        continue_session: bool,

        /// Working directory (default: current directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// List known jobs, most recent first
    Jobs {
        #[arg(long)]
        json: bool,
    },
    /// Show a job's event history
    Show {
        job_id: String,

        #[arg(long)]
        json: bool,
    },
    /// Aggregate job counts, cost and token usage
    Stats {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let _log_guard = init_logging(&LogOptions {
        verbose: cli.verbose,
        json: cli.log_json,
        log_dir: cli.log_dir.clone(),
    })?;

    let project_dir = std::env::current_dir().context("Failed to get current directory")?;
    let mut config = ForemanConfig::load_or_default(&project_dir, cli.config.as_deref())?;
    config.apply_env()?;
    if let Some(dir) = &cli.data_dir {
        config.store.data_dir = dir.clone();
    }

    match &cli.command {
        Commands::Serve { port, host, dev } => {
            if let Some(port) = port {
                config.server.port = *port;
            }
            if let Some(host) = host {
                config.server.host = host.clone();
            } else if *dev {
                config.server.host = "0.0.0.0".to_string();
            }
            config.validate()?;
            cmd::cmd_serve(&config, *dev, project_dir.clone()).await?;
        }
        Commands::Exec {
            task,
            job,
            plan,
            continue_session,
            dir,
        } => {
            config.validate()?;
            let working_dir = dir.clone().unwrap_or_else(|| project_dir.clone());
            let ok = cmd::cmd_exec(
                &config,
                cmd::ExecArgs {
                    task: task.clone(),
                    job_id: job.clone(),
                    planning: *plan,
                    continue_session: *continue_session,
                    working_dir,
                },
            )
            .await?;
            if !ok {
                // Return instead of exiting so the log writer guard flushes.
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Jobs { json } => {
            cmd::cmd_jobs(&config, *json)?;
        }
        Commands::Show { job_id, json } => {
            cmd::cmd_show(&config, job_id, *json)?;
        }
        Commands::Stats { json } => {
            cmd::cmd_stats(&config, *json)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
