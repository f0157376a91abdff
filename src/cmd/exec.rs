//! One-shot job command: `foreman exec`.

use std::path::PathBuf;

use anyhow::{Context, Result};

use foreman::config::ForemanConfig;
use foreman::monitor::{Hub, JobLogStore, JobStatus, new_job_id};
use foreman::runner::{RunRequest, run_job};

use super::job_runner;

pub struct ExecArgs {
    pub task: String,
    pub job_id: Option<String>,
    pub planning: bool,
    pub continue_session: bool,
    pub working_dir: PathBuf,
}

/// Run the job and print its outcome. Returns whether it completed.
pub async fn cmd_exec(config: &ForemanConfig, args: ExecArgs) -> Result<bool> {
    let store = JobLogStore::new(&config.store.data_dir);
    let hub = Hub::start(store, config.hub.to_hub_config()).context("Failed to start event hub")?;
    let runner = job_runner(config, &hub);

    let job_id = args.job_id.unwrap_or_else(new_job_id);
    let request = RunRequest {
        job_id: job_id.clone(),
        task: args.task,
        working_dir: args.working_dir,
        planning: args.planning,
        continue_session: args.continue_session,
    };

    println!("Job {}", console::style(&job_id).bold());
    let result = run_job(&runner, &hub, &request).await;
    hub.shutdown().await;
    let outcome = result.with_context(|| format!("Job {} failed to run", job_id))?;

    println!();
    match outcome.status {
        JobStatus::Error => println!(
            "{} {}",
            console::style("Error:").red().bold(),
            outcome.message
        ),
        _ => println!(
            "{} {}",
            console::style(format!("{}:", outcome.detail)).green().bold(),
            outcome.message
        ),
    }
    if let Some(cost) = outcome.run.as_ref().and_then(|r| r.usage.as_ref()).map(|u| u.cost_usd) {
        println!("{}", console::style(format!("Cost: ${:.4}", cost)).dim());
    }

    Ok(outcome.status != JobStatus::Error)
}
