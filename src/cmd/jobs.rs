//! Job listing, history and stats commands.

use anyhow::Result;

use foreman::config::ForemanConfig;
use foreman::monitor::{Event, EventType, JobLogStore, JobStatus};
use foreman::stream::{tool_emoji, truncate_thinking};
use foreman::util::truncate;

fn styled_status(status: JobStatus, text: String) -> console::StyledObject<String> {
    let s = console::style(text);
    match status {
        JobStatus::Completed => s.green(),
        JobStatus::Error => s.red(),
        JobStatus::Running => s.yellow(),
    }
}

pub fn cmd_jobs(config: &ForemanConfig, json: bool) -> Result<()> {
    let store = JobLogStore::new(&config.store.data_dir);
    let jobs = store.list_jobs()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("No jobs found in {}", store.dir().display());
        return Ok(());
    }

    println!(
        "{:<38} {:<10} {:<20} {:>9} Task",
        "Job", "Status", "Started", "Cost"
    );
    println!(
        "{:<38} {:<10} {:<20} {:>9} ----",
        "-".repeat(36),
        "------",
        "-------",
        "----"
    );
    for job in &jobs {
        let started = job
            .started_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        // Pad before styling; ANSI codes would break the column width.
        let status = format!("{:<10}", job.status.as_str());
        println!(
            "{:<38} {} {:<20} {:>9} {}",
            job.id,
            styled_status(job.status, status),
            started,
            format!("${:.4}", job.cost_usd),
            truncate(job.task.lines().next().unwrap_or(""), 60)
        );
    }
    Ok(())
}

pub fn cmd_show(config: &ForemanConfig, job_id: &str, json: bool) -> Result<()> {
    let store = JobLogStore::new(&config.store.data_dir);
    let events = store.read_history(job_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    let status = JobStatus::from_events(&events);
    println!(
        "{} {} ({} events)",
        console::style(job_id).bold(),
        styled_status(status, status.to_string()),
        events.len()
    );
    println!();
    for event in &events {
        println!(
            "{} {:<20} {}",
            console::style(event.timestamp.format("%H:%M:%S")).dim(),
            event.event_type.as_str(),
            describe_event(event)
        );
    }
    Ok(())
}

/// Width of a reasoning snippet in `show` output.
const THINKING_SNIPPET_LEN: usize = 80;

/// One-line rendering of an event's payload.
fn describe_event(event: &Event) -> String {
    let text = match event.event_type {
        EventType::JobStarted => event.str_field("task").map(String::from),
        EventType::ProcessOutputLine => match event.str_field("kind") {
            Some("tool_use") => {
                let tool = event.str_field("tool_name").unwrap_or("");
                event
                    .str_field("description")
                    .or(Some(tool))
                    .map(|d| format!("{} {}", tool_emoji(tool), d))
            }
            Some("thinking") => event
                .str_field("text")
                .map(|t| format!("({})", truncate_thinking(t, THINKING_SNIPPET_LEN))),
            Some("tool_error") => event.str_field("error").map(|e| format!("! {}", e)),
            _ => event.str_field("text").map(String::from),
        },
        EventType::ToolStarted | EventType::ToolCompleted => {
            event.str_field("tool_name").map(String::from)
        }
        EventType::LlmResponse => event
            .f64_field("cost_usd")
            .map(|c| format!("${:.4}", c)),
        EventType::JobCompleted => event.str_field("final_response").map(String::from),
        EventType::JobError => event.str_field("error").map(String::from),
        _ => None,
    };
    let text = text.unwrap_or_else(|| serde_json::Value::Object(event.data.clone()).to_string());
    truncate(text.lines().next().unwrap_or(""), 120)
}

pub fn cmd_stats(config: &ForemanConfig, json: bool) -> Result<()> {
    let store = JobLogStore::new(&config.store.data_dir);
    let stats = store.stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", console::style("Job statistics").bold().cyan());
    println!("  Total jobs:         {}", stats.total_jobs);
    println!("  Completed:          {}", console::style(stats.completed_jobs).green());
    println!("  Errors:             {}", console::style(stats.error_jobs).red());
    println!("  Running:            {}", console::style(stats.running_jobs).yellow());
    println!("  Total cost:         ${:.4}", stats.total_cost_usd);
    println!("  Input tokens:       {}", stats.total_input_tokens);
    println!("  Output tokens:      {}", stats.total_output_tokens);
    println!("  Cache read tokens:  {}", stats.total_cache_read_tokens);
    println!("  Cache write tokens: {}", stats.total_cache_write_tokens);
    Ok(())
}
