//! Per-job append-only event logs.
//!
//! Every job owns one `<job_id>.jsonl` file under the store directory, one
//! serialized [`Event`] per line. The [`Hub`](super::hub::Hub) is the only
//! writer (through [`JobLogStore::open_append`]); everything else here is a
//! stateless read path that never needs the running hub.
//!
//! Job state is never stored. [`JobStatus::from_events`] and
//! [`JobSummary::from_events`] are pure folds over a job's event sequence.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::event::{Event, EventType};
use crate::errors::StoreError;

const LOG_EXTENSION: &str = "jsonl";

/// Status of a job, derived from whether a terminal event has been logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Running,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Apply one event to the status. The last terminal event wins.
    pub fn apply(self, event: &Event) -> Self {
        match event.event_type {
            EventType::JobCompleted => Self::Completed,
            EventType::JobError => Self::Error,
            _ => self,
        }
    }

    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        events
            .into_iter()
            .fold(Self::Running, |status, event| status.apply(event))
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the List API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub task: String,
    pub started_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub cost_usd: f64,
    pub event_count: usize,
}

impl JobSummary {
    /// Fold a job's events into its summary.
    ///
    /// Task and start time come from the first event. Cost is the sum of
    /// `llm_response.cost_usd`, replaced by `total_cost_usd` when a terminal
    /// event carries one.
    pub fn from_events(id: &str, events: &[Event]) -> Self {
        let mut summary = Self {
            id: id.to_string(),
            task: String::new(),
            started_at: None,
            status: JobStatus::Running,
            cost_usd: 0.0,
            event_count: events.len(),
        };

        if let Some(first) = events.first() {
            summary.task = first.str_field("task").unwrap_or_default().to_string();
            summary.started_at = Some(first.timestamp);
        }

        for event in events {
            summary.status = summary.status.apply(event);
            match event.event_type {
                EventType::LlmResponse => {
                    if let Some(cost) = event.f64_field("cost_usd") {
                        summary.cost_usd += cost;
                    }
                }
                EventType::JobCompleted | EventType::JobError => {
                    if let Some(total) = event.f64_field("total_cost_usd") {
                        summary.cost_usd = total;
                    }
                }
                _ => {}
            }
        }
        summary
    }
}

/// Aggregate figures returned by the Stats API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub error_jobs: usize,
    pub running_jobs: usize,
    pub total_cost_usd: f64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub total_cache_read_tokens: i64,
    pub total_cache_write_tokens: i64,
}

impl JobStats {
    /// Add one job's events to the running totals.
    pub fn add_job(&mut self, events: &[Event]) {
        self.total_jobs += 1;
        match JobStatus::from_events(events) {
            JobStatus::Completed => self.completed_jobs += 1,
            JobStatus::Error => self.error_jobs += 1,
            JobStatus::Running => self.running_jobs += 1,
        }

        for event in events
            .iter()
            .filter(|e| e.event_type == EventType::LlmResponse)
        {
            self.total_input_tokens += event.i64_field("input_tokens").unwrap_or(0);
            self.total_output_tokens += event.i64_field("output_tokens").unwrap_or(0);
            self.total_cache_read_tokens += event.i64_field("cache_read_tokens").unwrap_or(0);
            self.total_cache_write_tokens += event.i64_field("cache_write_tokens").unwrap_or(0);
            self.total_cost_usd += event.f64_field("cost_usd").unwrap_or(0.0);
        }
    }
}

/// Whether `job_id` can safely become a file name inside the store.
pub fn is_valid_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && !job_id.starts_with('.')
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Directory of per-job JSONL logs.
#[derive(Debug, Clone)]
pub struct JobLogStore {
    dir: PathBuf,
}

impl JobLogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the log for `job_id`, or `None` if the id is unsafe.
    pub fn log_path(&self, job_id: &str) -> Option<PathBuf> {
        is_valid_job_id(job_id).then(|| self.dir.join(format!("{}.{}", job_id, LOG_EXTENSION)))
    }

    /// Open (creating if needed) the log for `job_id` in append mode.
    ///
    /// Only the hub loop calls this.
    pub fn open_append(&self, job_id: &str) -> io::Result<File> {
        let path = self.log_path(job_id).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("job id '{}' is not a valid file name", job_id),
            )
        })?;
        fs::create_dir_all(&self.dir)?;
        OpenOptions::new().create(true).append(true).open(path)
    }

    /// History API: every persisted event of one job, in log order.
    ///
    /// A log that exists but has no parseable lines yields an empty list;
    /// a missing log is [`StoreError::NotFound`].
    pub fn read_history(&self, job_id: &str) -> Result<Vec<Event>, StoreError> {
        let path = self
            .log_path(job_id)
            .ok_or_else(|| StoreError::InvalidJobId {
                job_id: job_id.to_string(),
            })?;
        match read_events(&path) {
            Ok(events) => Ok(events),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                job_id: job_id.to_string(),
            }),
            Err(source) => Err(StoreError::Unreadable { path, source }),
        }
    }

    /// Ids of every job with a log file, in directory order.
    pub fn job_ids(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Unreadable {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Unreadable {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && is_valid_job_id(stem)
            {
                ids.push(stem.to_string());
            }
        }
        Ok(ids)
    }

    /// List API: one summary per job, most recently started first.
    pub fn list_jobs(&self) -> Result<Vec<JobSummary>, StoreError> {
        let mut jobs: Vec<JobSummary> = self
            .scan_jobs()?
            .into_iter()
            .map(|(id, events)| JobSummary::from_events(&id, &events))
            .collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(jobs)
    }

    /// Stats API: status counts and token/cost totals over every job.
    pub fn stats(&self) -> Result<JobStats, StoreError> {
        let mut stats = JobStats::default();
        for (_, events) in self.scan_jobs()? {
            stats.add_job(&events);
        }
        Ok(stats)
    }

    /// Read every job log. Individual unreadable files are skipped with a
    /// warning so one bad file cannot hide the others.
    fn scan_jobs(&self) -> Result<Vec<(String, Vec<Event>)>, StoreError> {
        let mut jobs = Vec::new();
        for id in self.job_ids()? {
            let Some(path) = self.log_path(&id) else {
                continue;
            };
            match read_events(&path) {
                Ok(events) => jobs.push((id, events)),
                Err(e) => warn!(job_id = %id, path = %path.display(), "skipping unreadable job log: {}", e),
            }
        }
        Ok(jobs)
    }
}

/// Parse a JSONL event log, skipping lines that fail to parse (a torn
/// trailing write after a crash, or foreign garbage).
pub fn read_events(path: &Path) -> io::Result<Vec<Event>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut line = Vec::new();
    let mut line_no = 0usize;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        line_no += 1;
        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_slice::<Event>(trimmed) {
            Ok(event) => events.push(event),
            Err(e) => debug!(path = %path.display(), line = line_no, "skipping corrupt log line: {}", e),
        }
    }
    Ok(events)
}
