//! Runs the external code tool for one job and records its lifecycle.
//!
//! [`CodeRunner`] owns the process boundary: it builds the command line,
//! merges stdout and stderr into a single [`Translator`] in arrival order and
//! enforces the wall-clock timeout. [`run_job`] wraps a run in the job's
//! lifecycle events and decides the outcome, falling back to the working
//! tree's git status when the tool never reported a Terminal State.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::RunnerSettings;
use crate::errors::RunnerError;
use crate::monitor::{EventSink, EventType, JobStatus, data};
use crate::notify::Notifier;
use crate::stream::terminal::status_instructions;
use crate::stream::{ResultUsage, TerminalState, TerminalStatus, Translator};
use crate::util::truncate;

/// Time allowed to drain output after the process was killed.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Raw output kept for error reports.
const RAW_EXCERPT_LEN: usize = 500;

/// Length of `result_preview` on `tool_completed`.
const RESULT_PREVIEW_LEN: usize = 200;

/// Read size for the stdout/stderr pumps.
const READ_CHUNK: usize = 8192;

/// Tool name recorded on the job's `tool_started` / `tool_completed` events.
pub const RUNNER_TOOL_NAME: &str = "code_runner";

/// One invocation of the external tool.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub job_id: String,
    pub task: String,
    pub working_dir: PathBuf,
    /// Read-only planning run; also silences the notification side-channel.
    pub planning: bool,
    /// Continue the tool's previous session in this directory.
    pub continue_session: bool,
}

impl RunRequest {
    pub fn new(job_id: impl Into<String>, task: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_id: job_id.into(),
            task: task.into(),
            working_dir: working_dir.into(),
            planning: false,
            continue_session: false,
        }
    }
}

/// What one run of the external tool produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub terminal_state: Option<TerminalState>,
    pub result_text: String,
    /// The final message, or the raw output if there was no result record.
    pub output: String,
    pub raw_excerpt: String,
    pub usage: Option<ResultUsage>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Spawns the external code tool and feeds its output through a translator.
pub struct CodeRunner {
    settings: RunnerSettings,
    sink: Arc<dyn EventSink>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl CodeRunner {
    pub fn new(settings: RunnerSettings, sink: Arc<dyn EventSink>) -> Self {
        Self {
            settings,
            sink,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Arguments passed after the configured leading `args`.
    pub fn build_args(&self, request: &RunRequest) -> Vec<String> {
        let mut args = Vec::new();
        if request.continue_session {
            args.push("--continue".to_string());
        }
        args.push("-p".to_string());
        args.push(format!("{}{}", request.task, status_instructions()));
        args.extend(
            ["--output-format", "stream-json", "--verbose"]
                .iter()
                .map(|s| s.to_string()),
        );
        if request.planning {
            args.extend(["--permission-mode".to_string(), "plan".to_string()]);
        } else if self.settings.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        args
    }

    /// Run the tool to completion or timeout.
    pub async fn run(&self, request: &RunRequest) -> Result<RunOutcome, RunnerError> {
        if !request.working_dir.is_dir() {
            return Err(RunnerError::MissingWorkingDir {
                path: request.working_dir.clone(),
            });
        }

        let command = self.settings.command.clone();
        let mut child = Command::new(&command)
            .args(&self.settings.args)
            .args(self.build_args(request))
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::SpawnFailed {
                command: command.clone(),
                source,
            })?;

        info!(
            job_id = %request.job_id,
            command = %command,
            planning = request.planning,
            "Started code tool"
        );

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(64);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, chunk_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, chunk_tx.clone()));
        }
        drop(chunk_tx);

        let mut translator = Translator::new(request.job_id.clone(), self.sink.clone())
            .suppress_notifications(request.planning);
        if let Some(notifier) = &self.notifier {
            translator = translator.with_notifier(notifier.clone());
        }

        let deadline = tokio::time::sleep(self.settings.timeout());
        tokio::pin!(deadline);
        let mut timed_out = false;

        loop {
            tokio::select! {
                chunk = chunk_rx.recv() => match chunk {
                    Some(chunk) => translator.feed(&chunk),
                    None => break,
                },
                _ = &mut deadline => {
                    if timed_out {
                        warn!(job_id = %request.job_id, "Output still open after kill, giving up on drain");
                        break;
                    }
                    timed_out = true;
                    warn!(
                        job_id = %request.job_id,
                        timeout_secs = self.settings.timeout_secs,
                        "Code tool timed out, killing"
                    );
                    if let Err(e) = child.start_kill() {
                        warn!(job_id = %request.job_id, error = %e, "Failed to kill code tool");
                    }
                    deadline.as_mut().reset(tokio::time::Instant::now() + DRAIN_GRACE);
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|source| RunnerError::WaitFailed { command, source })?;

        let output = translator.finish();
        debug!(
            job_id = %request.job_id,
            exit_code = ?status.code(),
            terminal = output.terminal_state.is_some(),
            "Code tool exited"
        );

        Ok(RunOutcome {
            output: output.output(),
            raw_excerpt: output.raw_excerpt(RAW_EXCERPT_LEN),
            terminal_state: output.terminal_state,
            result_text: output.result_text,
            usage: output.usage,
            exit_code: status.code(),
            timed_out,
        })
    }
}

/// Forward everything `reader` yields as chunks until EOF.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Output pipe read failed");
                break;
            }
        }
    }
}

/// Whether the git working tree at `dir` has uncommitted changes.
pub async fn git_has_changes(dir: &Path) -> Result<bool, RunnerError> {
    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| RunnerError::GitStatus(e.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RunnerError::GitStatus(stderr.trim().to_string()));
    }
    Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
}

/// Final state of a job after [`run_job`].
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub status: JobStatus,
    /// `completed`, `needs_information` or `error`
    pub detail: String,
    pub message: String,
    pub run: Option<RunOutcome>,
}

/// Run one job end-to-end, emitting its lifecycle events on `sink`.
///
/// Every path ends with exactly one `job_completed` or `job_error` event.
/// Spawn failures are reported as a `job_error` and returned as `Err`.
pub async fn run_job(
    runner: &CodeRunner,
    sink: &dyn EventSink,
    request: &RunRequest,
) -> Result<JobOutcome, RunnerError> {
    let job_id = request.job_id.as_str();
    let started = Instant::now();

    sink.emit(
        job_id,
        EventType::JobStarted,
        data(json!({
            "task": request.task,
            "working_dir": request.working_dir.display().to_string(),
            "planning": request.planning,
        })),
    );
    sink.emit(
        job_id,
        EventType::ToolStarted,
        data(json!({
            "tool_name": RUNNER_TOOL_NAME,
            "input": {
                "task": request.task,
                "planning": request.planning,
                "continue_session": request.continue_session,
            },
        })),
    );

    let tool_started = Instant::now();
    let run = match runner.run(request).await {
        Ok(run) => run,
        Err(e) => {
            let duration_ms = tool_started.elapsed().as_millis() as u64;
            sink.emit(
                job_id,
                EventType::ToolCompleted,
                data(json!({
                    "tool_name": RUNNER_TOOL_NAME,
                    "is_error": true,
                    "result_preview": e.to_string(),
                    "duration_ms": duration_ms,
                })),
            );
            sink.emit(
                job_id,
                EventType::JobError,
                data(json!({
                    "error": e.to_string(),
                    "status": "error",
                    "total_duration_ms": started.elapsed().as_millis() as u64,
                })),
            );
            return Err(e);
        }
    };

    sink.emit(
        job_id,
        EventType::ToolCompleted,
        data(json!({
            "tool_name": RUNNER_TOOL_NAME,
            "is_error": !run.succeeded(),
            "result_preview": truncate(run.output.trim(), RESULT_PREVIEW_LEN),
            "duration_ms": tool_started.elapsed().as_millis() as u64,
        })),
    );
    if let Some(usage) = &run.usage {
        sink.emit(job_id, EventType::LlmResponse, usage.to_event_data());
    }

    let (status, detail, message) = decide_outcome(runner, request, &run).await;
    let total_duration_ms = started.elapsed().as_millis() as u64;
    let total_cost_usd = run.usage.as_ref().map(|u| u.cost_usd);

    match status {
        JobStatus::Error => {
            warn!(job_id = %job_id, error = %message, "Job failed");
            sink.emit(
                job_id,
                EventType::JobError,
                data(json!({
                    "error": message,
                    "status": detail,
                    "total_duration_ms": total_duration_ms,
                    "total_cost_usd": total_cost_usd,
                })),
            );
        }
        _ => {
            info!(job_id = %job_id, status = %detail, "Job completed");
            sink.emit(
                job_id,
                EventType::JobCompleted,
                data(json!({
                    "final_response": message,
                    "status": detail,
                    "total_duration_ms": total_duration_ms,
                    "total_cost_usd": total_cost_usd,
                })),
            );
        }
    }

    Ok(JobOutcome {
        job_id: job_id.to_string(),
        status,
        detail: detail.to_string(),
        message,
        run: Some(run),
    })
}

/// Map a finished run onto the job's final status.
async fn decide_outcome(
    runner: &CodeRunner,
    request: &RunRequest,
    run: &RunOutcome,
) -> (JobStatus, &'static str, String) {
    if run.timed_out {
        let message = format!(
            "{} timed out after {}s: {}",
            runner.settings().command,
            runner.settings().timeout_secs,
            run.raw_excerpt
        );
        return (JobStatus::Error, "error", message);
    }

    if let Some(state) = &run.terminal_state {
        let message = if state.message.is_empty() {
            run.output.clone()
        } else {
            state.message.clone()
        };
        let status = match state.status {
            TerminalStatus::Completed | TerminalStatus::NeedsInformation => JobStatus::Completed,
            TerminalStatus::Error => JobStatus::Error,
        };
        return (status, state.status.as_str(), message);
    }

    if !run.succeeded() {
        let code = run
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let message = format!(
            "{} failed (exit {}): {}",
            runner.settings().command,
            code,
            run.raw_excerpt
        );
        return (JobStatus::Error, "error", message);
    }

    // No Terminal State: judge by whether the working tree changed.
    debug!(job_id = %request.job_id, "No terminal state, checking git status");
    match git_has_changes(&request.working_dir).await {
        Ok(true) => (JobStatus::Completed, "completed", run.output.clone()),
        Ok(false) => (
            JobStatus::Error,
            "error",
            "No changes were made.".to_string(),
        ),
        Err(e) => (JobStatus::Error, "error", e.to_string()),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::monitor::hub::testing::RecordingSink;
    use tempfile::TempDir;

    /// Runner whose "tool" is an inline shell script; generated arguments
    /// become the script's positional parameters.
    fn script_runner(script: &str, timeout_secs: u64, sink: Arc<RecordingSink>) -> CodeRunner {
        let settings = RunnerSettings {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "fake-claude".to_string()],
            timeout_secs,
            skip_permissions: true,
        };
        CodeRunner::new(settings, sink)
    }

    fn event_types(sink: &RecordingSink) -> Vec<EventType> {
        sink.events().into_iter().map(|(_, t, _)| t).collect()
    }

    #[test]
    fn test_build_args_default() {
        let runner = CodeRunner::new(RunnerSettings::default(), Arc::new(RecordingSink::default()));
        let args = runner.build_args(&RunRequest::new("j", "Fix the bug", "."));
        assert_eq!(args[0], "-p");
        assert!(args[1].starts_with("Fix the bug"));
        assert!(args[1].contains("FOREMAN_STATUS:"));
        assert_eq!(
            &args[2..],
            &["--output-format", "stream-json", "--verbose", "--dangerously-skip-permissions"]
        );
    }

    #[test]
    fn test_build_args_planning_and_continue() {
        let runner = CodeRunner::new(RunnerSettings::default(), Arc::new(RecordingSink::default()));
        let mut request = RunRequest::new("j", "Plan it", ".");
        request.planning = true;
        request.continue_session = true;
        let args = runner.build_args(&request);
        assert_eq!(args[0], "--continue");
        assert!(args.ends_with(&["--permission-mode".to_string(), "plan".to_string()]));
        assert!(!args.contains(&"--dangerously-skip-permissions".to_string()));
    }

    #[test]
    fn test_build_args_without_skip_permissions() {
        let settings = RunnerSettings {
            skip_permissions: false,
            ..RunnerSettings::default()
        };
        let runner = CodeRunner::new(settings, Arc::new(RecordingSink::default()));
        let args = runner.build_args(&RunRequest::new("j", "t", "."));
        assert!(!args.contains(&"--dangerously-skip-permissions".to_string()));
    }

    #[tokio::test]
    async fn test_run_merges_stdout_and_stderr() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let runner = script_runner(
            r#"printf '%s\n' '{"type":"system","subtype":"init"}'
echo 'warning from stderr' >&2
printf '%s\n' '{"type":"result","result":"Done.\nFOREMAN_STATUS: {\"status\":\"completed\",\"message\":\"ok\"}","total_cost_usd":0.3}'"#,
            30,
            sink.clone(),
        );

        let outcome = runner
            .run(&RunRequest::new("job-1", "task", dir.path()))
            .await
            .unwrap();

        assert!(outcome.succeeded());
        assert_eq!(outcome.result_text.lines().next(), Some("Done."));
        assert_eq!(
            outcome.terminal_state.map(|s| s.status),
            Some(TerminalStatus::Completed)
        );
        assert_eq!(outcome.usage.map(|u| u.cost_usd), Some(0.3));
        let texts = sink.texts();
        assert!(texts.contains(&"warning from stderr".to_string()));
        assert!(texts.contains(&"Done.".to_string()));
    }

    #[tokio::test]
    async fn test_run_timeout_kills_and_keeps_output() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let runner = script_runner("echo started; exec sleep 30", 1, sink.clone());

        let outcome = runner
            .run(&RunRequest::new("job-1", "task", dir.path()))
            .await
            .unwrap();

        assert!(outcome.timed_out);
        assert!(!outcome.succeeded());
        assert!(outcome.terminal_state.is_none());
        assert_eq!(sink.texts(), vec!["started"]);
    }

    #[tokio::test]
    async fn test_run_missing_working_dir() {
        let dir = TempDir::new().unwrap();
        let runner = script_runner("true", 5, Arc::new(RecordingSink::default()));
        let err = runner
            .run(&RunRequest::new("job-1", "task", dir.path().join("missing")))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::MissingWorkingDir { .. }));
    }

    #[tokio::test]
    async fn test_run_job_spawn_failure_emits_job_error() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let settings = RunnerSettings {
            command: dir.path().join("no-such-tool").display().to_string(),
            ..RunnerSettings::default()
        };
        let runner = CodeRunner::new(settings, sink.clone());

        let err = run_job(&runner, sink.as_ref(), &RunRequest::new("job-1", "task", dir.path()))
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::SpawnFailed { .. }));
        assert_eq!(
            event_types(&sink),
            vec![
                EventType::JobStarted,
                EventType::ToolStarted,
                EventType::ToolCompleted,
                EventType::JobError,
            ]
        );
    }

    #[tokio::test]
    async fn test_run_job_terminal_state_completes() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let runner = script_runner(
            r#"printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"FOREMAN_STATUS: {\"status\":\"completed\",\"message\":\"Fixed it\"}"}]}}'
printf '%s\n' '{"type":"result","result":"Fixed it","total_cost_usd":0.42,"usage":{"input_tokens":7,"output_tokens":3}}'"#,
            30,
            sink.clone(),
        );

        let outcome = run_job(&runner, sink.as_ref(), &RunRequest::new("job-1", "fix bug", dir.path()))
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.detail, "completed");
        assert_eq!(outcome.message, "Fixed it");

        let events = sink.events();
        assert_eq!(events.first().unwrap().1, EventType::JobStarted);
        assert_eq!(events.first().unwrap().2["task"], "fix bug");
        let usage = events
            .iter()
            .find(|(_, t, _)| *t == EventType::LlmResponse)
            .unwrap();
        assert_eq!(usage.2["input_tokens"], 7);
        let (_, last_type, last) = events.last().unwrap();
        assert_eq!(*last_type, EventType::JobCompleted);
        assert_eq!(last["total_cost_usd"], 0.42);
        assert_eq!(last["final_response"], "Fixed it");
    }

    #[tokio::test]
    async fn test_run_job_needs_information_is_completed() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let runner = script_runner(
            r#"printf '%s\n' '{"type":"result","result":"FOREMAN_STATUS: {\"status\":\"needs_information\",\"message\":\"Which table?\"}"}'"#,
            30,
            sink.clone(),
        );

        let outcome = run_job(&runner, sink.as_ref(), &RunRequest::new("job-1", "t", dir.path()))
            .await
            .unwrap();
        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.detail, "needs_information");
        let (_, _, last) = sink.events().pop().unwrap();
        assert_eq!(last["status"], "needs_information");
    }

    #[tokio::test]
    async fn test_run_job_reported_error() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let runner = script_runner(
            r#"printf '%s\n' '{"type":"result","result":"FOREMAN_STATUS: {\"status\":\"error\",\"message\":\"Repo is read-only\"}"}'"#,
            30,
            sink.clone(),
        );
        let outcome = run_job(&runner, sink.as_ref(), &RunRequest::new("job-1", "t", dir.path()))
            .await
            .unwrap();
        assert_eq!(outcome.status, JobStatus::Error);
        assert_eq!(outcome.message, "Repo is read-only");
        assert_eq!(sink.events().last().unwrap().1, EventType::JobError);
    }

    #[tokio::test]
    async fn test_run_job_nonzero_exit_without_status_is_error() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let runner = script_runner("echo 'fatal: auth' >&2; exit 3", 30, sink.clone());
        let outcome = run_job(&runner, sink.as_ref(), &RunRequest::new("job-1", "t", dir.path()))
            .await
            .unwrap();
        assert_eq!(outcome.status, JobStatus::Error);
        assert!(outcome.message.contains("exit 3"));
        assert!(outcome.message.contains("fatal: auth"));
    }

    #[tokio::test]
    async fn test_run_job_without_status_with_git_changes_completes() {
        let dir = TempDir::new().unwrap();
        let init = std::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        assert!(init.success());
        std::fs::write(dir.path().join("fix.rs"), "fn main() {}\n").unwrap();

        let sink = Arc::new(RecordingSink::default());
        let runner = script_runner(r#"printf '%s\n' '{"type":"result","result":"I did things"}'"#, 30, sink.clone());
        let outcome = run_job(&runner, sink.as_ref(), &RunRequest::new("job-1", "t", dir.path()))
            .await
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.detail, "completed");
        assert_eq!(outcome.message, "I did things");
        let (_, last_type, last_data) = sink.events().pop().unwrap();
        assert_eq!(last_type, EventType::JobCompleted);
        assert_eq!(last_data["final_response"], "I did things");
    }

    #[tokio::test]
    async fn test_run_job_without_status_outside_git_is_error() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let runner = script_runner(r#"printf '%s\n' '{"type":"result","result":"I did things"}'"#, 30, sink.clone());
        let outcome = run_job(&runner, sink.as_ref(), &RunRequest::new("job-1", "t", dir.path()))
            .await
            .unwrap();
        // Neither a status line nor a readable working tree: the job failed.
        assert_eq!(outcome.status, JobStatus::Error);
        assert_eq!(sink.events().last().unwrap().1, EventType::JobError);
    }
}
