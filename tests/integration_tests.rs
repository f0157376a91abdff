//! Integration tests for Foreman
//!
//! These drive the `foreman` binary against temporary job log directories.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const ENV_OVERRIDES: &[&str] = &[
    "FOREMAN_DATA_DIR",
    "FOREMAN_PORT",
    "FOREMAN_HOST",
    "FOREMAN_PUBLIC_URL",
    "FOREMAN_TIMEOUT_SECS",
    "CLAUDE_CMD",
    "RUST_LOG",
];

/// Helper to create a foreman Command isolated from the caller's environment
fn foreman(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("foreman");
    cmd.current_dir(dir.path());
    for key in ENV_OVERRIDES {
        cmd.env_remove(key);
    }
    cmd
}

fn write_job(data_dir: &Path, job_id: &str, lines: &[&str]) {
    fs::create_dir_all(data_dir).unwrap();
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(data_dir.join(format!("{job_id}.jsonl")), content).unwrap();
}

/// A completed job and a running one, one day apart.
fn seed_jobs(dir: &TempDir) -> std::path::PathBuf {
    let data_dir = dir.path().join("jobs");
    write_job(
        &data_dir,
        "job-1",
        &[
            r#"{"id":"1","job_id":"job-1","type":"job_started","timestamp":"2026-01-01T10:00:00Z","data":{"task":"fix bug"}}"#,
            r#"{"id":"2","job_id":"job-1","type":"llm_response","timestamp":"2026-01-01T10:01:00Z","data":{"cost_usd":0.1,"input_tokens":100,"output_tokens":40}}"#,
            r#"{"id":"3","job_id":"job-1","type":"job_completed","timestamp":"2026-01-01T10:02:00Z","data":{"final_response":"Fixed","total_cost_usd":0.42}}"#,
        ],
    );
    write_job(
        &data_dir,
        "job-2",
        &[
            r#"{"id":"4","job_id":"job-2","type":"job_started","timestamp":"2026-01-02T10:00:00Z","data":{"task":"add feature"}}"#,
            r#"{"id":"5","job_id":"job-2","type":"process_output_line","timestamp":"2026-01-02T10:00:01Z","data":{"kind":"text","text":"Reading the code"}}"#,
            "{\"id\":\"6\",\"job_id\":\"job-2\",\"type\":\"proc",
        ],
    );
    data_dir
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_foreman_help() {
        let dir = TempDir::new().unwrap();
        foreman(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("exec"));
    }

    #[test]
    fn test_foreman_version() {
        let dir = TempDir::new().unwrap();
        foreman(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("foreman"));
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".foreman")).unwrap();
        fs::write(
            dir.path().join(".foreman/foreman.toml"),
            "[hub]\ningest_capacity = 0\n",
        )
        .unwrap();
        foreman(&dir)
            .args(["serve", "--port", "0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("hub.ingest_capacity"));
    }
}

// =============================================================================
// Read commands
// =============================================================================

mod read_commands {
    use super::*;

    #[test]
    fn test_jobs_empty_store() {
        let dir = TempDir::new().unwrap();
        foreman(&dir)
            .args(["--data-dir", "missing", "jobs"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No jobs found"));
    }

    #[test]
    fn test_jobs_json_lists_most_recent_first() {
        let dir = TempDir::new().unwrap();
        let data_dir = seed_jobs(&dir);

        let output = foreman(&dir)
            .arg("--data-dir")
            .arg(&data_dir)
            .args(["jobs", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let jobs: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let jobs = jobs.as_array().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0]["id"], "job-2");
        assert_eq!(jobs[0]["status"], "running");
        assert_eq!(jobs[1]["id"], "job-1");
        assert_eq!(jobs[1]["status"], "completed");
        assert_eq!(jobs[1]["task"], "fix bug");
        assert_eq!(jobs[1]["cost_usd"], 0.42);
    }

    #[test]
    fn test_jobs_table() {
        let dir = TempDir::new().unwrap();
        let data_dir = seed_jobs(&dir);
        foreman(&dir)
            .arg("--data-dir")
            .arg(&data_dir)
            .arg("jobs")
            .assert()
            .success()
            .stdout(predicate::str::contains("job-1"))
            .stdout(predicate::str::contains("add feature"));
    }

    #[test]
    fn test_show_skips_corrupt_trailing_line() {
        let dir = TempDir::new().unwrap();
        let data_dir = seed_jobs(&dir);

        let output = foreman(&dir)
            .arg("--data-dir")
            .arg(&data_dir)
            .args(["show", "job-2", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let events: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(events.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_show_text_output() {
        let dir = TempDir::new().unwrap();
        let data_dir = seed_jobs(&dir);
        foreman(&dir)
            .arg("--data-dir")
            .arg(&data_dir)
            .args(["show", "job-1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("job_started"))
            .stdout(predicate::str::contains("fix bug"))
            .stdout(predicate::str::contains("Fixed"));
    }

    #[test]
    fn test_show_unknown_job_fails() {
        let dir = TempDir::new().unwrap();
        let data_dir = seed_jobs(&dir);
        foreman(&dir)
            .arg("--data-dir")
            .arg(&data_dir)
            .args(["show", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not found"));
    }

    #[test]
    fn test_stats_json() {
        let dir = TempDir::new().unwrap();
        let data_dir = seed_jobs(&dir);

        let output = foreman(&dir)
            .arg("--data-dir")
            .arg(&data_dir)
            .args(["stats", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(stats["total_jobs"], 2);
        assert_eq!(stats["completed_jobs"], 1);
        assert_eq!(stats["running_jobs"], 1);
        assert_eq!(stats["total_input_tokens"], 100);
        assert_eq!(stats["total_output_tokens"], 40);
    }

    #[test]
    fn test_data_dir_from_environment() {
        let dir = TempDir::new().unwrap();
        let data_dir = seed_jobs(&dir);
        foreman(&dir)
            .env("FOREMAN_DATA_DIR", &data_dir)
            .args(["stats", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"total_jobs\": 2"));
    }
}

// =============================================================================
// Exec
// =============================================================================

#[cfg(unix)]
mod exec {
    use super::*;

    /// Config whose code tool is a shell script printing stream-json.
    fn write_fake_tool_config(dir: &TempDir, script: &str) {
        #[derive(serde::Serialize)]
        struct Runner<'a> {
            command: &'a str,
            args: Vec<&'a str>,
            timeout_secs: u64,
        }
        #[derive(serde::Serialize)]
        struct Config<'a> {
            runner: Runner<'a>,
        }
        let config = Config {
            runner: Runner {
                command: "sh",
                args: vec!["-c", script, "fake-claude"],
                timeout_secs: 30,
            },
        };
        fs::create_dir_all(dir.path().join(".foreman")).unwrap();
        fs::write(
            dir.path().join(".foreman/foreman.toml"),
            toml::to_string(&config).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_exec_records_completed_job() {
        let dir = TempDir::new().unwrap();
        write_fake_tool_config(
            &dir,
            r#"printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"Working on it"}]}}'
printf '%s\n' '{"type":"result","result":"Done\nFOREMAN_STATUS: {\"status\":\"completed\",\"message\":\"Fixed the bug\"}","total_cost_usd":0.25}'"#,
        );

        foreman(&dir)
            .args(["exec", "--job", "job-7", "fix the bug"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Fixed the bug"));

        let output = foreman(&dir)
            .args(["show", "job-7", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let events: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();
        let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(types.first(), Some(&"job_started"));
        assert_eq!(types.last(), Some(&"job_completed"));
        assert!(types.contains(&"process_output_line"));
        assert!(types.contains(&"slack_notification"));
        assert!(types.contains(&"llm_response"));
        assert_eq!(events[0]["data"]["task"], "fix the bug");

        let output = foreman(&dir).args(["jobs", "--json"]).output().unwrap();
        let jobs: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(jobs[0]["status"], "completed");
        assert_eq!(jobs[0]["cost_usd"], 0.25);
    }

    #[test]
    fn test_exec_reported_error_exits_nonzero() {
        let dir = TempDir::new().unwrap();
        write_fake_tool_config(
            &dir,
            r#"printf '%s\n' '{"type":"result","result":"FOREMAN_STATUS: {\"status\":\"error\",\"message\":\"Cannot push\"}"}'"#,
        );

        foreman(&dir)
            .args(["exec", "--job", "job-8", "push it"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("Cannot push"));
    }

    #[test]
    fn test_failed_exec_flushes_log_file() {
        let dir = TempDir::new().unwrap();
        write_fake_tool_config(
            &dir,
            r#"printf '%s\n' '{"type":"result","result":"FOREMAN_STATUS: {\"status\":\"error\",\"message\":\"Cannot push\"}"}'"#,
        );

        foreman(&dir)
            .args(["--log-dir", "logs", "exec", "--job", "job-9", "push it"])
            .assert()
            .failure();

        let logs: String = fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .map(|entry| fs::read_to_string(entry.unwrap().path()).unwrap())
            .collect();
        assert!(logs.contains("Job failed"), "log file missing final lines: {logs}");
    }
}
