//! Typed error hierarchy for Foreman.
//!
//! Three top-level enums cover the three fallible subsystems:
//! - `StoreError`: job log reads (history, list, stats)
//! - `RunnerError`: spawning and driving the external code tool
//! - `ConfigError`: loading and validating `foreman.toml`
//!
//! The hub write path and the translator have no error type: their faults
//! are logged and swallowed so monitoring never disturbs the job it observes.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from reading the job log store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job {job_id} not found")]
    NotFound { job_id: String },

    #[error("Invalid job id '{job_id}'")]
    InvalidJobId { job_id: String },

    #[error("Failed to read job log at {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from running the external code tool.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Working directory {path} does not exist")]
    MissingWorkingDir { path: PathBuf },

    #[error("Failed to wait for {command}: {source}")]
    WaitFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git status failed: {0}")]
    GitStatus(String),
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}
