//! Configuration for Foreman, read from `.foreman/foreman.toml`.
//!
//! Settings are layered: file, then environment, then CLI flags (applied by
//! the command handlers). A missing file means defaults.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! public_url = "https://foreman.example.com"
//!
//! [store]
//! data_dir = ".foreman/jobs"
//!
//! [hub]
//! ingest_capacity = 4096
//! subscriber_capacity = 64
//!
//! [runner]
//! command = "claude"
//! args = []
//! timeout_secs = 900
//! skip_permissions = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::monitor::HubConfig;
use crate::monitor::hub::{DEFAULT_INGEST_CAPACITY, DEFAULT_SUBSCRIBER_CAPACITY};

/// Directory holding Foreman's config and default data.
pub const FOREMAN_DIR: &str = ".foreman";

/// Config file name inside [`FOREMAN_DIR`].
pub const CONFIG_FILE: &str = "foreman.toml";

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally reachable base URL, used for links in notifications
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Directory holding one `<job_id>.jsonl` per job
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(FOREMAN_DIR).join("jobs")
}

/// Queue bounds of the event hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubSettings {
    #[serde(default = "default_ingest_capacity")]
    pub ingest_capacity: usize,
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            ingest_capacity: default_ingest_capacity(),
            subscriber_capacity: default_subscriber_capacity(),
        }
    }
}

impl HubSettings {
    pub fn to_hub_config(&self) -> HubConfig {
        HubConfig {
            ingest_capacity: self.ingest_capacity,
            subscriber_capacity: self.subscriber_capacity,
        }
    }
}

fn default_ingest_capacity() -> usize {
    DEFAULT_INGEST_CAPACITY
}

fn default_subscriber_capacity() -> usize {
    DEFAULT_SUBSCRIBER_CAPACITY
}

/// How the external code tool is invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Executable name or path (default: "claude")
    #[serde(default = "default_command")]
    pub command: String,
    /// Leading arguments placed before the generated ones, for wrappers
    #[serde(default)]
    pub args: Vec<String>,
    /// Wall-clock limit for one run
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_skip_permissions")]
    pub skip_permissions: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            timeout_secs: default_timeout_secs(),
            skip_permissions: default_skip_permissions(),
        }
    }
}

impl RunnerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_command() -> String {
    "claude".to_string()
}

fn default_timeout_secs() -> u64 {
    900
}

fn default_skip_permissions() -> bool {
    true
}

/// Contents of `foreman.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForemanConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub hub: HubSettings,
    #[serde(default)]
    pub runner: RunnerSettings,
}

impl ForemanConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` if given, else `.foreman/foreman.toml` under `project_dir`
    /// when it exists, else defaults. An explicit path must exist.
    pub fn load_or_default(project_dir: &Path, path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default_path = project_dir.join(FOREMAN_DIR).join(CONFIG_FILE);
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `FOREMAN_*` and `CLAUDE_CMD` overrides from the process
    /// environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("FOREMAN_DATA_DIR") {
            self.store.data_dir = PathBuf::from(dir);
        }
        if let Some(host) = get("FOREMAN_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("FOREMAN_PORT") {
            self.server.port = parse_env("FOREMAN_PORT", &port)?;
        }
        if let Some(url) = get("FOREMAN_PUBLIC_URL") {
            self.server.public_url = Some(url);
        }
        if let Some(cmd) = get("CLAUDE_CMD") {
            self.runner.command = cmd;
        }
        if let Some(secs) = get("FOREMAN_TIMEOUT_SECS") {
            self.runner.timeout_secs = parse_env("FOREMAN_TIMEOUT_SECS", &secs)?;
        }
        Ok(())
    }

    /// Check the settings that would break the hub or runner.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |key: &str, value: u64| {
            if value == 0 {
                Err(ConfigError::Invalid {
                    key: key.to_string(),
                    message: "must be greater than zero".to_string(),
                })
            } else {
                Ok(())
            }
        };
        positive("hub.ingest_capacity", self.hub.ingest_capacity as u64)?;
        positive("hub.subscriber_capacity", self.hub.subscriber_capacity as u64)?;
        positive("runner.timeout_secs", self.runner.timeout_secs)?;
        if self.runner.command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "runner.command".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        message: format!("'{}': {}", value, e),
    })
}
