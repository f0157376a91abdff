//! Monitor server command: `foreman serve`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use foreman::config::ForemanConfig;
use foreman::monitor::api::AppState;
use foreman::monitor::server::{ServerConfig, start_server};
use foreman::monitor::{Hub, JobLogStore};

use super::job_runner;

/// Jobs submitted over HTTP run in this process on the server's own hub,
/// so `/events` and `/ws` observers see them live.
pub async fn cmd_serve(config: &ForemanConfig, dev: bool, work_dir: PathBuf) -> Result<()> {
    let store = JobLogStore::new(&config.store.data_dir);
    let hub = Hub::start(store, config.hub.to_hub_config()).context("Failed to start event hub")?;
    let runner = job_runner(config, &hub);

    start_server(
        ServerConfig {
            host: config.server.host.clone(),
            port: config.server.port,
            dev_mode: dev,
        },
        Arc::new(AppState::new(hub, runner, work_dir)),
    )
    .await
}
