//! CLI command implementations.
//!
//! | Module  | Commands handled          |
//! |---------|---------------------------|
//! | `serve` | `Serve`                   |
//! | `exec`  | `Exec`                    |
//! | `jobs`  | `Jobs`, `Show`, `Stats`   |

use std::sync::Arc;

use foreman::config::ForemanConfig;
use foreman::monitor::{EventSink, Hub};
use foreman::notify::HubNotifier;
use foreman::runner::CodeRunner;

pub mod exec;
pub mod jobs;
pub mod serve;

pub use exec::{ExecArgs, cmd_exec};
pub use jobs::{cmd_jobs, cmd_show, cmd_stats};
pub use serve::cmd_serve;

/// Runner whose events and notifications go to `hub`.
pub fn job_runner(config: &ForemanConfig, hub: &Hub) -> CodeRunner {
    let sink: Arc<dyn EventSink> = Arc::new(hub.clone());
    let notifier = HubNotifier::new(sink.clone()).with_public_url(config.server.public_url.clone());
    CodeRunner::new(config.runner.clone(), sink).with_notifier(Arc::new(notifier))
}
