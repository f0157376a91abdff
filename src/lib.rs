pub mod config;
pub mod errors;
pub mod logging;
pub mod monitor;
pub mod notify;
pub mod runner;
pub mod stream;
pub mod util;
