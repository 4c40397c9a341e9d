pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod monitor;
pub mod mqtt;
pub mod poll;
pub mod telemetry;

// Re-export commonly used items
pub use config::Config;
pub use error::{AppError, Result};
pub use monitor::{Freshness, Monitor, MonitorStatus, SystemSnapshot};
