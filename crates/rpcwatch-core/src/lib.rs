//! rpcwatch-core — configuration and registry types shared by every
//! rpcwatch crate.
//!
//! - [`MonitorConfig`]: the static settings loaded once at startup
//! - [`Registry`]: the validated list of RPC endpoints to probe
//! - [`CronSchedule`]: the sweep cadence

pub mod config;
pub mod error;
pub mod registry;
pub mod schedule;

pub use config::{AlertConfig, MonitorConfig, ServerConfig, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use registry::{Endpoint, Registry};
pub use schedule::{CronSchedule, interval_minutes};
