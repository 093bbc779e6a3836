//! rpcwatch.toml configuration parser.
//!
//! ```toml
//! schedule = "*/10 * * * *"
//! max_entries = 1008
//! request_timeout = "10s"
//! probe_delay = "1s"
//! data_file = "rpc_status.json"
//!
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//!
//! [alert]
//! webhook_url = "https://open.larksuite.com/open-apis/bot/v2/hook/..."
//!
//! [[endpoints.eth]]
//! name = "public"
//! target = "https://ethereum-rpc.publicnode.com"
//! ```
//!
//! Every field has a default except the endpoint registry. The daemon layers
//! environment variables and CLI flags on top of the parsed file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::registry::Registry;
use crate::schedule::CronSchedule;

pub const DEFAULT_SCHEDULE: &str = "*/10 * * * *";
pub const DEFAULT_MAX_ENTRIES: usize = 1008;

/// Fewest samples per endpoint that keep alerts edge-triggered. Shorter
/// histories lose the sample before a failure streak, so every consecutive
/// error alerts again.
pub const MIN_ALERT_HISTORY: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Cron expression driving sweeps.
    pub schedule: String,
    /// History length kept per endpoint.
    pub max_entries: usize,
    /// Per-probe timeout (e.g. "10s").
    pub request_timeout: String,
    /// Pause after each probe within a sweep (e.g. "1s").
    pub probe_delay: String,
    /// Where the status snapshot is persisted.
    pub data_file: PathBuf,
    pub server: ServerConfig,
    pub alert: AlertConfig,
    /// Raw registry document, validated by [`Registry::from_value`].
    pub endpoints: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Lark/Feishu bot webhook. Alerts are only logged when unset.
    pub webhook_url: Option<String>,
    /// Delivery timeout (e.g. "10s"). Defaults to the request timeout.
    pub timeout: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            schedule: DEFAULT_SCHEDULE.to_string(),
            max_entries: DEFAULT_MAX_ENTRIES,
            request_timeout: "10s".to_string(),
            probe_delay: "1s".to_string(),
            data_file: PathBuf::from("rpc_status.json"),
            server: ServerConfig::default(),
            alert: AlertConfig::default(),
            endpoints: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl MonitorConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            what: "config file",
            reason: e.to_string(),
        })
    }

    /// Replace the registry with a JSON document (e.g. from `RPC_LIST_JSON`).
    pub fn set_registry_json(&mut self, raw: &str) -> ConfigResult<()> {
        let value = serde_json::from_str(raw).map_err(|e| ConfigError::Parse {
            what: "endpoint registry",
            reason: e.to_string(),
        })?;
        self.endpoints = Some(value);
        Ok(())
    }

    /// Validate and build the endpoint registry.
    pub fn registry(&self) -> ConfigResult<Registry> {
        let value = self.endpoints.as_ref().ok_or(ConfigError::MissingRegistry)?;
        Registry::from_value(value)
    }

    pub fn cron(&self) -> ConfigResult<CronSchedule> {
        CronSchedule::parse(&self.schedule)
    }

    pub fn request_timeout(&self) -> ConfigResult<Duration> {
        duration_field("request_timeout", &self.request_timeout)
    }

    pub fn probe_delay(&self) -> ConfigResult<Duration> {
        duration_field("probe_delay", &self.probe_delay)
    }

    /// Whether `max_entries` is too small for alerts to fire only once per
    /// failure streak.
    pub fn history_too_short_for_alerts(&self) -> bool {
        self.max_entries < MIN_ALERT_HISTORY
    }

    pub fn alert_timeout(&self) -> ConfigResult<Duration> {
        match &self.alert.timeout {
            Some(raw) => duration_field("alert.timeout", raw),
            None => self.request_timeout(),
        }
    }
}

fn duration_field(field: &'static str, raw: &str) -> ConfigResult<Duration> {
    parse_duration(raw).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: raw.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "1m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
