//! Configuration errors. Any of these prevents the daemon from starting.

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no endpoint registry configured")]
    MissingRegistry,

    #[error("endpoint registry does not include any valid nodes")]
    EmptyRegistry,

    #[error("failed to parse {what}: {reason}")]
    Parse { what: &'static str, reason: String },

    #[error("invalid schedule expression {expr:?}: {reason}")]
    InvalidSchedule { expr: String, reason: String },

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}
