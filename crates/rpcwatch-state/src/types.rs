//! Probe outcome types shared by the store, the scheduler, and the API.
//!
//! A status is stored and served as a bare JSON value: an integer for a
//! successful probe (the observed block height) or a string label for a
//! failure. The label `"timeout"` is reserved for probes that did not
//! answer in time.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Label recorded when a probe exceeds its timeout.
pub const TIMEOUT_LABEL: &str = "timeout";

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// The endpoint answered with this chain height.
    Height(u64),
    /// No answer within the probe timeout.
    Timeout,
    /// Any other failure, already normalized into a short label.
    Error(String),
}

impl Status {
    /// Whether this sample counts as a failure for alerting.
    pub fn is_error(&self) -> bool {
        !matches!(self, Status::Height(_))
    }

    pub fn height(&self) -> Option<u64> {
        match self {
            Status::Height(h) => Some(*h),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Height(h) => write!(f, "{h}"),
            Status::Timeout => f.write_str(TIMEOUT_LABEL),
            Status::Error(label) => f.write_str(label),
        }
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Status::Height(h) => serializer.serialize_u64(*h),
            Status::Timeout => serializer.serialize_str(TIMEOUT_LABEL),
            Status::Error(label) => serializer.serialize_str(label),
        }
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(StatusVisitor)
    }
}

struct StatusVisitor;

impl Visitor<'_> for StatusVisitor {
    type Value = Status;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative block height or an error label")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Status, E> {
        Ok(Status::Height(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Status, E> {
        u64::try_from(v)
            .map(Status::Height)
            .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Status, E> {
        // Heights written by other tools may come back as whole floats.
        if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64 {
            Ok(Status::Height(v as u64))
        } else {
            Err(E::invalid_value(de::Unexpected::Float(v), &self))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Status, E> {
        Ok(if v == TIMEOUT_LABEL {
            Status::Timeout
        } else {
            Status::Error(v.to_string())
        })
    }
}

/// One timestamped probe outcome for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix timestamp (seconds) of the sweep that produced this sample.
    pub ts: u64,
    pub status: Status,
}

impl Sample {
    pub fn new(ts: u64, status: Status) -> Self {
        Self { ts, status }
    }
}
