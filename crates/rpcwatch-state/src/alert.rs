//! Alert decision for a single endpoint.
//!
//! An alert fires on the transition into "two consecutive failures": the
//! newest and second-newest samples are errors and the one before them is
//! not (or does not exist). Further failures in the same run stay silent
//! until a successful sample resets it. The kind of error is ignored, so
//! `timeout` followed by `connection refused` is still two failures.

use crate::types::Sample;

/// Decide whether the newest sample (the last element) should raise an alert.
pub fn should_alert(history: &[Sample]) -> bool {
    let mut recent = history.iter().rev().map(|s| s.status.is_error());
    let newest = recent.next().unwrap_or(false);
    let second = recent.next().unwrap_or(false);
    let third = recent.next().unwrap_or(false);
    newest && second && !third
}
