//! Bounded, oldest-first sample history for one endpoint.

use std::collections::VecDeque;

use crate::alert::should_alert;
use crate::types::Sample;

/// Sliding window of samples. The capacity is owned by the store and passed
/// in on every append so a single limit applies to every endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    samples: VecDeque<Sample>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a history from stored samples, keeping the most recent `cap`.
    pub fn from_samples(samples: Vec<Sample>, cap: usize) -> Self {
        let mut history = Self {
            samples: samples.into(),
        };
        history.truncate(cap);
        history
    }

    /// Append a sample and return whether it should raise an alert.
    ///
    /// The decision sees the new sample at the tail before the window is
    /// trimmed, so it is exact for any `cap >= 2`.
    pub fn append(&mut self, sample: Sample, cap: usize) -> bool {
        self.samples.push_back(sample);
        let alert = should_alert(self.samples.make_contiguous());
        self.truncate(cap);
        alert
    }

    /// The most recent `limit` samples (all when `None`), oldest first.
    pub fn window(&self, limit: Option<usize>) -> Vec<Sample> {
        let take = limit.map_or(self.samples.len(), |k| k.min(self.samples.len()));
        self.samples
            .iter()
            .skip(self.samples.len() - take)
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    fn truncate(&mut self, cap: usize) {
        let excess = self.samples.len().saturating_sub(cap);
        self.samples.drain(..excess);
    }
}
