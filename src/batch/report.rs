//! Per-member outcome summary for a group submission.

use crate::types::ApiResponse;
use crate::Error;
use std::time::Duration;

/// Outcome of [`BatchAggregator::submit_all`](super::BatchAggregator::submit_all).
///
/// Indices refer to the position in the submitted list, not to the wire batch
/// the member ended up in.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub successes: Vec<(usize, ApiResponse)>,
    pub failures: Vec<(usize, Error)>,
    pub execution_time: Duration,
    pub total_processed: usize,
}

impl BatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_success(&mut self, index: usize, response: ApiResponse) {
        self.successes.push((index, response));
    }

    pub fn add_failure(&mut self, index: usize, error: Error) {
        self.failures.push((index, error));
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.successes.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_processed == 0 {
            0.0
        } else {
            self.successes.len() as f64 / self.total_processed as f64
        }
    }

    /// Outcome for one submitted index.
    pub fn outcome(&self, index: usize) -> Option<Result<&ApiResponse, &Error>> {
        if let Some((_, r)) = self.successes.iter().find(|(i, _)| *i == index) {
            return Some(Ok(r));
        }
        self.failures
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, e)| Err(e))
    }
}
