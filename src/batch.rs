//! Per-step outcome of a multi-transaction operation.

use serde::Serialize;

use crate::error::LaunchpadError;

#[derive(Debug, Clone, Serialize)]
pub struct FailedStep<T> {
    pub item: T,
    pub error: String,
}

/// Which steps of a batch ran, failed, or never started.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<FailedStep<T>>,
    pub skipped: Vec<T>,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self { succeeded: Vec::new(), failed: Vec::new(), skipped: Vec::new() }
    }
}

impl<T> BatchResult<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ok(&mut self, item: T) {
        self.succeeded.push(item);
    }

    pub fn record_err(&mut self, item: T, error: &LaunchpadError) {
        self.failed.push(FailedStep { item, error: error.user_message() });
    }

    pub fn skip_rest(&mut self, rest: impl IntoIterator<Item = T>) {
        self.skipped.extend(rest);
    }

    /// Every step ran and none failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.skipped.len()
    }
}
