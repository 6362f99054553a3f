pub mod database;
pub mod procedure;
pub mod reader;
pub mod repair;
pub mod replay;

use crate::backup::dump::reader::DEFAULT_DELIMITER;
use crate::backup::validate::validate_delimiter;
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

/// Pause before the single blind retry of a failed statement.
static DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Longest statement excerpt written to the log.
static LOG_PREVIEW_CHARS: usize = 120;

#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, PartialEq, Eq, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct ReplayConfig {
    #[validate(custom(function = validate_delimiter))]
    #[serde(default = "default_delimiter")]
    #[builder(default = default_delimiter(), into)]
    delimiter: Arc<str>,
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    #[builder(default = DEFAULT_RETRY_DELAY)]
    retry_delay: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn default_delimiter() -> Arc<str> {
    DEFAULT_DELIMITER.into()
}

fn default_retry_delay() -> Duration {
    DEFAULT_RETRY_DELAY
}

/// Per-statement outcome counts of one replay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Statements that succeeded on the first attempt
    pub executed: usize,
    /// `REPLACE INTO` statements that succeeded after repair
    pub repaired: usize,
    /// Statements that succeeded on the delayed retry
    pub retried: usize,
    /// Statements given up on
    pub failed: usize,
    /// Statements deliberately not executed
    pub skipped: usize,
}

impl ReplayReport {
    pub fn statements(&self) -> usize {
        self.executed + self.repaired + self.retried + self.failed + self.skipped
    }

    pub fn succeeded(&self) -> usize {
        self.executed + self.repaired + self.retried
    }
}

impl AddAssign for ReplayReport {
    fn add_assign(&mut self, rhs: Self) {
        self.executed += rhs.executed;
        self.repaired += rhs.repaired;
        self.retried += rhs.retried;
        self.failed += rhs.failed;
        self.skipped += rhs.skipped;
    }
}

pub(crate) fn preview(statement: &str) -> String {
    let statement = statement.trim();
    match statement.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &statement[..idx]),
        None => statement.to_string(),
    }
}
