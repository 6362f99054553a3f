//! Overall task progress built from discrete step completions and
//! intra-step percentages.
//!
//! Counters are atomics so a reporting thread can poll [`ProgressAccumulator::percent`]
//! while the task thread drives the updates. Observers are attached before the
//! task starts and are notified only when the reported percentage changes.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::mpsc::{Sender, SyncSender};

pub trait ProgressObserver: Send + Sync {
    fn progress_changed(&self, percent: u8);
}

impl<F: Fn(u8) + Send + Sync> ProgressObserver for F {
    fn progress_changed(&self, percent: u8) {
        self(percent)
    }
}

impl ProgressObserver for Sender<u8> {
    fn progress_changed(&self, percent: u8) {
        if self.send(percent).is_err() {
            tracing::trace!("Progress receiver dropped, {percent}% not delivered");
        }
    }
}

impl ProgressObserver for SyncSender<u8> {
    fn progress_changed(&self, percent: u8) {
        if self.try_send(percent).is_err() {
            tracing::trace!("Progress channel full or closed, {percent}% not delivered");
        }
    }
}

pub struct ProgressAccumulator {
    steps_count: AtomicU32,
    steps_completed: AtomicU32,
    percent: AtomicU8,
    observers: Vec<Box<dyn ProgressObserver>>,
}

impl Default for ProgressAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for ProgressAccumulator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressAccumulator")
            .field("steps_count", &self.steps_count())
            .field("steps_completed", &self.steps_completed())
            .field("percent", &self.percent())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ProgressAccumulator {
    pub fn new() -> Self {
        Self {
            steps_count: AtomicU32::new(1),
            steps_completed: AtomicU32::new(0),
            percent: AtomicU8::new(0),
            observers: Vec::new(),
        }
    }

    pub fn with_observer<O: ProgressObserver + 'static>(mut self, observer: O) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn steps_count(&self) -> u32 {
        self.steps_count.load(Ordering::Acquire)
    }

    pub fn steps_completed(&self) -> u32 {
        self.steps_completed.load(Ordering::Acquire)
    }

    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::Acquire)
    }

    pub fn set_steps_count(&self, steps_count: u32) -> Result<()> {
        if steps_count == 0 {
            return Err(Error::InvalidConfiguration(
                "steps count must be at least 1".to_string(),
            ));
        }
        self.steps_count.store(steps_count, Ordering::Release);
        self.steps_completed.store(0, Ordering::Release);
        Ok(())
    }

    /// Marks `increment` steps as done. Single-step tasks report only through
    /// [`Self::set_current_step_progress`] or [`Self::set_progress`], so this is
    /// a no-op for them.
    pub fn set_step_completed(&self, increment: u32) -> Result<()> {
        let steps_count = self.steps_count();
        if steps_count == 1 {
            return Ok(());
        }
        let completed = self.steps_completed();
        if completed >= steps_count {
            return Err(Error::IllegalState(format!(
                "all {steps_count} steps already completed"
            )));
        }
        let completed = completed.saturating_add(increment).min(steps_count);
        self.steps_completed.store(completed, Ordering::Release);
        self.advance_to(weighted_percent(completed, 0, steps_count));
        Ok(())
    }

    pub fn set_current_step_progress(&self, value: u8) -> Result<()> {
        check_percent(value)?;
        if value == 100 {
            return self.set_step_completed(1);
        }
        let percent = weighted_percent(self.steps_completed(), value, self.steps_count());
        self.advance_to(percent);
        Ok(())
    }

    /// Sets the absolute percentage, bypassing step accounting.
    pub fn set_progress(&self, value: u8) -> Result<()> {
        check_percent(value)?;
        let previous = self.percent.swap(value, Ordering::AcqRel);
        if previous != value {
            self.notify(value);
        }
        Ok(())
    }

    fn advance_to(&self, percent: u8) {
        let previous = self.percent.fetch_max(percent, Ordering::AcqRel);
        if previous < percent {
            self.notify(percent);
        }
    }

    fn notify(&self, percent: u8) {
        tracing::debug!("Progress changed to {percent}%");
        self.observers
            .iter()
            .for_each(|o| o.progress_changed(percent));
    }
}

fn check_percent(value: u8) -> Result<()> {
    if value > 100 {
        return Err(Error::InvalidArgument(format!(
            "progress {value} is outside [0, 100]"
        )));
    }
    Ok(())
}

fn weighted_percent(completed: u32, current_step_percent: u8, steps_count: u32) -> u8 {
    let total = (100 * u64::from(completed) + u64::from(current_step_percent))
        / u64::from(steps_count.max(1));
    total.min(100) as u8
}
