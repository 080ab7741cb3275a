//! Run state machine and progress counters.
//!
//! A [`Progress`] is shared between a running pipeline and whoever observes
//! it. Counters only grow during a run and the state only moves forward,
//! so a snapshot taken at any time is internally consistent enough to
//! drive a progress bar.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Stage of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    #[default]
    Idle,
    Normalizing,
    Matching,
    Enriching,
    Merging,
    Done,
    Failed,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunState::Idle,
            1 => RunState::Normalizing,
            2 => RunState::Matching,
            3 => RunState::Enriching,
            4 => RunState::Merging,
            5 => RunState::Done,
            _ => RunState::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: RunState) -> bool {
        match next {
            RunState::Failed => !self.is_terminal(),
            RunState::Idle => false,
            _ => next as u8 == self as u8 + 1,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Normalizing => "normalizing",
            RunState::Matching => "matching",
            RunState::Enriching => "enriching",
            RunState::Merging => "merging",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Live counters for one run.
#[derive(Debug, Default)]
pub struct Progress {
    state: AtomicU8,
    records_normalized: AtomicUsize,
    records_matched: AtomicUsize,
    batches_total: AtomicUsize,
    batches_done: AtomicUsize,
    rows_merged: AtomicUsize,
}

/// Point-in-time copy of [`Progress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub state: RunState,
    pub records_normalized: usize,
    pub records_matched: usize,
    pub batches_total: usize,
    pub batches_done: usize,
    pub rows_merged: usize,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` if that is a legal transition from the current state.
    /// Returns the state that was replaced.
    pub fn advance(&self, next: RunState) -> Result<RunState, RunState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = RunState::from_u8(current);
            if !from.can_advance_to(next) {
                return Err(from);
            }
            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    tracing::debug!(from = %from, to = %next, "Run state changed");
                    return Ok(from);
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Back to `Idle` with zeroed counters, for the start of a new run.
    pub(crate) fn reset(&self) {
        self.state.store(RunState::Idle as u8, Ordering::Release);
        self.records_normalized.store(0, Ordering::Relaxed);
        self.records_matched.store(0, Ordering::Relaxed);
        self.batches_total.store(0, Ordering::Relaxed);
        self.batches_done.store(0, Ordering::Relaxed);
        self.rows_merged.store(0, Ordering::Relaxed);
    }

    pub(crate) fn add_normalized(&self, n: usize) {
        self.records_normalized.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_matched(&self, n: usize) {
        self.records_matched.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_batches_total(&self, n: usize) {
        self.batches_total.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn batch_done(&self) {
        self.batches_done.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_merged(&self, n: usize) {
        self.rows_merged.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            state: self.state(),
            records_normalized: self.records_normalized.load(Ordering::Relaxed),
            records_matched: self.records_matched.load(Ordering::Relaxed),
            batches_total: self.batches_total.load(Ordering::Relaxed),
            batches_done: self.batches_done.load(Ordering::Relaxed),
            rows_merged: self.rows_merged.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let p = Progress::new();
        for next in [
            RunState::Normalizing,
            RunState::Matching,
            RunState::Enriching,
            RunState::Merging,
            RunState::Done,
        ] {
            assert!(p.advance(next).is_ok());
        }
        assert_eq!(p.state(), RunState::Done);
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        let p = Progress::new();
        assert_eq!(p.advance(RunState::Matching), Err(RunState::Idle));
        p.advance(RunState::Normalizing).unwrap();
        p.advance(RunState::Matching).unwrap();
        assert_eq!(p.advance(RunState::Normalizing), Err(RunState::Matching));
    }

    #[test]
    fn test_failed_from_any_live_state() {
        let p = Progress::new();
        p.advance(RunState::Normalizing).unwrap();
        assert_eq!(p.advance(RunState::Failed), Ok(RunState::Normalizing));
        assert!(p.advance(RunState::Failed).is_err());
        assert!(p.advance(RunState::Matching).is_err());
    }

    #[test]
    fn test_reset() {
        let p = Progress::new();
        p.advance(RunState::Normalizing).unwrap();
        p.add_normalized(10);
        p.add_batches_total(3);
        p.batch_done();
        p.reset();
        assert_eq!(p.snapshot(), ProgressSnapshot::default());
    }
}
