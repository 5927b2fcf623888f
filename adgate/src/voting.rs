//! Majority voting across detection attempts
//!
//! A cycle is blocked when at least `ceil(n / 2)` of its `n` attempt
//! verdicts are blocked. With zero attempts there is nothing to vote on
//! and the result fails open.

use serde::{Deserialize, Serialize};

/// Blocked votes needed out of `attempts`.
pub fn majority_threshold(attempts: usize) -> usize {
    attempts.div_ceil(2)
}

/// Tally of one cycle's attempt verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub attempts: usize,
    pub blocked: usize,
    pub threshold: usize,
    pub verdict: bool,
}

impl VoteTally {
    pub fn from_verdicts(verdicts: &[bool]) -> Self {
        let attempts = verdicts.len();
        let blocked = verdicts.iter().filter(|v| **v).count();
        let threshold = majority_threshold(attempts);

        Self {
            attempts,
            blocked,
            threshold,
            verdict: attempts > 0 && blocked >= threshold,
        }
    }
}

/// Majority verdict over a set of attempt verdicts.
pub fn majority_vote(verdicts: &[bool]) -> bool {
    VoteTally::from_verdicts(verdicts).verdict
}
