//! Job building: partition discovered candidates into bounded batches.

use alloy::primitives::Address;
use serde::Serialize;

use crate::scanner::Candidate;

/// One bounded batch submitted as a single transaction attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub borrowers: Vec<Address>,
    pub fallback_on_fail: bool,
}

impl Job {
    pub fn new(borrowers: Vec<Address>, fallback_on_fail: bool) -> Self {
        Self {
            borrowers,
            fallback_on_fail,
        }
    }

    pub fn len(&self) -> usize {
        self.borrowers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.borrowers.is_empty()
    }
}

/// Slice candidates into contiguous jobs of at most `max_per_job`,
/// preserving order.
pub fn build_jobs(candidates: &[Candidate], max_per_job: usize, enable_fallback: bool) -> Vec<Job> {
    candidates
        .chunks(max_per_job.max(1))
        .map(|chunk| Job::new(chunk.iter().map(|c| c.address).collect(), enable_fallback))
        .collect()
}
