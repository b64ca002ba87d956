//! Per-address running totals for one resolution call

use std::collections::HashMap;
use std::net::IpAddr;

use crate::scoring::ScoredObservation;

/// Accumulated weight behind one address
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AggregateEntry {
    /// Sum of contributed scores
    pub score: f64,
    /// Sum of the maximum scores the contributing sources could have given
    pub max_score: f64,
    /// Number of observations merged
    pub reports: usize,
}

impl AggregateEntry {
    /// `score / max_score`, always in `[0, 1]`
    pub fn ratio(&self) -> f64 {
        if self.max_score > 0.0 {
            self.score / self.max_score
        } else {
            0.0
        }
    }
}

/// Aggregate map owned by the resolver's receive loop.
///
/// Keys are canonical addresses, so `::ffff:192.0.2.1` and `192.0.2.1`
/// share an entry.
#[derive(Debug, Default)]
pub(crate) struct Tally {
    entries: HashMap<IpAddr, AggregateEntry>,
}

impl Tally {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Merge one observation and return the updated entry
    pub(crate) fn record(&mut self, observation: &ScoredObservation) -> AggregateEntry {
        let entry = self
            .entries
            .entry(observation.address.to_canonical())
            .or_default();

        entry.score += observation.score;
        entry.max_score += observation.max_score;
        entry.reports += 1;

        debug_assert!(
            entry.score <= entry.max_score + f64::EPSILON * entry.max_score,
            "cumulative score {} exceeds cumulative max {}",
            entry.score,
            entry.max_score
        );

        *entry
    }

    /// Number of distinct addresses seen so far
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
