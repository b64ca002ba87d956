//! Weighted scoring of observations
//!
//! Turns one detector's per-call confidence into a contribution on a common
//! scale: `score = weight × confidence`, `max_score = weight`. Sources with
//! different trust levels can then be summed per address.

use std::net::IpAddr;

use crate::traits::Observation;

/// Weighted contribution of a single observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    /// `weight × confidence`
    pub score: f64,
    /// `weight × 1.0`
    pub max_score: f64,
}

impl Score {
    /// Weigh a confidence value.
    ///
    /// `weight` is expected to be positive and finite (enforced when a
    /// [`SourceDescriptor`](crate::registry::SourceDescriptor) is built).
    /// Guarantees `0 <= score <= max_score == weight`.
    pub fn weigh(weight: f64, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        Self {
            score: weight * confidence,
            max_score: weight,
        }
    }
}

/// An observation after weighting, as handed to the aggregator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredObservation {
    /// Reported address
    pub address: IpAddr,
    /// Contribution of this observation
    pub score: f64,
    /// Maximum contribution the source could have made
    pub max_score: f64,
}

impl ScoredObservation {
    /// Apply a source weight to an observation
    pub fn new(observation: Observation, weight: f64) -> Self {
        let Score { score, max_score } = Score::weigh(weight, observation.confidence);

        Self {
            address: observation.address,
            score,
            max_score,
        }
    }
}
