//! Weighted multi-source consensus resolver
//!
//! The resolver asks every applicable source at once and returns as soon as
//! one address has collected enough weighted agreement.
//!
//! ## Architecture
//!
//! ```text
//!  SourceRegistry ── for_family() ──┐
//!                                   ▼
//!          ┌──────────┬──────────┬──────────┐
//!          │ worker 1 │ worker 2 │ worker N │   one task per source
//!          └────┬─────┴────┬─────┴────┬─────┘
//!               │  ScoredObservation  │        bounded mpsc, raced
//!               ▼          ▼          ▼        against cancellation
//!          ┌────────────────────────────────┐
//!          │ aggregator (single owner of    │
//!          │ the per-address tally)         │── ratio > T ──▶ Resolution
//!          └────────────────────────────────┘
//!               ▲
//!   supervisor ─┘ joins workers, then closes the channel
//! ```
//!
//! ## Stopping Rule
//!
//! For every arriving observation the aggregator updates that address's
//! `(score, max_score)` totals and checks `score / max_score > threshold`.
//! The first address to cross wins; the shared scope is then cancelled and
//! in-flight detector calls are dropped. Arrival order follows network
//! latency, so with several disjoint answers the winner is not deterministic.
//!
//! The ratio is per address: it is not normalized against the total weight
//! of all queried sources. A single source with confidence above the
//! threshold is therefore enough on its own.

mod scope;
mod tally;

pub use tally::AggregateEntry;

use std::net::IpAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::{ResolveConfig, validate_threshold, validate_timeout};
use crate::error::{Error, Result};
use crate::registry::{SourceDescriptor, SourceRegistry};
use crate::scoring::ScoredObservation;
use crate::traits::IpFamily;

use scope::{ResolveScope, ScopeToken};
use tally::Tally;

/// Outcome of a successful resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    /// The agreed address
    pub address: IpAddr,
    /// `score / max_score` at the moment the threshold was crossed
    pub ratio: f64,
    /// Accumulated score behind `address`
    pub score: f64,
    /// Accumulated maximum score behind `address`
    pub max_score: f64,
    /// Number of sources that reported `address` before it won
    pub reports: usize,
}

/// Consensus resolver over a fixed source table
#[derive(Debug, Clone)]
pub struct Resolver {
    sources: SourceRegistry,
}

impl Resolver {
    /// Create a resolver over `sources`
    pub fn new(sources: SourceRegistry) -> Self {
        Self { sources }
    }

    /// The source table this resolver fans out over
    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// Resolve the public address for `family`
    ///
    /// # Parameters
    ///
    /// - `family`: Address family to resolve; selects the applicable sources
    /// - `timeout`: Deadline shared by every source
    /// - `threshold`: Ratio an address must exceed, in `(0, 1]`
    ///
    /// # Returns
    ///
    /// - `Ok(Resolution)`: First address whose ratio exceeded `threshold`
    /// - `Err(Error::Config)`: Invalid threshold/timeout or no applicable source
    /// - `Err(Error::NoConsensus)`: All sources finished without a winner
    /// - `Err(Error::Timeout)`: The deadline elapsed without a winner
    pub async fn resolve(
        &self,
        family: IpFamily,
        timeout: Duration,
        threshold: f64,
    ) -> Result<Resolution> {
        resolve_sources(self.sources.for_family(family), family, timeout, threshold).await
    }

    /// Resolve using a [`ResolveConfig`]
    pub async fn resolve_with(&self, config: &ResolveConfig) -> Result<Resolution> {
        self.resolve(config.family, config.timeout(), config.threshold)
            .await
    }
}

/// Run one resolution over an explicit source list
///
/// Every source in `sources` is queried; no family filtering is applied to
/// the list itself, but observations of the wrong family are discarded.
pub async fn resolve_sources(
    sources: Vec<SourceDescriptor>,
    family: IpFamily,
    timeout: Duration,
    threshold: f64,
) -> Result<Resolution> {
    validate_threshold(threshold)?;
    validate_timeout(timeout)?;
    if sources.is_empty() {
        return Err(Error::config(format!(
            "No sources configured for IP{}",
            family
        )));
    }

    let source_count = sources.len();
    // Logged only; the stopping rule is per address.
    let total_weight: f64 = sources.iter().map(SourceDescriptor::weight).sum();
    debug!(
        %family,
        sources = source_count,
        total_weight,
        threshold,
        ?timeout,
        "Starting resolution"
    );

    let scope = ResolveScope::new(Instant::now() + timeout);
    let (tx, mut rx) = mpsc::channel::<ScoredObservation>(source_count);

    let mut workers = JoinSet::new();
    for source in sources {
        workers.spawn(run_source(source, family, scope.token(), tx.clone()));
    }

    tokio::spawn(async move {
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined
                && e.is_panic()
            {
                warn!(error = %e, "Source worker panicked");
            }
        }
        // Last sender: the receive loop below ends once this is dropped.
        drop(tx);
    });

    let mut tally = Tally::new();
    loop {
        // Deadline first: workers drain the channel at the same instant.
        let received = tokio::select! {
            biased;
            _ = tokio::time::sleep_until(scope.deadline()) => {
                debug!(addresses = tally.len(), "Resolution deadline elapsed");
                return Err(Error::Timeout { timeout, threshold });
            }
            received = rx.recv() => received,
        };

        let Some(observation) = received else {
            debug!(addresses = tally.len(), "All sources finished without consensus");
            return Err(Error::NoConsensus {
                threshold,
                sources: source_count,
            });
        };

        let entry = tally.record(&observation);
        let ratio = entry.ratio();
        debug!(
            address = %observation.address,
            score = entry.score,
            max_score = entry.max_score,
            ratio,
            "Updated tally"
        );

        if ratio > threshold {
            scope.cancel();
            info!(
                address = %observation.address,
                ratio,
                reports = entry.reports,
                "Consensus reached"
            );
            return Ok(Resolution {
                address: observation.address,
                ratio,
                score: entry.score,
                max_score: entry.max_score,
                reports: entry.reports,
            });
        }
    }
}

/// Query one source and hand its weighted observation to the aggregator
async fn run_source(
    source: SourceDescriptor,
    family: IpFamily,
    mut token: ScopeToken,
    tx: mpsc::Sender<ScoredObservation>,
) {
    let detector = source.detector();
    let kind = detector.kind();

    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => {
            trace!(kind, source = %detector, "Source abandoned");
            return;
        }
        outcome = detector.retrieve() => outcome,
    };

    let observation = match outcome {
        Ok(observation) => observation,
        Err(e) => {
            debug!(kind, source = %detector, error = %e, "Source failed");
            return;
        }
    };

    if !family.matches(&observation.address) {
        debug!(
            kind,
            source = %detector,
            address = %observation.address,
            %family,
            "Discarding observation of the wrong family"
        );
        return;
    }

    let scored = source.score(observation);
    info!(
        kind,
        source = %detector,
        address = %scored.address,
        score = scored.score,
        "Retrieved address"
    );

    if token.is_cancelled() {
        trace!(kind, source = %detector, "Resolution finished, dropping observation");
        return;
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => {
            trace!(kind, source = %detector, "Resolution finished, dropping observation");
        }
        sent = tx.send(scored) => {
            if sent.is_err() {
                trace!(kind, source = %detector, "Aggregator gone, dropping observation");
            }
        }
    }
}
