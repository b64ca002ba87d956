//! Test doubles and common utilities for resolver contract tests
//!
//! These detectors never touch the network; they answer after a scripted
//! delay and count how often they were called, completed, or abandoned.

#![allow(dead_code)]

use pubip_core::error::{Error, Result};
use pubip_core::{Detector, Observation, SourceDescriptor};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Shared call counters for one detector
#[derive(Debug, Clone, Default)]
pub struct Counters {
    calls: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    abandoned: Arc<AtomicUsize>,
}

impl Counters {
    /// Number of times retrieve() was entered
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of retrievals that ran to completion
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Number of retrievals dropped while still in flight
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

/// Counts the retrieval as abandoned unless it is defused first
struct InFlight<'a> {
    counters: &'a Counters,
    done: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.counters.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

enum Outcome {
    Address(IpAddr, f64),
    Failure,
    Panic,
}

/// A detector that answers with a fixed outcome after a fixed delay
pub struct ScriptedDetector {
    name: String,
    outcome: Outcome,
    delay: Duration,
    counters: Counters,
}

impl ScriptedDetector {
    /// Report `address` with `confidence` after `delay`
    pub fn reporting(address: &str, confidence: f64, delay: Duration) -> Self {
        Self {
            name: format!("scripted://{}", address),
            outcome: Outcome::Address(ip(address), confidence),
            delay,
            counters: Counters::default(),
        }
    }

    /// Fail after `delay`
    pub fn failing(delay: Duration) -> Self {
        Self {
            name: "scripted://failure".to_string(),
            outcome: Outcome::Failure,
            delay,
            counters: Counters::default(),
        }
    }

    /// Panic after `delay`
    pub fn panicking(delay: Duration) -> Self {
        Self {
            name: "scripted://panic".to_string(),
            outcome: Outcome::Panic,
            delay,
            counters: Counters::default(),
        }
    }

    /// Handle on this detector's counters
    pub fn counters(&self) -> Counters {
        self.counters.clone()
    }
}

impl fmt::Display for ScriptedDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[async_trait::async_trait]
impl Detector for ScriptedDetector {
    async fn retrieve(&self) -> Result<Observation> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        let mut in_flight = InFlight {
            counters: &self.counters,
            done: false,
        };

        tokio::time::sleep(self.delay).await;

        in_flight.done = true;
        self.counters.completed.fetch_add(1, Ordering::SeqCst);

        match self.outcome {
            Outcome::Address(address, confidence) => Ok(Observation::new(address, confidence)),
            Outcome::Failure => Err(Error::not_retrieved("scripted failure")),
            Outcome::Panic => panic!("scripted panic"),
        }
    }

    fn kind(&self) -> &'static str {
        "SCRIPTED"
    }
}

/// Parse an address literal
pub fn ip(address: &str) -> IpAddr {
    address.parse().expect("valid address literal")
}

/// Milliseconds shorthand
pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Wrap a detector as an IPv4-only source
pub fn v4_source(detector: ScriptedDetector, weight: f64) -> (SourceDescriptor, Counters) {
    source(detector, weight, true, false)
}

/// Wrap a detector as a source with explicit families
pub fn source(
    detector: ScriptedDetector,
    weight: f64,
    ipv4: bool,
    ipv6: bool,
) -> (SourceDescriptor, Counters) {
    let counters = detector.counters();
    let descriptor = SourceDescriptor::new(Arc::new(detector), weight, ipv4, ipv6)
        .expect("valid source descriptor");
    (descriptor, counters)
}
