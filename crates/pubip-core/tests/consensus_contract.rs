//! Contract Test: Consensus Rule
//!
//! Constraints verified:
//! - A single source wins iff its confidence exceeds the threshold
//! - Agreement accumulates per address across sources
//! - Resolution does not wait for every source once an address wins
//! - Disjoint answers that never cross the threshold fail with no consensus
//!
//! If this test fails, the stopping rule has changed.

mod common;

use common::*;
use pubip_core::{Error, IpFamily, resolve_sources};
use tokio_test::{assert_err, assert_ok};

const V4: IpFamily = IpFamily::V4;

#[tokio::test]
async fn single_source_above_threshold_wins() {
    let (source, _) = v4_source(ScriptedDetector::reporting("203.0.113.5", 0.7, ms(5)), 3.0);

    let resolution = assert_ok!(resolve_sources(vec![source], V4, ms(2000), 0.6).await);

    assert_eq!(resolution.address, ip("203.0.113.5"));
    assert!((resolution.ratio - 0.7).abs() < 1e-12);
    assert!((resolution.score - 2.1).abs() < 1e-12);
    assert_eq!(resolution.max_score, 3.0);
    assert_eq!(resolution.reports, 1);
}

#[tokio::test]
async fn single_source_at_or_below_threshold_fails() {
    for confidence in [0.6, 0.5, 0.1] {
        let (source, _) = v4_source(
            ScriptedDetector::reporting("203.0.113.5", confidence, ms(5)),
            3.0,
        );

        let err = assert_err!(resolve_sources(vec![source], V4, ms(2000), 0.6).await);

        assert!(
            matches!(err, Error::NoConsensus { sources: 1, .. }),
            "confidence {confidence}: unexpected {err:?}"
        );
    }
}

#[tokio::test]
async fn agreement_accumulates_per_address() {
    // 0.5/1 = 0.5, then (0.5 + 1.0)/2 = 0.75 > 0.6
    let (first, _) = v4_source(ScriptedDetector::reporting("198.51.100.7", 0.5, ms(0)), 1.0);
    let (second, _) = v4_source(ScriptedDetector::reporting("198.51.100.7", 1.0, ms(60)), 1.0);

    let resolution = assert_ok!(resolve_sources(vec![first, second], V4, ms(2000), 0.6).await);

    assert_eq!(resolution.address, ip("198.51.100.7"));
    assert_eq!(resolution.reports, 2);
    assert!((resolution.ratio - 0.75).abs() < 1e-12);
}

#[tokio::test]
async fn weak_reports_are_outvoted_by_strong_agreement() {
    // X: 0.1/1, then 1.1/2 = 0.55, then 2.1/3 = 0.7 > 0.6
    let sources = vec![
        v4_source(ScriptedDetector::reporting("192.0.2.10", 0.1, ms(0)), 1.0).0,
        v4_source(ScriptedDetector::reporting("192.0.2.99", 0.1, ms(40)), 1.0).0,
        v4_source(ScriptedDetector::reporting("192.0.2.10", 1.0, ms(80)), 1.0).0,
        v4_source(ScriptedDetector::reporting("192.0.2.10", 1.0, ms(120)), 1.0).0,
    ];

    let resolution = assert_ok!(resolve_sources(sources, V4, ms(2000), 0.6).await);

    assert_eq!(resolution.address, ip("192.0.2.10"));
    assert_eq!(resolution.reports, 3);
}

#[tokio::test]
async fn resolution_does_not_wait_for_every_source() {
    let mut sources = Vec::new();
    let mut counters = Vec::new();
    for i in 0..5u64 {
        let delay = if i < 2 { ms(10 * i) } else { ms(3000) };
        let (source, c) = v4_source(ScriptedDetector::reporting("203.0.113.5", 1.0, delay), 1.0);
        sources.push(source);
        counters.push(c);
    }

    let started = tokio::time::Instant::now();
    let resolution = assert_ok!(resolve_sources(sources, V4, ms(5000), 0.6).await);

    assert_eq!(resolution.address, ip("203.0.113.5"));
    assert!(started.elapsed() < ms(1500), "resolution waited for slow sources");

    let completed: usize = counters.iter().map(Counters::completed).sum();
    assert!(completed < 5, "all sources completed, expected early termination");
}

#[tokio::test]
async fn three_agreeing_sources_resolve_without_the_third() {
    let (a, _) = v4_source(ScriptedDetector::reporting("203.0.113.5", 1.0, ms(10)), 1.0);
    let (b, _) = v4_source(ScriptedDetector::reporting("203.0.113.5", 1.0, ms(20)), 1.0);
    let (c, third) = v4_source(ScriptedDetector::reporting("203.0.113.5", 1.0, ms(3000)), 1.0);

    let resolution = assert_ok!(resolve_sources(vec![a, b, c], V4, ms(5000), 0.6).await);

    assert_eq!(resolution.address, ip("203.0.113.5"));
    assert!(resolution.ratio > 0.6);

    tokio::time::sleep(ms(50)).await;
    assert_eq!(third.completed(), 0);
    assert_eq!(third.abandoned(), 1, "in-flight call should be abandoned");
}

#[tokio::test]
async fn disjoint_answers_fail_without_consensus() {
    let sources = vec![
        v4_source(ScriptedDetector::reporting("192.0.2.1", 0.5, ms(0)), 1.0).0,
        v4_source(ScriptedDetector::reporting("192.0.2.2", 0.5, ms(10)), 1.0).0,
        v4_source(ScriptedDetector::reporting("192.0.2.1", 0.4, ms(20)), 1.0).0,
        v4_source(ScriptedDetector::reporting("192.0.2.2", 0.6, ms(30)), 1.0).0,
    ];

    let started = tokio::time::Instant::now();
    let err = assert_err!(resolve_sources(sources, V4, ms(5000), 0.6).await);

    assert!(matches!(err, Error::NoConsensus { sources: 4, .. }), "{err:?}");
    assert!(err.is_no_consensus());
    assert!(started.elapsed() < ms(2000), "should fail once all sources finish");
}

#[tokio::test]
async fn weight_scales_contributions() {
    // Heavy weak source (0.2 * 4 = 0.8 of 4) then light strong source (1 of 1):
    // (0.8 + 1.0) / 5 = 0.36, below the threshold.
    let (heavy, _) = v4_source(ScriptedDetector::reporting("192.0.2.5", 0.2, ms(0)), 4.0);
    let (light, _) = v4_source(ScriptedDetector::reporting("192.0.2.5", 1.0, ms(40)), 1.0);

    let err = assert_err!(resolve_sources(vec![heavy, light], V4, ms(2000), 0.6).await);
    assert!(err.is_no_consensus());
}
