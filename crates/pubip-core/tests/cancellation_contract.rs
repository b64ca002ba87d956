//! Contract Test: Cancellation Correctness
//!
//! Constraints verified:
//! - Observations arriving after consensus are never merged
//! - In-flight detector calls are dropped once the result is known
//! - Dropping the resolve future cancels every worker
//! - A panicking or failing source never aborts the resolution
//!
//! If this test fails, someone has added:
//! - Detached work that ignores the shared scope
//! - A blocking hand-off that outlives the resolution

mod common;

use common::*;
use pubip_core::{IpFamily, resolve_sources};
use tokio_test::assert_ok;

#[tokio::test]
async fn slow_dissenting_source_is_never_merged() {
    let (fast_a, _) = v4_source(ScriptedDetector::reporting("203.0.113.5", 0.5, ms(0)), 1.0);
    let (fast_b, _) = v4_source(ScriptedDetector::reporting("203.0.113.5", 1.0, ms(40)), 1.0);
    let (slow, slow_counters) =
        v4_source(ScriptedDetector::reporting("198.51.100.66", 1.0, ms(300)), 10.0);

    let resolution = assert_ok!(
        resolve_sources(vec![fast_a, fast_b, slow], IpFamily::V4, ms(5000), 0.6).await
    );

    assert_eq!(resolution.address, ip("203.0.113.5"));
    assert_eq!(resolution.reports, 2);

    // Give the slow source time to have finished if it had not been cancelled.
    tokio::time::sleep(ms(400)).await;

    assert_eq!(slow_counters.calls(), 1);
    assert_eq!(slow_counters.completed(), 0, "slow source must not finish");
    assert_eq!(slow_counters.abandoned(), 1);
    assert_eq!(resolution.address, ip("203.0.113.5"));
}

#[tokio::test]
async fn every_outstanding_call_is_abandoned_after_consensus() {
    let (winner, _) = v4_source(ScriptedDetector::reporting("192.0.2.1", 1.0, ms(0)), 1.0);
    let mut sources = vec![winner];
    let mut outstanding = Vec::new();
    for _ in 0..8 {
        let (source, counters) =
            v4_source(ScriptedDetector::reporting("192.0.2.1", 1.0, ms(10_000)), 1.0);
        sources.push(source);
        outstanding.push(counters);
    }

    assert_ok!(resolve_sources(sources, IpFamily::V4, ms(20_000), 0.6).await);

    tokio::time::sleep(ms(100)).await;
    for counters in &outstanding {
        assert_eq!(counters.completed(), 0);
        assert_eq!(counters.abandoned(), counters.calls());
    }
}

#[tokio::test]
async fn dropping_the_resolution_cancels_workers() {
    let (slow, counters) =
        v4_source(ScriptedDetector::reporting("192.0.2.1", 1.0, ms(10_000)), 1.0);

    let resolution = resolve_sources(vec![slow], IpFamily::V4, ms(20_000), 0.6);
    let outcome = tokio::time::timeout(ms(100), resolution).await;
    assert!(outcome.is_err(), "resolution should still be pending");

    tokio::time::sleep(ms(100)).await;
    assert_eq!(counters.calls(), 1);
    assert_eq!(counters.completed(), 0);
    assert_eq!(counters.abandoned(), 1);
}

#[tokio::test]
async fn failing_and_panicking_sources_do_not_abort_resolution() {
    let (failing, _) = v4_source(ScriptedDetector::failing(ms(0)), 1.0);
    let (panicking, _) = v4_source(ScriptedDetector::panicking(ms(0)), 1.0);
    let (good, _) = v4_source(ScriptedDetector::reporting("192.0.2.77", 1.0, ms(50)), 1.0);

    let resolution = assert_ok!(
        resolve_sources(vec![failing, panicking, good], IpFamily::V4, ms(2000), 0.6).await
    );

    assert_eq!(resolution.address, ip("192.0.2.77"));
}
