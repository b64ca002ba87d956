//! Contract Test: Configuration and Family Scoping
//!
//! Constraints verified:
//! - Invalid configuration fails before any detector is called
//! - Family filtering scopes the fan-out
//! - Observations of the wrong family are discarded

mod common;

use common::*;
use pubip_core::{Error, IpFamily, ResolveConfig, Resolver, SourceRegistry, resolve_sources};
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn empty_source_list_is_a_config_error() {
    let err = assert_err!(resolve_sources(Vec::new(), IpFamily::V4, ms(1000), 0.6).await);
    assert!(matches!(err, Error::Config(_)), "{err:?}");
}

#[tokio::test]
async fn invalid_threshold_fails_before_network_activity() {
    for threshold in [0.0, -0.5, 1.5, f64::NAN] {
        let (source, counters) =
            v4_source(ScriptedDetector::reporting("192.0.2.1", 1.0, ms(0)), 1.0);

        let err = assert_err!(resolve_sources(vec![source], IpFamily::V4, ms(1000), threshold).await);

        assert!(matches!(err, Error::Config(_)), "{threshold}: {err:?}");
        assert_eq!(counters.calls(), 0, "detector called despite bad threshold");
    }
}

#[tokio::test]
async fn zero_timeout_fails_before_network_activity() {
    let (source, counters) = v4_source(ScriptedDetector::reporting("192.0.2.1", 1.0, ms(0)), 1.0);

    let err = assert_err!(resolve_sources(vec![source], IpFamily::V4, ms(0), 0.6).await);

    assert!(matches!(err, Error::Config(_)), "{err:?}");
    assert_eq!(counters.calls(), 0);
}

#[tokio::test]
async fn threshold_of_one_is_never_exceeded() {
    let (source, _) = v4_source(ScriptedDetector::reporting("192.0.2.1", 1.0, ms(0)), 1.0);

    let err = assert_err!(resolve_sources(vec![source], IpFamily::V4, ms(1000), 1.0).await);
    assert!(err.is_no_consensus());
}

#[tokio::test]
async fn v4_resolution_skips_v6_capable_sources() {
    let (v4_only, v4_counters) =
        source(ScriptedDetector::reporting("192.0.2.1", 1.0, ms(0)), 1.0, true, false);
    let (dual, dual_counters) =
        source(ScriptedDetector::reporting("192.0.2.2", 1.0, ms(0)), 1.0, true, true);
    let resolver = Resolver::new(SourceRegistry::new(vec![v4_only, dual]));

    let resolution = assert_ok!(resolver.resolve(IpFamily::V4, ms(1000), 0.6).await);

    assert_eq!(resolution.address, ip("192.0.2.1"));
    assert_eq!(v4_counters.calls(), 1);
    assert_eq!(dual_counters.calls(), 0);
}

#[tokio::test]
async fn v6_resolution_without_v6_sources_is_a_config_error() {
    let (v4_only, counters) =
        source(ScriptedDetector::reporting("192.0.2.1", 1.0, ms(0)), 1.0, true, false);
    let resolver = Resolver::new(SourceRegistry::new(vec![v4_only]));

    let config = ResolveConfig::new().with_family(IpFamily::V6);
    let err = assert_err!(resolver.resolve_with(&config).await);

    assert!(matches!(err, Error::Config(_)), "{err:?}");
    assert_eq!(counters.calls(), 0);
}

#[tokio::test]
async fn wrong_family_observations_are_discarded() {
    // The dual-stack source answers with IPv4 on a host without IPv6.
    let (dual, _) = source(ScriptedDetector::reporting("192.0.2.1", 1.0, ms(0)), 1.0, true, true);
    let (v6, _) = source(
        ScriptedDetector::reporting("2001:db8::5", 1.0, ms(40)),
        1.0,
        false,
        true,
    );
    let resolver = Resolver::new(SourceRegistry::new(vec![dual, v6]));

    let resolution = assert_ok!(resolver.resolve(IpFamily::V6, ms(1000), 0.6).await);

    assert_eq!(resolution.address, ip("2001:db8::5"));
    assert_eq!(resolution.reports, 1);
}
