// # Detector Trait
//
// Defines the interface for a single retrieval strategy that asks one external
// service what this host's public address is.
//
// ## Implementations
//
// - HTTP echo endpoints: `pubip-detect-http` crate
// - DNS "whoami" records: `pubip-detect-dns` crate
// - STUN binding servers: `pubip-detect-stun` crate
//
// ## Usage
//
// ```rust,ignore
// use pubip_core::Detector;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let detector = /* Detector implementation */;
//
//     let observation = detector.retrieve().await?;
//     println!("{} says {} (confidence {})", detector, observation.address, observation.confidence);
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Address family a resolution is run for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    /// IPv4 only
    #[default]
    V4,
    /// IPv6
    V6,
}

impl IpFamily {
    /// Family of a concrete address
    pub fn of(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }

    /// Whether `address` belongs to this family
    pub fn matches(&self, address: &IpAddr) -> bool {
        Self::of(address) == *self
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => f.write_str("v4"),
            IpFamily::V6 => f.write_str("v6"),
        }
    }
}

impl std::str::FromStr for IpFamily {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v4" | "ipv4" | "4" => Ok(IpFamily::V4),
            "v6" | "ipv6" | "6" => Ok(IpFamily::V6),
            other => Err(crate::Error::invalid_input(format!(
                "Unknown address family '{}', expected v4 or v6",
                other
            ))),
        }
    }
}

/// One raw answer from one detector call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Reported address, in canonical form
    pub address: IpAddr,
    /// Quality of this particular retrieval, in `[0, 1]`
    pub confidence: f64,
}

impl Observation {
    /// Create an observation.
    ///
    /// IPv4-mapped IPv6 addresses are folded to plain IPv4 and the confidence
    /// is clamped into `[0, 1]` (NaN becomes 0).
    pub fn new(address: IpAddr, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        Self {
            address: address.to_canonical(),
            confidence,
        }
    }
}

/// Trait for detector implementations
///
/// A detector performs exactly one retrieval per [`Detector::retrieve`] call
/// and reports a single observation or an error.
///
/// Implementations must be thread-safe; the resolver shares one detector
/// across every resolution call via `Arc`.
///
/// ## Cancellation
///
/// The resolver races `retrieve()` against its shared deadline and its
/// cancellation signal and drops the future when either fires. Implementations
/// must therefore keep all in-flight I/O inside the returned future (no
/// detached tasks), so dropping it abandons the connection.
///
/// ## Display
///
/// The `Display` impl is the human-readable endpoint (URL, `domain@resolver`,
/// STUN URI) used in logs.
#[async_trait]
pub trait Detector: fmt::Display + Send + Sync {
    /// Perform one retrieval
    ///
    /// # Returns
    ///
    /// - `Ok(Observation)`: The address this source reported
    /// - `Err(Error)`: The source failed; the resolver logs and ignores it
    async fn retrieve(&self) -> Result<Observation, crate::Error>;

    /// Protocol label ("HTTP", "DNS", "STUN", ...)
    fn kind(&self) -> &'static str;
}

/// Helper trait for constructing detectors from configuration
pub trait DetectorFactory: Send + Sync {
    /// Create a detector from a source configuration
    ///
    /// # Returns
    ///
    /// A shareable detector, or a configuration error if `config` is not a
    /// variant this factory understands
    fn create(
        &self,
        config: &crate::config::SourceConfig,
    ) -> Result<std::sync::Arc<dyn Detector>, crate::Error>;
}
