//! Source registry and detector factories
//!
//! Two registries live here:
//!
//! - [`DetectorRegistry`] maps detector type names to factories, so detector
//!   crates plug themselves in without hardcoded if-else chains.
//! - [`SourceRegistry`] is the immutable table of configured sources the
//!   resolver fans out over.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pubip_core::config::default_sources;
//! use pubip_core::registry::{DetectorRegistry, SourceRegistry};
//!
//! let factories = DetectorRegistry::new();
//! pubip_detect_http::register(&factories);
//! pubip_detect_dns::register(&factories);
//! pubip_detect_stun::register(&factories);
//!
//! let sources = SourceRegistry::from_entries(&default_sources(), &factories)?;
//! ```

use crate::config::{SourceConfig, SourceEntry};
use crate::error::{Error, Result};
use crate::scoring::ScoredObservation;
use crate::traits::{Detector, DetectorFactory, IpFamily, Observation};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Detector registry for plugin-based detector creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct DetectorRegistry {
    /// Registered detector factories
    detectors: RwLock<HashMap<String, Box<dyn DetectorFactory>>>,
}

impl DetectorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a detector factory
    ///
    /// # Parameters
    ///
    /// - `name`: Detector type name (e.g., "http", "dns", "stun")
    /// - `factory`: Factory object for creating detector instances
    pub fn register_detector(&self, name: impl Into<String>, factory: Box<dyn DetectorFactory>) {
        let mut detectors = self
            .detectors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        detectors.insert(name.into(), factory);
    }

    /// Create a detector from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn Detector>)`: Created detector instance
    /// - `Err(Error)`: If the detector type is not registered or creation fails
    pub fn create_detector(&self, config: &SourceConfig) -> Result<Arc<dyn Detector>> {
        config.validate()?;

        let detector_type = config.type_name();
        let detectors = self
            .detectors
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let factory = detectors
            .get(detector_type)
            .ok_or_else(|| Error::config(format!("Unknown detector type: {}", detector_type)))?;

        factory.create(config)
    }

    /// List all registered detector types
    pub fn list_detectors(&self) -> Vec<String> {
        let detectors = self
            .detectors
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        detectors.keys().cloned().collect()
    }

    /// Check if a detector type is registered
    pub fn has_detector(&self, name: &str) -> bool {
        let detectors = self
            .detectors
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        detectors.contains_key(name)
    }
}

/// A configured source: a detector plus how much to trust it
#[derive(Clone)]
pub struct SourceDescriptor {
    detector: Arc<dyn Detector>,
    weight: f64,
    ipv4: bool,
    ipv6: bool,
}

impl SourceDescriptor {
    /// Create a descriptor
    ///
    /// # Errors
    ///
    /// `Error::Config` if `weight` is not a positive finite number or the
    /// source applies to neither family.
    pub fn new(detector: Arc<dyn Detector>, weight: f64, ipv4: bool, ipv6: bool) -> Result<Self> {
        if !(weight.is_finite() && weight > 0.0) {
            return Err(Error::config(format!(
                "Source {} has invalid weight {}, must be > 0",
                detector, weight
            )));
        }
        if !ipv4 && !ipv6 {
            return Err(Error::config(format!(
                "Source {} applies to neither IPv4 nor IPv6",
                detector
            )));
        }

        Ok(Self {
            detector,
            weight,
            ipv4,
            ipv6,
        })
    }

    /// The detector behind this source
    pub fn detector(&self) -> &Arc<dyn Detector> {
        &self.detector
    }

    /// Trust multiplier
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Source can report IPv4 addresses
    pub fn ipv4(&self) -> bool {
        self.ipv4
    }

    /// Source can report IPv6 addresses
    pub fn ipv6(&self) -> bool {
        self.ipv6
    }

    /// Whether this source takes part in a resolution for `family`.
    ///
    /// IPv4 runs only use IPv4-only sources: a dual-stack echo service
    /// answers over whichever family the connection happened to use.
    pub fn applies_to(&self, family: IpFamily) -> bool {
        match family {
            IpFamily::V4 => self.ipv4 && !self.ipv6,
            IpFamily::V6 => self.ipv6,
        }
    }

    /// Weigh one of this source's observations
    pub fn score(&self, observation: Observation) -> ScoredObservation {
        ScoredObservation::new(observation, self.weight)
    }
}

impl fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDescriptor")
            .field("kind", &self.detector.kind())
            .field("endpoint", &self.detector.to_string())
            .field("weight", &self.weight)
            .field("ipv4", &self.ipv4)
            .field("ipv6", &self.ipv6)
            .finish()
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (weight {})", self.detector.kind(), self.detector, self.weight)
    }
}

/// Immutable table of configured sources
///
/// Cloning is cheap; every clone shares the same table.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: Arc<[SourceDescriptor]>,
}

impl SourceRegistry {
    /// Create a registry from descriptors
    pub fn new(sources: Vec<SourceDescriptor>) -> Self {
        Self {
            sources: sources.into(),
        }
    }

    /// Build a registry from configuration entries
    ///
    /// # Errors
    ///
    /// Fails on the first entry whose detector type is unknown, whose
    /// detector cannot be built, or whose weight/families are invalid.
    pub fn from_entries(entries: &[SourceEntry], factories: &DetectorRegistry) -> Result<Self> {
        let sources = entries
            .iter()
            .map(|entry| {
                let detector = factories.create_detector(&entry.detector)?;
                SourceDescriptor::new(detector, entry.weight, entry.ipv4, entry.ipv6)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(sources))
    }

    /// Sources taking part in a resolution for `family`
    pub fn for_family(&self, family: IpFamily) -> Vec<SourceDescriptor> {
        self.sources
            .iter()
            .filter(|source| source.applies_to(family))
            .cloned()
            .collect()
    }

    /// All sources, in registration order
    pub fn iter(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.iter()
    }

    /// Number of registered sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
