//! Core traits for public address resolution
//!
//! - [`Detector`]: Ask one external service for this host's address
//! - [`DetectorFactory`]: Build detectors from configuration

pub mod detector;

pub use detector::{Detector, DetectorFactory, IpFamily, Observation};
