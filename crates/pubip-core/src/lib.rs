// # pubip-core
//
// Core library for determining a host's public address from many independent,
// individually unreliable sources.
//
// ## Architecture Overview
//
// - **Detector**: Trait for one retrieval strategy (HTTP echo, DNS whoami, STUN)
// - **Scoring**: Converts a detector's confidence into a weighted contribution
// - **SourceRegistry**: Immutable table of detectors with weight and family
// - **DetectorRegistry**: Plugin-based registry of detector factories
// - **Resolver**: Concurrent fan-out with early termination on consensus
//
// ## Design Principles
//
// 1. **Fail soft per source**: A failing source is logged and ignored
// 2. **Fail loud at the boundary**: Only configuration errors and missing
//    consensus reach the caller
// 3. **Plugin-Based**: Detector crates register factories, no hard-coded if-else
// 4. **Library-First**: The binary is a thin shell over this crate
// 5. **No shared mutable state**: Workers talk to the aggregator over a channel

pub mod traits;
pub mod scoring;
pub mod registry;
pub mod resolver;
pub mod config;
pub mod error;

// Re-export core types for convenience
pub use traits::{Detector, DetectorFactory, IpFamily, Observation};
pub use scoring::{Score, ScoredObservation};
pub use registry::{DetectorRegistry, SourceDescriptor, SourceRegistry};
pub use resolver::{AggregateEntry, Resolution, Resolver, resolve_sources};
pub use config::{DnsRecordType, ResolveConfig, SourceConfig, SourceEntry, StunTransport};
pub use error::{Error, Result};
