//! Minimal embedding example for pubip-core
//!
//! An application plugs in its own detector through a factory, builds a
//! source table with `custom` entries and runs a resolution. No network access
//! is needed: the detectors answer from their configuration after a delay.

use pubip_core::traits::{Detector, DetectorFactory, Observation};
use pubip_core::{
    DetectorRegistry, Error, IpFamily, ResolveConfig, Resolver, Result, SourceConfig, SourceEntry,
    SourceRegistry,
};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Detector that reports a configured address after a configured delay
struct CannedDetector {
    name: String,
    address: IpAddr,
    confidence: f64,
    delay: Duration,
}

impl fmt::Display for CannedDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "canned:{}", self.name)
    }
}

#[async_trait::async_trait]
impl Detector for CannedDetector {
    async fn retrieve(&self) -> Result<Observation> {
        tokio::time::sleep(self.delay).await;
        println!("[{}] answering {}", self, self.address);
        Ok(Observation::new(self.address, self.confidence))
    }

    fn kind(&self) -> &'static str {
        "CANNED"
    }
}

/// Builds `CannedDetector`s from `{ "name", "address", "confidence", "delay_ms" }`
struct CannedFactory;

impl DetectorFactory for CannedFactory {
    fn create(&self, config: &SourceConfig) -> Result<Arc<dyn Detector>> {
        let SourceConfig::Custom { config, .. } = config else {
            return Err(Error::config("Invalid config for canned detector"));
        };

        let field = |key: &str| {
            config
                .get(key)
                .ok_or_else(|| Error::config(format!("canned detector needs '{}'", key)))
        };

        let address = field("address")?
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::config("'address' must be an IP address"))?;

        Ok(Arc::new(CannedDetector {
            name: field("name")?.as_str().unwrap_or("unnamed").to_string(),
            address,
            confidence: field("confidence")?.as_f64().unwrap_or(0.0),
            delay: Duration::from_millis(field("delay_ms")?.as_u64().unwrap_or(0)),
        }))
    }
}

fn canned(name: &str, address: &str, confidence: f64, delay_ms: u64) -> SourceEntry {
    SourceEntry::new(SourceConfig::Custom {
        factory: "canned".to_string(),
        config: serde_json::json!({
            "name": name,
            "address": address,
            "confidence": confidence,
            "delay_ms": delay_ms,
        }),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    println!("=== Embedded pubip-core Example ===\n");

    println!("1. Registering the canned detector factory...");
    let registry = DetectorRegistry::new();
    registry.register_detector("canned", Box::new(CannedFactory));

    println!("2. Building the source table...");
    let entries = vec![
        canned("fast-weak", "203.0.113.10", 0.1, 10),
        canned("liar", "198.51.100.66", 0.4, 20),
        canned("steady", "203.0.113.10", 1.0, 40),
        canned("slow", "203.0.113.10", 1.0, 5_000).with_weight(2.0),
    ];
    let sources = SourceRegistry::from_entries(&entries, &registry)?;
    let resolver = Resolver::new(sources);

    println!("3. Resolving (threshold 0.5, 1s deadline)...\n");
    let config = ResolveConfig::new()
        .with_family(IpFamily::V4)
        .with_threshold(0.5)
        .with_timeout(Duration::from_secs(1));

    let resolution = resolver.resolve_with(&config).await?;

    println!(
        "\n4. Consensus on {} (ratio {:.2} from {} report(s))",
        resolution.address, resolution.ratio, resolution.reports
    );
    println!("   The weak early answer plus the steady one outvoted the liar;\n   the slow source was cancelled before it answered.");

    println!("\n=== Embedding Successful ===");
    Ok(())
}
