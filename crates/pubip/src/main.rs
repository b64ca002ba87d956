// # pubip - Public Address Resolver
//
// This binary is a thin shell over pubip-core:
// 1. Reading configuration from environment variables
// 2. Registering the detector crates
// 3. Building the source table (built-in or from a JSON file)
// 4. Running one resolution and printing the agreed address
//
// ## Configuration
//
// - `PUBIP_FAMILY`: Address family to resolve (v4, v6); default v4
// - `PUBIP_TIMEOUT_MS`: Deadline shared by every source; default 3000
// - `PUBIP_THRESHOLD`: Consensus threshold in (0, 1]; default 0.6
// - `PUBIP_SOURCES_FILE`: JSON source table replacing the built-in one
// - `PUBIP_SHOW_INTERNAL`: Also print the interface-assigned private address
// - `PUBIP_LOG_LEVEL`: trace, debug, info, warn, error; default warn
//
// ## Example
//
// ```bash
// PUBIP_FAMILY=v6 PUBIP_THRESHOLD=0.8 PUBIP_LOG_LEVEL=debug pubip
// ```
//
// The address goes to stdout; logs go to stderr.

use anyhow::{Context, Result};
use pubip_core::config::{default_sources, load_sources};
use pubip_core::{DetectorRegistry, IpFamily, ResolveConfig, Resolver, SourceEntry, SourceRegistry};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Exit codes for different termination scenarios
#[derive(Debug, Clone, Copy)]
enum PubipExitCode {
    /// An address was resolved
    Success = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// No consensus, timeout, or runtime failure
    ResolutionError = 2,
}

impl From<PubipExitCode> for ExitCode {
    fn from(code: PubipExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    resolve: ResolveConfig,
    sources_file: Option<PathBuf>,
    show_internal: bool,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let mut resolve = ResolveConfig::new();

        if let Some(family) = non_empty_var("PUBIP_FAMILY") {
            resolve = resolve.with_family(family.parse().map_err(|e| {
                anyhow::anyhow!("PUBIP_FAMILY '{}' is not valid: {}", family, e)
            })?);
        }

        if let Some(timeout) = non_empty_var("PUBIP_TIMEOUT_MS") {
            let ms: u64 = timeout
                .parse()
                .with_context(|| format!("PUBIP_TIMEOUT_MS must be milliseconds, got '{}'", timeout))?;
            resolve = resolve.with_timeout(Duration::from_millis(ms));
        }

        if let Some(threshold) = non_empty_var("PUBIP_THRESHOLD") {
            let value: f64 = threshold
                .parse()
                .with_context(|| format!("PUBIP_THRESHOLD must be a number, got '{}'", threshold))?;
            resolve = resolve.with_threshold(value);
        }

        Ok(Self {
            resolve,
            sources_file: non_empty_var("PUBIP_SOURCES_FILE").map(PathBuf::from),
            show_internal: non_empty_var("PUBIP_SHOW_INTERNAL")
                .is_some_and(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on")),
            log_level: env::var("PUBIP_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string()),
        })
    }

    /// Validate the configuration before any network activity
    fn validate(&self) -> Result<()> {
        self.resolve.validate()?;

        if let Some(ref path) = self.sources_file
            && !path.is_file()
        {
            anyhow::bail!("PUBIP_SOURCES_FILE does not exist: {}", path.display());
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "PUBIP_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn main() -> ExitCode {
    let config = match Config::from_env().and_then(|c| c.validate().map(|()| c)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return PubipExitCode::ConfigError.into();
        }
    };

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return PubipExitCode::ConfigError.into();
    }

    let resolver = match build_resolver(&config) {
        Ok(resolver) => resolver,
        Err(e) => {
            error!("{:#}", e);
            return PubipExitCode::ConfigError.into();
        }
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return PubipExitCode::ResolutionError.into();
        }
    };

    rt.block_on(run(resolver, config)).into()
}

/// Register detectors and build the source table
fn build_resolver(config: &Config) -> Result<Resolver> {
    let registry = DetectorRegistry::new();

    #[cfg(feature = "http")]
    pubip_detect_http::register(&registry);

    #[cfg(feature = "dns")]
    pubip_detect_dns::register(&registry);

    #[cfg(feature = "stun")]
    pubip_detect_stun::register(&registry);

    let mut entries = match config.sources_file {
        Some(ref path) => load_sources(path)
            .with_context(|| format!("Failed to load sources from {}", path.display()))?,
        None => default_sources(),
    };

    entries.retain(|entry: &SourceEntry| {
        let known = registry.has_detector(entry.detector.type_name());
        if !known {
            warn!(
                "Skipping {} source: detector not compiled in",
                entry.detector.type_name()
            );
        }
        known
    });

    let sources = SourceRegistry::from_entries(&entries, &registry)?;
    info!("Loaded {} source(s)", sources.len());

    Ok(Resolver::new(sources))
}

async fn run(resolver: Resolver, config: Config) -> PubipExitCode {
    let family = config.resolve.family;

    let resolution = match resolver.resolve_with(&config.resolve).await {
        Ok(resolution) => resolution,
        Err(e) if e.is_no_consensus() => {
            error!("{}", e);
            return PubipExitCode::ResolutionError;
        }
        Err(e) => {
            error!("Resolution failed: {}", e);
            return match e {
                pubip_core::Error::Config(_) => PubipExitCode::ConfigError,
                _ => PubipExitCode::ResolutionError,
            };
        }
    };

    debug!(
        ratio = resolution.ratio,
        reports = resolution.reports,
        "Consensus reached"
    );
    println!("{}", resolution.address);

    if config.show_internal {
        print_internal(family);
    }

    PubipExitCode::Success
}

fn print_internal(family: IpFamily) {
    match pubip_local::private_address(family) {
        Ok(address) => println!("{}", address),
        Err(e) => warn!("No internal address: {}", e),
    }
}
