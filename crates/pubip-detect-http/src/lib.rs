// # HTTP Detector
//
// This crate provides an HTTP-based detector for pubip.
//
// ## Purpose
//
// Asks a plain-text echo service (e.g. icanhazip.com, api.ipify.org) for the
// caller's address. The body is trimmed and parsed as an address literal.
//
// ## Confidence
//
// Confidence follows the transport security of the connection that produced
// the answer. Plain HTTP is easy to tamper with or serve from a stale cache,
// so it scores 0.1; TLS scores by protocol version, 1.0 for TLS 1.3 down in
// steps of 0.2.
//
// The detector negotiates with a TLS 1.3-only client first and falls back to
// a client capped at TLS 1.2 only when the TLS handshake itself fails, so the
// version it scores is the version it actually used.

use pubip_core::config::SourceConfig;
use pubip_core::registry::DetectorRegistry;
use pubip_core::traits::{Detector, DetectorFactory, Observation};
use pubip_core::{Error, Result};

use reqwest::tls::Version;
use reqwest::{Certificate, Client, Url};
use std::error::Error as StdError;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Per-request timeout; the resolver's deadline is normally shorter
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

const KIND: &str = "HTTP";

/// TLS protocol version of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    /// TLS 1.3
    Tls13,
    /// TLS 1.2
    Tls12,
    /// TLS 1.1
    Tls11,
    /// TLS 1.0
    Tls10,
    /// Anything older or unrecognized
    Other,
}

/// Security tier of the connection an answer arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSecurity {
    /// No encryption
    Plain,
    /// TLS with the negotiated version
    Tls(TlsVersion),
}

impl TransportSecurity {
    /// Security of a response fetched from `url` over a client that
    /// negotiated `version` for TLS connections
    pub fn of(url: &Url, version: TlsVersion) -> Self {
        if url.scheme() == "https" {
            TransportSecurity::Tls(version)
        } else {
            TransportSecurity::Plain
        }
    }

    /// Confidence of a single answer received over this transport
    pub fn confidence(&self) -> f64 {
        match self {
            TransportSecurity::Plain => 0.1,
            TransportSecurity::Tls(TlsVersion::Tls13) => 1.0,
            TransportSecurity::Tls(TlsVersion::Tls12) => 0.8,
            TransportSecurity::Tls(TlsVersion::Tls11) => 0.6,
            TransportSecurity::Tls(TlsVersion::Tls10) => 0.4,
            TransportSecurity::Tls(TlsVersion::Other) => 0.2,
        }
    }
}

/// HTTP echo-service detector
pub struct HttpDetector {
    /// URL to fetch the address from
    url: Url,

    /// Per-request timeout
    timeout: Duration,

    /// Trust anchors added on top of the built-in roots
    extra_roots: Vec<Certificate>,

    /// Client restricted to TLS 1.3
    modern: Client,

    /// Client capped at TLS 1.2, used when TLS 1.3 cannot be negotiated
    legacy: Client,
}

impl HttpDetector {
    /// Create a new HTTP detector
    ///
    /// # Parameters
    ///
    /// - `url`: Echo endpoint (e.g., "https://api.ipify.org")
    pub fn new(url: &str) -> Result<Self> {
        Self::with_timeout(url, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    /// Create with a custom per-request timeout
    pub fn with_timeout(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::config(format!("Invalid HTTP source URL '{}': {}", url, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "HTTP source URL must use http or https: '{}'",
                url
            )));
        }

        let (modern, legacy) = build_clients(timeout, &[])?;

        Ok(Self {
            url,
            timeout,
            extra_roots: Vec::new(),
            modern,
            legacy,
        })
    }

    /// Also trust the DER-encoded certificate `der` (e.g. a private echo
    /// service behind an internal CA)
    pub fn with_root_certificate(mut self, der: &[u8]) -> Result<Self> {
        let cert = Certificate::from_der(der)
            .map_err(|e| Error::config(format!("Invalid root certificate: {}", e)))?;
        self.extra_roots.push(cert);
        (self.modern, self.legacy) = build_clients(self.timeout, &self.extra_roots)?;
        Ok(self)
    }

    /// The configured endpoint
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Issue the request, downgrading to TLS 1.2 if TLS 1.3 cannot connect
    async fn send(&self) -> Result<(reqwest::Response, TlsVersion)> {
        match self.modern.get(self.url.clone()).send().await {
            Ok(response) => Ok((response, TlsVersion::Tls13)),
            Err(e) if e.is_connect() && is_handshake_failure(&e) => {
                debug!(url = %self.url, error = %e, "TLS 1.3 connection failed, retrying with TLS 1.2");
                let response = self
                    .legacy
                    .get(self.url.clone())
                    .send()
                    .await
                    .map_err(|e| Error::detector(KIND, format!("Request failed: {}", e)))?;
                Ok((response, TlsVersion::Tls12))
            }
            Err(e) => Err(Error::detector(KIND, format!("Request failed: {}", e))),
        }
    }
}

/// Build the TLS 1.3-only and the TLS 1.2-capped clients
fn build_clients(timeout: Duration, extra_roots: &[Certificate]) -> Result<(Client, Client)> {
    let build = |builder: reqwest::ClientBuilder| {
        extra_roots
            .iter()
            .cloned()
            .fold(builder.timeout(timeout), |b, cert| b.add_root_certificate(cert))
            .build()
            .map_err(|e| Error::detector(KIND, format!("Failed to build client: {}", e)))
    };

    let modern = build(Client::builder().min_tls_version(Version::TLS_1_3))?;
    let legacy = build(Client::builder().max_tls_version(Version::TLS_1_2))?;
    Ok((modern, legacy))
}

/// Whether a connect error came out of the TLS handshake.
///
/// Refused connections and DNS failures would fail again over TLS 1.2.
/// tokio-rustls wraps the rustls error in an `io::Error`, whose `source()`
/// skips the wrapped error, so both layers are inspected.
fn is_handshake_failure(err: &reqwest::Error) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if e.is::<rustls::Error>() {
            return true;
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>()
            && io.get_ref().is_some_and(|inner| inner.is::<rustls::Error>())
        {
            return true;
        }
        current = e.source();
    }
    false
}

impl fmt::Display for HttpDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[async_trait::async_trait]
impl Detector for HttpDetector {
    async fn retrieve(&self) -> Result<Observation> {
        let (response, version) = self.send().await?;

        if !response.status().is_success() {
            return Err(Error::detector(
                KIND,
                format!("HTTP error: {}", response.status()),
            ));
        }

        let security = TransportSecurity::of(response.url(), version);

        let body = response
            .text()
            .await
            .map_err(|e| Error::detector(KIND, format!("Failed to read response: {}", e)))?;

        let address = parse_address(&body)?;

        Ok(Observation::new(address, security.confidence()))
    }

    fn kind(&self) -> &'static str {
        KIND
    }
}

/// Parse an echo-service body into an address
fn parse_address(body: &str) -> Result<IpAddr> {
    let text = body.trim();
    text.parse()
        .map_err(|_| Error::not_retrieved(format!("Invalid IP address: {:?}", text)))
}

/// Factory for creating HTTP detectors
pub struct HttpFactory;

impl DetectorFactory for HttpFactory {
    fn create(&self, config: &SourceConfig) -> Result<Arc<dyn Detector>> {
        match config {
            SourceConfig::Http { url } => Ok(Arc::new(HttpDetector::new(url)?)),
            _ => Err(Error::config("Invalid config for HTTP detector")),
        }
    }
}

/// Register the HTTP detector with a registry
pub fn register(registry: &DetectorRegistry) {
    registry.register_detector("http", Box::new(HttpFactory));
}
