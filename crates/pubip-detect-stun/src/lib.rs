// # STUN Detector
//
// This crate provides a STUN-based detector for pubip.
//
// ## Purpose
//
// A STUN server answers a Binding request with the transport address it saw
// the request arrive from (the server-reflexive address). Behind a NAT this is
// the public address of the outermost NAT.
//
// ## Transports
//
// - `stun:` over UDP (default), with RFC 5389 retransmission
// - `stun:` over TCP
// - `stuns:` always over TLS, verified against the webpki root store
//
// ## Confidence
//
// Reflexive addresses come from unauthenticated servers, usually over UDP.
// Every answer scores `STUN_CONFIDENCE`.

pub mod message;
pub mod transport;
pub mod uri;

use pubip_core::config::{SourceConfig, StunTransport};
use pubip_core::registry::DetectorRegistry;
use pubip_core::traits::{Detector, DetectorFactory, Observation};
use pubip_core::{Error, Result};

use message::{Message, MessageType, StunError};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;
use uri::StunServer;

/// Fixed confidence of a STUN reflexive address
pub const STUN_CONFIDENCE: f64 = 0.8;

pub(crate) const KIND: &str = "STUN";

impl From<StunError> for Error {
    fn from(err: StunError) -> Self {
        match err {
            StunError::NoMappedAddress => Error::not_retrieved(err.to_string()),
            other => Error::detector(KIND, other.to_string()),
        }
    }
}

/// STUN binding detector
pub struct StunDetector {
    server: StunServer,
    transport: StunTransport,
    initial_rto: Duration,
}

impl StunDetector {
    /// Create a new STUN detector
    ///
    /// # Parameters
    ///
    /// - `uri`: Server URI (e.g., "stun:stun.l.google.com:19302")
    /// - `transport`: Transport for `stun:` URIs; `stuns:` implies TLS
    pub fn new(uri: &str, transport: StunTransport) -> Result<Self> {
        let server = StunServer::parse(uri)?;
        let transport = if server.secure {
            StunTransport::Tls
        } else {
            transport
        };

        Ok(Self {
            server,
            transport,
            initial_rto: transport::INITIAL_RTO,
        })
    }

    /// Override the first UDP retransmission timeout
    pub fn with_initial_rto(mut self, rto: Duration) -> Self {
        self.initial_rto = rto;
        self
    }

    /// The effective transport
    pub fn transport(&self) -> StunTransport {
        self.transport
    }

    async fn server_address(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host((self.server.host.as_str(), self.server.port))
            .await?
            .next()
            .ok_or_else(|| Error::detector(KIND, format!("{} has no address", self.server.host)))
    }
}

impl fmt::Display for StunDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.server, self.transport)
    }
}

#[async_trait::async_trait]
impl Detector for StunDetector {
    async fn retrieve(&self) -> Result<Observation> {
        let server = self.server_address().await?;
        let request = Message::binding_request();

        let response = match self.transport {
            StunTransport::Udp => transport::exchange_udp(server, &request, self.initial_rto).await?,
            StunTransport::Tcp => transport::exchange_tcp(server, &request).await?,
            StunTransport::Tls => transport::exchange_tls(server, &self.server.host, &request).await?,
        };

        if response.message_type == MessageType::BindingError {
            let (code, reason) = response.error_code().unwrap_or((0, "no error code"));
            return Err(StunError::ErrorResponse {
                code,
                reason: reason.to_string(),
            }
            .into());
        }

        let mapped = response.mapped_address().ok_or(StunError::NoMappedAddress)?;
        trace!(server = %self.server, %mapped, "Binding response");

        Ok(Observation::new(mapped.ip(), STUN_CONFIDENCE))
    }

    fn kind(&self) -> &'static str {
        KIND
    }
}

/// Factory for creating STUN detectors
pub struct StunFactory;

impl DetectorFactory for StunFactory {
    fn create(&self, config: &SourceConfig) -> Result<Arc<dyn Detector>> {
        match config {
            SourceConfig::Stun { server, transport } => {
                Ok(Arc::new(StunDetector::new(server, *transport)?))
            }
            _ => Err(Error::config("Invalid config for STUN detector")),
        }
    }
}

/// Register the STUN detector with a registry
pub fn register(registry: &DetectorRegistry) {
    registry.register_detector("stun", Box::new(StunFactory));
}
