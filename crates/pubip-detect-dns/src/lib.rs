// # DNS Detector
//
// This crate provides a DNS-based detector for pubip.
//
// ## Purpose
//
// Some authoritative servers answer a special name with the address the query
// came from (OpenDNS `myip.opendns.com`, Akamai `whoami.akamai.net`, Google
// `o-o.myaddr.l.google.com` as TXT). The query is sent straight to that
// authoritative server, bypassing the system's recursive resolver, which
// would otherwise answer with its own address or a cached one.
//
// ## Confidence
//
// Echo records are moderately trustworthy: plain UDP, no transport security,
// but served by large operators. Every answer scores `DNS_CONFIDENCE`.

use pubip_core::config::{DnsRecordType, SourceConfig};
use pubip_core::registry::DetectorRegistry;
use pubip_core::traits::{Detector, DetectorFactory, Observation};
use pubip_core::{Error, Result};

use hickory_resolver::TokioResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Fixed confidence of a DNS echo answer
pub const DNS_CONFIDENCE: f64 = 0.8;

/// Per-query timeout; the resolver's deadline is normally shorter
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 5;

const KIND: &str = "DNS";

/// DNS echo-record detector
pub struct DnsDetector {
    /// Name to look up
    domain: String,

    /// Authoritative server, as `host:port`
    resolver: String,

    /// Record type to query
    record_type: DnsRecordType,

    /// Per-query timeout
    timeout: Duration,
}

impl DnsDetector {
    /// Create a new DNS detector
    ///
    /// # Parameters
    ///
    /// - `domain`: Echo name (e.g., "myip.opendns.com.")
    /// - `resolver`: Server to ask, as `host:port` (e.g., "resolver1.opendns.com:53")
    /// - `record_type`: A, AAAA or TXT
    pub fn new(domain: impl Into<String>, resolver: impl Into<String>, record_type: DnsRecordType) -> Result<Self> {
        let domain = domain.into();
        let resolver = resolver.into();

        if domain.is_empty() {
            return Err(Error::config("DNS source domain cannot be empty"));
        }
        if !has_port(&resolver) {
            return Err(Error::config(format!(
                "DNS resolver must be given as host:port, got '{}'",
                resolver
            )));
        }

        Ok(Self {
            domain,
            resolver,
            record_type,
            timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        })
    }

    /// Set the per-query timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the authoritative server's own name
    async fn server_address(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host(self.resolver.as_str())
            .await?
            .next()
            .ok_or_else(|| {
                Error::detector(KIND, format!("Resolver {} has no address", self.resolver))
            })
    }

    /// Build a resolver that only talks to `server`
    fn resolver_for(&self, server: SocketAddr) -> TokioResolver {
        let name_servers = NameServerConfigGroup::from_ips_clear(&[server.ip()], server.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], name_servers);

        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout;
        opts.attempts = 1;

        TokioResolver::builder_with_config(config, Default::default())
            .with_options(opts)
            .build()
    }

    async fn lookup(&self, resolver: &TokioResolver) -> Result<IpAddr> {
        let domain = self.domain.as_str();
        let lookup_failed =
            |e: hickory_resolver::ResolveError| Error::detector(KIND, format!("Lookup of {} failed: {}", domain, e));

        match self.record_type {
            DnsRecordType::A => resolver
                .ipv4_lookup(domain)
                .await
                .map_err(lookup_failed)?
                .iter()
                .next()
                .map(|a| IpAddr::V4(a.0))
                .ok_or_else(|| Error::not_retrieved(format!("No A record for {}", domain))),
            DnsRecordType::Aaaa => resolver
                .ipv6_lookup(domain)
                .await
                .map_err(lookup_failed)?
                .iter()
                .next()
                .map(|aaaa| IpAddr::V6(aaaa.0))
                .ok_or_else(|| Error::not_retrieved(format!("No AAAA record for {}", domain))),
            DnsRecordType::Txt => {
                let records = resolver.txt_lookup(domain).await.map_err(lookup_failed)?;
                records
                    .iter()
                    .find_map(|txt| address_from_txt(txt.txt_data()))
                    .ok_or_else(|| Error::not_retrieved(format!("No address in TXT records of {}", domain)))
            }
        }
    }
}

impl fmt::Display for DnsDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({:?})", self.domain, self.resolver, self.record_type)
    }
}

#[async_trait::async_trait]
impl Detector for DnsDetector {
    async fn retrieve(&self) -> Result<Observation> {
        let server = self.server_address().await?;
        trace!(domain = %self.domain, %server, "Querying echo record");

        let resolver = self.resolver_for(server);
        let address = self.lookup(&resolver).await?;

        Ok(Observation::new(address, DNS_CONFIDENCE))
    }

    fn kind(&self) -> &'static str {
        KIND
    }
}

/// Join the character strings of one TXT record and parse them as an address
fn address_from_txt<T: AsRef<[u8]>>(chunks: &[T]) -> Option<IpAddr> {
    let text: String = chunks
        .iter()
        .map(|chunk| String::from_utf8_lossy(chunk.as_ref()))
        .collect();

    text.trim().trim_matches('"').trim().parse().ok()
}

fn has_port(endpoint: &str) -> bool {
    endpoint
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
}

/// Factory for creating DNS detectors
pub struct DnsFactory;

impl DetectorFactory for DnsFactory {
    fn create(&self, config: &SourceConfig) -> Result<Arc<dyn Detector>> {
        match config {
            SourceConfig::Dns {
                domain,
                resolver,
                record_type,
            } => Ok(Arc::new(DnsDetector::new(
                domain.clone(),
                resolver.clone(),
                *record_type,
            )?)),
            _ => Err(Error::config("Invalid config for DNS detector")),
        }
    }
}

/// Register the DNS detector with a registry
pub fn register(registry: &DetectorRegistry) {
    registry.register_detector("dns", Box::new(DnsFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;
    use tokio_test::assert_ok;

    const TYPE_A: u16 = 1;
    const TYPE_TXT: u16 = 16;

    /// Answer every query on a loopback UDP socket with one record of type
    /// `rtype` carrying `rdata`. Returns the server as `host:port`.
    async fn serve_dns(rtype: u16, rdata: Vec<u8>) -> String {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
                let query = &buf[..n];

                // Question: labels up to the root byte, then type and class.
                let mut end = 12;
                while query[end] != 0 {
                    end += 1 + query[end] as usize;
                }
                let question = &query[12..end + 5];

                let mut reply = Vec::with_capacity(n + 16 + rdata.len());
                reply.extend_from_slice(&query[..2]);
                reply.extend_from_slice(&[0x81, 0x80, 0, 1, 0, 1, 0, 0, 0, 0]);
                reply.extend_from_slice(question);
                reply.extend_from_slice(&[0xc0, 0x0c]);
                reply.extend_from_slice(&rtype.to_be_bytes());
                reply.extend_from_slice(&1u16.to_be_bytes());
                reply.extend_from_slice(&60u32.to_be_bytes());
                reply.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
                reply.extend_from_slice(&rdata);

                socket.send_to(&reply, peer).await.unwrap();
            }
        });

        addr.to_string()
    }

    #[test]
    fn txt_chunks_are_joined_and_unquoted() {
        let chunks: [&[u8]; 2] = [b"203.0.", b"113.9"];
        assert_eq!(address_from_txt(&chunks), Some("203.0.113.9".parse().unwrap()));

        let quoted: [&[u8]; 1] = [b"\"2001:db8::42\""];
        assert_eq!(address_from_txt(&quoted), Some("2001:db8::42".parse().unwrap()));
    }

    #[test]
    fn non_address_txt_is_skipped() {
        let chunks: [&[u8]; 1] = [b"edns0-client-subnet 198.51.100.0/24"];
        assert_eq!(address_from_txt(&chunks), None);
    }

    #[test]
    fn resolver_endpoint_needs_a_port() {
        assert!(has_port("resolver1.opendns.com:53"));
        assert!(has_port("[2001:db8::53]:53"));
        assert!(!has_port("resolver1.opendns.com"));
        assert!(!has_port(":53"));

        assert!(DnsDetector::new("myip.opendns.com.", "resolver1.opendns.com", DnsRecordType::A).is_err());
        assert!(DnsDetector::new("", "resolver1.opendns.com:53", DnsRecordType::A).is_err());
    }

    #[test]
    fn test_factory_creation() {
        let factory = DnsFactory;

        let config = SourceConfig::Dns {
            domain: "o-o.myaddr.l.google.com.".to_string(),
            resolver: "ns1.google.com:53".to_string(),
            record_type: DnsRecordType::Txt,
        };

        let detector = factory.create(&config).unwrap();
        assert_eq!(detector.kind(), "DNS");
        assert_eq!(
            detector.to_string(),
            "o-o.myaddr.l.google.com.@ns1.google.com:53 (Txt)"
        );
    }

    #[tokio::test]
    async fn unresolvable_server_is_a_source_failure() {
        let detector = DnsDetector::new("myip.example.", "resolver.invalid:53", DnsRecordType::A)
            .unwrap()
            .with_timeout(Duration::from_millis(200));

        assert!(detector.retrieve().await.is_err());
    }

    #[tokio::test]
    async fn a_record_answer_is_the_observed_address() {
        let server = serve_dns(TYPE_A, vec![203, 0, 113, 8]).await;
        let detector = DnsDetector::new("myip.example.", server, DnsRecordType::A)
            .unwrap()
            .with_timeout(Duration::from_secs(2));

        let observation = assert_ok!(detector.retrieve().await);

        assert_eq!(observation.address, "203.0.113.8".parse::<IpAddr>().unwrap());
        assert_eq!(observation.confidence, DNS_CONFIDENCE);
    }

    #[tokio::test]
    async fn txt_record_answer_is_parsed_as_an_address() {
        let text = b"198.51.100.4";
        let mut rdata = vec![text.len() as u8];
        rdata.extend_from_slice(text);

        let server = serve_dns(TYPE_TXT, rdata).await;
        let detector = DnsDetector::new("o-o.myaddr.example.", server, DnsRecordType::Txt)
            .unwrap()
            .with_timeout(Duration::from_secs(2));

        let observation = assert_ok!(detector.retrieve().await);

        assert_eq!(observation.address, "198.51.100.4".parse::<IpAddr>().unwrap());
        assert_eq!(observation.confidence, DNS_CONFIDENCE);
    }
}
