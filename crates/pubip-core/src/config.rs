//! Configuration types for public address resolution
//!
//! This module defines the per-call resolution settings, the source table
//! format and the built-in table of public echo services.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::traits::IpFamily;

/// Settings for one resolution call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// Address family to resolve
    #[serde(default)]
    pub family: IpFamily,

    /// Overall deadline shared by every source (in milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Fraction of accumulated confidence an address must exceed, in `(0, 1]`
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl ResolveConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self {
            family: IpFamily::default(),
            timeout_ms: default_timeout_ms(),
            threshold: default_threshold(),
        }
    }

    /// Set the address family
    pub fn with_family(mut self, family: IpFamily) -> Self {
        self.family = family;
        self
    }

    /// Set the overall deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the consensus threshold
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Overall deadline as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        validate_threshold(self.threshold)?;
        validate_timeout(self.timeout())
    }
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn validate_threshold(threshold: f64) -> Result<(), crate::Error> {
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(crate::Error::config(format!(
            "Consensus threshold must be in (0, 1], got {}",
            threshold
        )));
    }
    Ok(())
}

pub(crate) fn validate_timeout(timeout: Duration) -> Result<(), crate::Error> {
    if timeout.is_zero() {
        return Err(crate::Error::config("Resolution timeout must be > 0"));
    }
    Ok(())
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_threshold() -> f64 {
    0.6
}

/// Detector configuration for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// HTTP echo endpoint returning the caller's address as plain text
    Http {
        /// URL to fetch
        url: String,
    },

    /// DNS record that echoes the querying address
    Dns {
        /// Name to look up (e.g. "myip.opendns.com.")
        domain: String,
        /// Authoritative server to ask, as `host:port`
        resolver: String,
        /// Record type to query
        #[serde(default)]
        record_type: DnsRecordType,
    },

    /// STUN binding server
    Stun {
        /// Server URI (`stun:host[:port]` or `stuns:host[:port]`)
        server: String,
        /// Transport for `stun:` URIs (`stuns:` always uses TLS)
        #[serde(default)]
        transport: StunTransport,
    },

    /// Custom detector
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl SourceConfig {
    /// Validate the source configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            SourceConfig::Http { url } => {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(crate::Error::config(format!(
                        "HTTP source URL must use http or https: '{}'",
                        url
                    )));
                }
                Ok(())
            }
            SourceConfig::Dns {
                domain, resolver, ..
            } => {
                if domain.is_empty() {
                    return Err(crate::Error::config("DNS source domain cannot be empty"));
                }
                if resolver.is_empty() {
                    return Err(crate::Error::config("DNS source resolver cannot be empty"));
                }
                Ok(())
            }
            SourceConfig::Stun { server, .. } => {
                if !server.starts_with("stun:") && !server.starts_with("stuns:") {
                    return Err(crate::Error::config(format!(
                        "STUN server must be a stun: or stuns: URI: '{}'",
                        server
                    )));
                }
                Ok(())
            }
            SourceConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom source factory cannot be empty"));
                }
                Ok(())
            }
        }
    }

    /// Get the detector type name used to look up a factory
    pub fn type_name(&self) -> &str {
        match self {
            SourceConfig::Http { .. } => "http",
            SourceConfig::Dns { .. } => "dns",
            SourceConfig::Stun { .. } => "stun",
            SourceConfig::Custom { factory, .. } => factory,
        }
    }
}

/// DNS record type queried by a DNS source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsRecordType {
    /// Address record (IPv4)
    #[default]
    A,
    /// Address record (IPv6)
    Aaaa,
    /// Text record containing the address
    Txt,
}

/// Transport used to reach a STUN server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StunTransport {
    /// Datagrams
    #[default]
    Udp,
    /// Stream framing over TCP
    Tcp,
    /// Stream framing over TLS
    Tls,
}

/// One entry of the source table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Detector configuration
    #[serde(flatten)]
    pub detector: SourceConfig,

    /// Trust multiplier, must be > 0
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Source can report IPv4 addresses
    #[serde(default = "default_ipv4")]
    pub ipv4: bool,

    /// Source can report IPv6 addresses
    #[serde(default)]
    pub ipv6: bool,
}

impl SourceEntry {
    /// Create an IPv4-only entry with weight 1.0
    pub fn new(detector: SourceConfig) -> Self {
        Self {
            detector,
            weight: default_weight(),
            ipv4: true,
            ipv6: false,
        }
    }

    /// Set the weight
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Set the address families the source can report
    pub fn with_families(mut self, ipv4: bool, ipv6: bool) -> Self {
        self.ipv4 = ipv4;
        self.ipv6 = ipv6;
        self
    }
}

fn default_weight() -> f64 {
    1.0
}

fn default_ipv4() -> bool {
    true
}

/// Load a source table from a JSON file
///
/// The file holds an array of [`SourceEntry`] objects, e.g.
///
/// ```json
/// [
///   { "type": "http", "url": "https://icanhazip.com", "ipv6": true },
///   { "type": "stun", "server": "stun:stun.l.google.com:19302", "weight": 0.5 }
/// ]
/// ```
pub fn load_sources(path: impl AsRef<Path>) -> Result<Vec<SourceEntry>, crate::Error> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let entries: Vec<SourceEntry> = serde_json::from_str(&raw)?;

    for entry in &entries {
        entry.detector.validate()?;
    }

    Ok(entries)
}

fn http(url: &str, ipv6: bool) -> SourceEntry {
    SourceEntry::new(SourceConfig::Http {
        url: url.to_string(),
    })
    .with_families(true, ipv6)
}

fn dns(domain: &str, resolver: &str, record_type: DnsRecordType, ipv6: bool) -> SourceEntry {
    SourceEntry::new(SourceConfig::Dns {
        domain: domain.to_string(),
        resolver: resolver.to_string(),
        record_type,
    })
    .with_families(true, ipv6)
}

fn stun(server: &str, transport: StunTransport, ipv6: bool) -> SourceEntry {
    SourceEntry::new(SourceConfig::Stun {
        server: server.to_string(),
        transport,
    })
    .with_families(true, ipv6)
}

/// Built-in table of public echo services
pub fn default_sources() -> Vec<SourceEntry> {
    use DnsRecordType::{A, Txt};
    use StunTransport::{Tcp, Tls, Udp};

    vec![
        http("http://inet-ip.info/ip", false),
        http("http://whatismyip.akamai.com/", false),
        http("https://ipecho.net/plain", false),
        http("https://eth0.me/", false),
        http("https://ifconfig.me/ip", false),
        http("https://checkip.amazonaws.com/", false),
        http("https://wgetip.com/", true),
        http("https://ip.tyk.nu/", false),
        http("https://l2.io/ip", false),
        http("https://api.ipify.org/", false),
        http("https://myexternalip.com/raw", false),
        // https://major.io/icanhazip-com-faq/
        http("https://icanhazip.com", true),
        http("https://ifconfig.io/ip", true),
        http("https://ifconfig.co/ip", false),
        http("https://ipinfo.io/ip", false),
        http("https://wtfismyip.com/text", false),
        http("https://secure.internode.on.net/webtools/showmyip?textonly=1", false),
        dns("myip.opendns.com.", "resolver1.opendns.com:53", A, false),
        dns("myip.opendns.com.", "resolver2.opendns.com:53", A, false),
        dns("myip.opendns.com.", "resolver3.opendns.com:53", A, false),
        dns("myip.opendns.com.", "resolver4.opendns.com:53", A, false),
        dns("whoami.akamai.net.", "ns1-1.akamaitech.net:53", A, false),
        dns("whoami.ultradns.net.", "pdns1.ultradns.net:53", A, false),
        dns("o-o.myaddr.l.google.com.", "ns1.google.com:53", Txt, true),
        stun("stun:stun.l.google.com:19302", Udp, false),
        stun("stun:stun1.l.google.com:19302", Udp, false),
        stun("stun:stun2.l.google.com:19302", Udp, false),
        stun("stun:stun3.l.google.com:19302", Udp, false),
        stun("stun:stun4.l.google.com:19302", Udp, false),
        stun("stun:stun.aa.net.uk:3478", Udp, false),
        stun("stun:stun.hoiio.com:3478", Udp, false),
        stun("stun:stun.acrobits.cz:3478", Udp, false),
        stun("stun:stun.voip.blackberry.com:3478", Tcp, false),
        stun("stun:stun.sip.us:3478", Udp, false),
        stun("stun:stun.stunprotocol.org:3478", Tcp, true),
        stun("stun:stun.antisip.com:3478", Tcp, false),
        stun("stun:stun.avigora.fr:3478", Tcp, false),
        stun("stun:stun.linphone.org:3478", Udp, false),
        stun("stun:stun.12connect.com:3478", Tcp, false),
        stun("stun:stun.voipgate.com:3478", Udp, false),
        stun("stun:stun.cope.es:3478", Udp, false),
        stun("stun:stun.bluesip.net:3478", Udp, false),
        stun("stun:stun.sippeer.dk:3478", Udp, false),
        stun("stun:stun.solcon.nl:3478", Udp, false),
        stun("stun:stun.sovtest.ru:3478", Tcp, false),
        stun("stun:stun.sipnet.net:3478", Tcp, false),
        stun("stun:stun.uls.co.za:3478", Udp, false),
        stun("stuns:stun.sipnet.ru:5349", Tls, false),
    ]
}
