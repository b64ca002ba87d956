//! Binding exchanges over UDP, TCP and TLS

use crate::KIND;
use crate::message::{HEADER_LEN, Message, body_length};
use pubip_core::{Error, Result};

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use rustls::RootCertStore;
use rustls::pki_types::ServerName;
use tracing::trace;

/// Initial retransmission timeout (RFC 5389 section 7.2.1)
pub const INITIAL_RTO: Duration = Duration::from_millis(500);

/// Total number of UDP transmissions before giving up
const MAX_UDP_ATTEMPTS: u32 = 7;

const MAX_DATAGRAM: usize = 1500;

/// Send `request` over UDP, retransmitting with a doubling timeout until a
/// response carrying the same transaction id arrives
pub async fn exchange_udp(server: SocketAddr, request: &Message, initial_rto: Duration) -> Result<Message> {
    let local: SocketAddr = if server.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(local).await?;
    socket.connect(server).await?;

    let bytes = request.encode();
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut rto = initial_rto;

    for attempt in 1..=MAX_UDP_ATTEMPTS {
        trace!(%server, attempt, ?rto, "Sending binding request");
        socket.send(&bytes).await?;

        let retransmit_at = Instant::now() + rto;
        loop {
            let received = match tokio::time::timeout_at(retransmit_at, socket.recv(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => break,
            };

            match Message::decode(&buf[..received]) {
                Ok(message) if message.transaction_id == request.transaction_id => return Ok(message),
                Ok(_) => trace!(%server, "Ignoring response to another transaction"),
                Err(e) => trace!(%server, error = %e, "Ignoring malformed datagram"),
            }
        }

        rto *= 2;
    }

    Err(Error::detector(
        KIND,
        format!("No response from {} after {} attempts", server, MAX_UDP_ATTEMPTS),
    ))
}

/// Send `request` over a fresh TCP connection
pub async fn exchange_tcp(server: SocketAddr, request: &Message) -> Result<Message> {
    let mut stream = TcpStream::connect(server).await?;
    exchange_stream(&mut stream, request).await
}

/// Send `request` over TLS, verifying the server certificate against `host`
pub async fn exchange_tls(server: SocketAddr, host: &str, request: &Message) -> Result<Message> {
    exchange_tls_with_roots(server, host, request, webpki_roots()).await
}

/// As [`exchange_tls`], trusting only the anchors in `roots`
pub async fn exchange_tls_with_roots(
    server: SocketAddr,
    host: &str,
    request: &Message,
    roots: RootCertStore,
) -> Result<Message> {
    let name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::config(format!("Invalid TLS server name '{}': {}", host, e)))?;

    let tcp = TcpStream::connect(server).await?;
    let mut stream = tls_connector(roots)?.connect(name, tcp).await?;

    exchange_stream(&mut stream, request).await
}

/// Stream framing: the header's length field delimits each message
async fn exchange_stream<S>(stream: &mut S, request: &Message) -> Result<Message>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&request.encode()).await?;
    stream.flush().await?;

    loop {
        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).await?;
        let body_len = body_length(&header)?;

        let mut frame = Vec::with_capacity(HEADER_LEN + body_len);
        frame.extend_from_slice(&header);
        frame.resize(HEADER_LEN + body_len, 0);
        stream.read_exact(&mut frame[HEADER_LEN..]).await?;

        let message = Message::decode(&frame)?;
        if message.transaction_id == request.transaction_id {
            return Ok(message);
        }
        trace!("Ignoring response to another transaction");
    }
}

fn webpki_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

fn tls_connector(roots: RootCertStore) -> Result<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::detector(KIND, format!("TLS setup failed: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}
