//! One-shot DNS-over-UDP exchange (RFC 1035 §4.2.1). Messages are sent
//! as-is; a truncated response tells the caller to retry over TCP.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, warn};
use warden_dns_domain::DnsError;

/// Maximum UDP DNS response size with EDNS(0).
const MAX_UDP_RESPONSE_SIZE: usize = 4096;

pub async fn exchange(
    server_addr: SocketAddr,
    message_bytes: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>, DnsError> {
    let server = server_addr.to_string();

    let bind_addr: SocketAddr = if server_addr.is_ipv4() {
        "0.0.0.0:0".parse().expect("static address")
    } else {
        "[::]:0".parse().expect("static address")
    };

    let socket = UdpSocket::bind(bind_addr).await.map_err(|e| DnsError::TransportIo {
        server: server.clone(),
        details: format!("Failed to bind UDP socket: {e}"),
    })?;

    tokio::time::timeout(timeout, socket.send_to(message_bytes, server_addr))
        .await
        .map_err(|_| DnsError::Timeout {
            server: server.clone(),
        })?
        .map_err(|e| DnsError::TransportIo {
            server: server.clone(),
            details: format!("Failed to send UDP query: {e}"),
        })?;

    let mut recv_buf = vec![0u8; MAX_UDP_RESPONSE_SIZE];
    let (bytes_received, from_addr) =
        tokio::time::timeout(timeout, socket.recv_from(&mut recv_buf))
            .await
            .map_err(|_| DnsError::Timeout {
                server: server.clone(),
            })?
            .map_err(|e| DnsError::TransportIo {
                server: server.clone(),
                details: format!("Failed to receive UDP response: {e}"),
            })?;

    if from_addr.ip() != server_addr.ip() {
        warn!(
            expected = %server_addr,
            received_from = %from_addr,
            "UDP response from unexpected source"
        );
    }

    recv_buf.truncate(bytes_received);
    debug!(server = %server_addr, bytes_received, "UDP response received");
    Ok(recv_buf)
}
