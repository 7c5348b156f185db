//! One-shot DNS-over-TCP exchange (RFC 7766): two-byte big-endian length
//! prefix on both directions.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use warden_dns_domain::DnsError;

const MAX_TCP_MESSAGE_SIZE: usize = 65_535;

pub async fn exchange(
    server_addr: SocketAddr,
    message_bytes: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>, DnsError> {
    let server = server_addr.to_string();

    let mut stream = tokio::time::timeout(timeout, TcpStream::connect(server_addr))
        .await
        .map_err(|_| DnsError::Timeout {
            server: server.clone(),
        })?
        .map_err(|e| DnsError::ConnectionRefused {
            server: server.clone(),
            details: e.to_string(),
        })?;

    tokio::time::timeout(timeout, send_with_length_prefix(&mut stream, message_bytes))
        .await
        .map_err(|_| DnsError::Timeout {
            server: server.clone(),
        })?
        .map_err(|e| DnsError::TransportIo {
            server: server.clone(),
            details: format!("Failed to send TCP query: {e}"),
        })?;

    debug!(server = %server_addr, message_len = message_bytes.len(), "TCP query sent");

    let response = tokio::time::timeout(timeout, read_with_length_prefix(&mut stream, &server))
        .await
        .map_err(|_| DnsError::Timeout {
            server: server.clone(),
        })??;

    debug!(server = %server_addr, response_len = response.len(), "TCP response received");
    Ok(response)
}

pub(crate) async fn send_with_length_prefix<S>(
    stream: &mut S,
    message_bytes: &[u8],
) -> Result<(), std::io::Error>
where
    S: AsyncWriteExt + Unpin,
{
    let length = message_bytes.len() as u16;
    stream.write_all(&length.to_be_bytes()).await?;
    stream.write_all(message_bytes).await?;
    stream.flush().await
}

pub(crate) async fn read_with_length_prefix<S>(
    stream: &mut S,
    server: &str,
) -> Result<Vec<u8>, DnsError>
where
    S: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; 2];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| DnsError::TransportIo {
            server: server.to_string(),
            details: format!("Failed to read response length: {e}"),
        })?;

    let response_len = u16::from_be_bytes(len_buf) as usize;
    if response_len > MAX_TCP_MESSAGE_SIZE {
        return Err(DnsError::ResponseTooLarge(response_len));
    }

    let mut response = vec![0u8; response_len];
    stream
        .read_exact(&mut response)
        .await
        .map_err(|e| DnsError::TransportIo {
            server: server.to_string(),
            details: format!("Failed to read response body: {e}"),
        })?;

    Ok(response)
}
