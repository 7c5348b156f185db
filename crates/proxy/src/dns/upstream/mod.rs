//! Upstream resolvers: the exchange contract, address parsing, and the
//! factory turning `UpstreamOptions` into a runtime upstream.

pub mod exchange;
pub mod plain;
pub mod tcp;
pub mod udp;

pub use exchange::{do_upstream_exchange, ExchangeFailure};
pub use plain::PlainUpstream;

use async_trait::async_trait;
use hickory_proto::op::Message;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::debug;
use warden_dns_domain::{DnsError, UpstreamOptions};

pub const DEFAULT_DNS_PORT: u16 = 53;

/// A module speaking some DNS transport to a remote resolver. Internally
/// thread-safe; the id from `options()` is stable and reported back with
/// every response.
#[async_trait]
pub trait Upstream: Send + Sync {
    fn options(&self) -> &UpstreamOptions;

    async fn exchange(&self, request: &Message) -> Result<Message, DnsError>;

    /// Rolling estimate of this upstream's round-trip time, milliseconds.
    fn rtt(&self) -> u64;

    fn adjust_rtt(&self, sample_ms: u64);
}

/// Endpoint scheme understood by the plain-DNS factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// UDP with TCP retry on truncation.
    Udp,
    /// TCP only.
    Tcp,
}

fn split_host_port(s: &str) -> (&str, Option<u16>) {
    if let Some(rest) = s.strip_prefix('[') {
        // Bracketed IPv6: [::1]:53 or [::1]
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
        (s, None)
    } else {
        match s.rsplit_once(':') {
            // A second ':' means an unbracketed IPv6 literal without a port.
            Some((host, port)) if !host.contains(':') => (host, port.parse().ok()),
            _ => (s, None),
        }
    }
}

/// Parse `udp://HOST:PORT`, `tcp://HOST:PORT`, or bare `HOST[:PORT]`
/// (defaults to UDP, port 53).
pub fn parse_address(address: &str) -> Result<(Scheme, String, u16), DnsError> {
    let (scheme, rest) = if let Some(rest) = address.strip_prefix("udp://") {
        (Scheme::Udp, rest)
    } else if let Some(rest) = address.strip_prefix("tcp://") {
        (Scheme::Tcp, rest)
    } else {
        (Scheme::Udp, address)
    };

    let (host, port) = split_host_port(rest);
    if host.is_empty() {
        return Err(DnsError::InvalidUpstreamAddress(address.to_string()));
    }
    Ok((scheme, host.to_string(), port.unwrap_or(DEFAULT_DNS_PORT)))
}

/// Build a plain-DNS upstream from its options. Hostname endpoints are
/// resolved once, here; `server_ip` skips resolution entirely.
pub async fn build_upstream(options: UpstreamOptions) -> Result<Arc<dyn Upstream>, DnsError> {
    let (scheme, host, port) = parse_address(&options.address)?;

    let addr: SocketAddr = if let Some(ip) = options.server_ip {
        SocketAddr::new(ip, port)
    } else if let Ok(ip) = host.parse::<IpAddr>() {
        SocketAddr::new(ip, port)
    } else {
        let mut resolved = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|e| {
                DnsError::InvalidUpstreamAddress(format!(
                    "Failed to resolve '{}': {}",
                    options.address, e
                ))
            })?;
        resolved
            .next()
            .ok_or_else(|| DnsError::InvalidUpstreamAddress(options.address.clone()))?
    };

    debug!(address = %options.address, resolved = %addr, id = options.id, "Upstream resolved");
    Ok(Arc::new(PlainUpstream::new(options, scheme, addr)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_udp_scheme() {
        let (scheme, host, port) = parse_address("udp://8.8.8.8:53").unwrap();
        assert_eq!(scheme, Scheme::Udp);
        assert_eq!(host, "8.8.8.8");
        assert_eq!(port, 53);
    }

    #[test]
    fn parses_tcp_scheme() {
        let (scheme, host, port) = parse_address("tcp://1.1.1.1:5353").unwrap();
        assert_eq!(scheme, Scheme::Tcp);
        assert_eq!(host, "1.1.1.1");
        assert_eq!(port, 5353);
    }

    #[test]
    fn bare_address_defaults_to_udp_port_53() {
        let (scheme, host, port) = parse_address("9.9.9.9").unwrap();
        assert_eq!(scheme, Scheme::Udp);
        assert_eq!(host, "9.9.9.9");
        assert_eq!(port, 53);
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let (_, host, port) = parse_address("udp://[2001:67c:27e4::64]:53").unwrap();
        assert_eq!(host, "2001:67c:27e4::64");
        assert_eq!(port, 53);
    }

    #[test]
    fn unbracketed_ipv6_without_port() {
        let (_, host, port) = parse_address("2001:67c:27e4::64").unwrap();
        assert_eq!(host, "2001:67c:27e4::64");
        assert_eq!(port, 53);
    }

    #[test]
    fn empty_host_is_rejected() {
        assert!(parse_address("udp://:53").is_err());
    }
}
