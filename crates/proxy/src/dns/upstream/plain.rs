//! Plain-DNS upstream: UDP with a TCP retry when the answer comes back
//! truncated, or TCP-only for `tcp://` endpoints.

use super::{tcp, udp, Scheme, Upstream};
use crate::dns::codec;
use async_trait::async_trait;
use hickory_proto::op::Message;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;
use warden_dns_domain::{DnsError, UpstreamOptions};

pub struct PlainUpstream {
    options: UpstreamOptions,
    scheme: Scheme,
    addr: SocketAddr,
    timeout: Duration,
    rtt_ms: AtomicU64,
}

impl PlainUpstream {
    pub fn new(options: UpstreamOptions, scheme: Scheme, addr: SocketAddr) -> Self {
        let timeout = Duration::from_millis(options.timeout_ms);
        Self {
            options,
            scheme,
            addr,
            timeout,
            rtt_ms: AtomicU64::new(0),
        }
    }

    async fn exchange_bytes(&self, request_bytes: &[u8]) -> Result<Vec<u8>, DnsError> {
        if self.scheme == Scheme::Tcp {
            return tcp::exchange(self.addr, request_bytes, self.timeout).await;
        }

        let response = udp::exchange(self.addr, request_bytes, self.timeout).await?;
        // TC=1 lives in the third byte; avoid a full parse just to check it.
        let truncated = response.len() > 2 && response[2] & 0x02 != 0;
        if truncated {
            debug!(server = %self.addr, "UDP response truncated, retrying over TCP");
            return tcp::exchange(self.addr, request_bytes, self.timeout).await;
        }
        Ok(response)
    }
}

#[async_trait]
impl Upstream for PlainUpstream {
    fn options(&self) -> &UpstreamOptions {
        &self.options
    }

    async fn exchange(&self, request: &Message) -> Result<Message, DnsError> {
        let request_bytes = codec::serialize(request)?;
        let response_bytes = self.exchange_bytes(&request_bytes).await?;
        let response = codec::parse(&response_bytes)?;
        if response.id() != request.id() {
            return Err(DnsError::IdMismatch);
        }
        Ok(response)
    }

    fn rtt(&self) -> u64 {
        self.rtt_ms.load(Ordering::Relaxed)
    }

    /// Exponential moving average weighted toward history; a fresh sample
    /// contributes a quarter of the new estimate.
    fn adjust_rtt(&self, sample_ms: u64) {
        let _ = self
            .rtt_ms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |old| {
                Some(if old == 0 {
                    sample_ms
                } else {
                    (old * 3 + sample_ms) / 4
                })
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream() -> PlainUpstream {
        PlainUpstream::new(
            UpstreamOptions::new("udp://8.8.8.8:53", 1),
            Scheme::Udp,
            "8.8.8.8:53".parse().unwrap(),
        )
    }

    #[test]
    fn rtt_starts_at_zero_and_tracks_samples() {
        let up = upstream();
        assert_eq!(up.rtt(), 0);
        up.adjust_rtt(100);
        assert_eq!(up.rtt(), 100);
        up.adjust_rtt(20);
        assert_eq!(up.rtt(), 80);
    }

    #[test]
    fn rtt_is_monotonic_wrt_recency() {
        let up = upstream();
        up.adjust_rtt(100);
        let before = up.rtt();
        up.adjust_rtt(10);
        assert!(up.rtt() < before);
        up.adjust_rtt(500);
        assert!(up.rtt() > before);
    }
}
