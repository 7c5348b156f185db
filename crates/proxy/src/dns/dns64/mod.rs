//! DNS64: background NAT64 prefix discovery (RFC 7050) and inline AAAA
//! synthesis from A answers (RFC 6052).

use crate::dns::codec::builders;
use crate::dns::upstream::{build_upstream, Upstream};
use hickory_proto::op::{Message, MessageType, OpCode};
use hickory_proto::rr::{rdata, Name, RData, Record, RecordType};
use parking_lot::Mutex;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use warden_dns_domain::Dns64Settings;

/// The IPv4-only name whose AAAA answer reveals NAT64 prefixes.
const IPV4_ONLY_HOST: &str = "ipv4only.arpa.";

/// Well-known IPv4 addresses embedded in discovery answers (RFC 7050).
const WELL_KNOWN_V4: [Ipv4Addr; 2] = [
    Ipv4Addr::new(192, 0, 0, 170),
    Ipv4Addr::new(192, 0, 0, 171),
];

/// NAT64 prefix byte lengths for /96 /64 /56 /48 /40 /32, longest first.
const PREFIX_BYTE_LENGTHS: [usize; 6] = [12, 8, 7, 6, 5, 4];

/// Discovered prefixes, 4-12 bytes of NAT64 prefix material each. May stay
/// empty forever if discovery never succeeds.
#[derive(Default)]
pub struct Dns64State {
    prefixes: Mutex<Vec<Vec<u8>>>,
}

impl Dns64State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Vec<u8>> {
        self.prefixes.lock().clone()
    }

    pub fn set_prefixes(&self, prefixes: Vec<Vec<u8>>) {
        *self.prefixes.lock() = prefixes;
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.lock().is_empty()
    }
}

/// One-shot background discovery: up to `max_tries` rounds, sleeping
/// `wait_time_ms` before each, walking the configured upstreams until one
/// yields prefixes. Per-attempt failures are logged and skipped.
pub fn spawn_discovery(
    state: Arc<Dns64State>,
    settings: Dns64Settings,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let wait = Duration::from_millis(settings.wait_time_ms);
        for _ in 0..settings.max_tries {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            for options in &settings.upstreams {
                let upstream = match build_upstream(options.clone()).await {
                    Ok(u) => u,
                    Err(e) => {
                        debug!(error = %e, "DNS64: failed to create discovery upstream");
                        continue;
                    }
                };

                match discover_prefixes(&upstream).await {
                    Ok(prefixes) if !prefixes.is_empty() => {
                        info!(count = prefixes.len(), "DNS64 prefixes discovered");
                        state.set_prefixes(prefixes);
                        return;
                    }
                    Ok(_) => debug!("DNS64: no prefixes discovered, retrying"),
                    Err(e) => debug!(error = %e, "DNS64: error discovering prefixes"),
                }
            }
        }
        debug!("DNS64: failed to discover any prefixes");
    })
}

/// Resolve `ipv4only.arpa.` AAAA through `upstream` and derive the NAT64
/// prefixes from the answers.
pub async fn discover_prefixes(
    upstream: &Arc<dyn Upstream>,
) -> Result<Vec<Vec<u8>>, warden_dns_domain::DnsError> {
    let name = Name::from_ascii(IPV4_ONLY_HOST).expect("static name is valid");
    let request = builders::query(name, RecordType::AAAA, true, false);
    let response = upstream.exchange(&request).await?;

    let mut prefixes: Vec<Vec<u8>> = Vec::new();
    for record in response.answers() {
        if let RData::AAAA(aaaa) = record.data() {
            if let Some(prefix) = extract_prefix(aaaa.0) {
                if !prefixes.contains(&prefix) {
                    prefixes.push(prefix);
                }
            }
        }
    }
    Ok(prefixes)
}

/// Locate a well-known IPv4 address inside a discovery answer and return
/// the prefix bytes preceding it. Longest prefixes are preferred.
pub fn extract_prefix(addr: Ipv6Addr) -> Option<Vec<u8>> {
    let octets = addr.octets();
    for &len in &PREFIX_BYTE_LENGTHS {
        let mut v4 = [0u8; 4];
        let mut src = len;
        for slot in &mut v4 {
            if src == 8 {
                // Bits 64-71 are the reserved u octet, not address material.
                src += 1;
            }
            *slot = octets[src];
            src += 1;
        }
        if WELL_KNOWN_V4.contains(&Ipv4Addr::from(v4)) {
            return Some(octets[..len].to_vec());
        }
    }
    None
}

/// Embed an IPv4 address into a NAT64 prefix (RFC 6052). The u octet
/// (byte 8) is skipped when placing address material.
pub fn synthesize_v4_embedded_v6(prefix: &[u8], v4: Ipv4Addr) -> Option<Ipv6Addr> {
    if prefix.len() < 4 || prefix.len() > 12 {
        return None;
    }
    let mut out = [0u8; 16];
    out[..prefix.len()].copy_from_slice(prefix);

    let v4_octets = v4.octets();
    let mut dst = prefix.len();
    for octet in v4_octets {
        if dst == 8 {
            dst += 1;
        }
        if dst >= 16 {
            return None;
        }
        out[dst] = octet;
        dst += 1;
    }
    Some(Ipv6Addr::from(out))
}

/// Re-ask the same upstream for A records and synthesize one AAAA per
/// (A answer, known prefix) pair. Returns `None` when nothing could be
/// synthesized, so the caller falls back to the original empty answer.
pub async fn try_aaaa_synthesis(
    upstream: &Arc<dyn Upstream>,
    request: &Message,
    state: &Dns64State,
) -> Option<Message> {
    let prefixes = state.snapshot();
    if prefixes.is_empty() {
        return None;
    }

    let question = request.queries().first()?;
    let a_request = builders::query(
        question.name().clone(),
        RecordType::A,
        request.recursion_desired(),
        request.checking_disabled(),
    );

    let a_response = match upstream.exchange(&a_request).await {
        Ok(r) => r,
        Err(e) => {
            debug!(id = request.id(), error = %e, "DNS64: A query failed");
            return None;
        }
    };

    if a_response.answers().is_empty() {
        debug!(id = request.id(), "DNS64: upstream returned no A records");
        return None;
    }

    let mut answers: Vec<Record> = Vec::new();
    let mut aaaa_count = 0usize;
    for record in a_response.answers() {
        let RData::A(a) = record.data() else {
            answers.push(record.clone());
            continue;
        };
        for prefix in &prefixes {
            if let Some(v6) = synthesize_v4_embedded_v6(prefix, a.0) {
                answers.push(Record::from_rdata(
                    record.name().clone(),
                    record.ttl(),
                    RData::AAAA(rdata::AAAA(v6)),
                ));
                aaaa_count += 1;
            }
        }
    }

    debug!(id = request.id(), synthesized = aaaa_count, "DNS64 synthesis");
    if aaaa_count == 0 {
        return None;
    }

    let mut response = Message::new();
    response.set_id(request.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(OpCode::Query);
    response.set_recursion_desired(request.recursion_desired());
    response.set_recursion_available(a_response.recursion_available());
    response.set_checking_disabled(a_response.checking_disabled());
    for query in request.queries() {
        response.add_query(query.clone());
    }
    response.insert_answers(answers);
    Some(response)
}
