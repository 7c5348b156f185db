//! DNS wire codec: parsing, serialization, and the predicates the cache
//! uses to judge cacheability.

pub mod builders;

use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};
use warden_dns_domain::DnsError;

/// Initial capacity for serialized responses; most answers fit without
/// reallocation.
const RESPONSE_BUFFER_INITIAL_CAPACITY: usize = 512;

pub fn parse(bytes: &[u8]) -> Result<Message, DnsError> {
    Message::from_vec(bytes).map_err(|e| DnsError::MalformedPacket(e.to_string()))
}

pub fn serialize(message: &Message) -> Result<Vec<u8>, DnsError> {
    let mut buf = Vec::with_capacity(RESPONSE_BUFFER_INITIAL_CAPACITY);
    let mut encoder = BinEncoder::new(&mut buf);
    message
        .emit(&mut encoder)
        .map_err(|e| DnsError::SerializeError(e.to_string()))?;
    Ok(buf)
}

/// EDNS payloads the forwarder does not understand: option data, an
/// extended rcode, or anything else beyond a bare OPT pseudo-record.
/// Requests and responses carrying these bypass the cache.
pub fn has_unsupported_extensions(message: &Message) -> bool {
    match message.extensions() {
        Some(edns) => !edns.options().as_ref().is_empty() || edns.rcode_high() != 0,
        None => false,
    }
}

/// Minimum TTL across answer, authority, and additional records.
/// Returns 0 when the message has no records at all.
pub fn min_rr_ttl(message: &Message) -> u32 {
    let mut min_ttl = u32::MAX;
    for record in message
        .answers()
        .iter()
        .chain(message.name_servers())
        .chain(message.additionals())
    {
        min_ttl = min_ttl.min(record.ttl());
    }
    if min_ttl == u32::MAX {
        0
    } else {
        min_ttl
    }
}

pub fn rcode_to_str(rcode: ResponseCode) -> &'static str {
    match rcode {
        ResponseCode::NoError => "NOERROR",
        ResponseCode::FormErr => "FORMERR",
        ResponseCode::ServFail => "SERVFAIL",
        ResponseCode::NXDomain => "NXDOMAIN",
        ResponseCode::NotImp => "NOTIMP",
        ResponseCode::Refused => "REFUSED",
        _ => "UNKNOWN",
    }
}

/// Format an answer section as `<TYPE>, <rdata>` lines for event reporting,
/// e.g. `A, 1.2.3.4`.
pub fn answers_to_string(message: &Message) -> String {
    let mut out = String::new();
    for record in message.answers() {
        out.push_str(&record.record_type().to_string());
        out.push_str(", ");
        out.push_str(&record.data().to_string());
        out.push('\n');
    }
    out
}
