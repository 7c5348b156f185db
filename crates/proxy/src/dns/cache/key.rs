use compact_str::CompactString;
use hickory_proto::op::Message;
use std::fmt;

/// Canonical fingerprint of a request:
/// `<qtype>|<qclass>|<DO><CD>|<lowercased-qname-with-trailing-dot>`.
///
/// Byte-stable across equivalent queries: the transaction id and the EDNS
/// buffer size do not participate. The `|` separators rule out collisions
/// between numeric fields and name labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(CompactString);

impl CacheKey {
    /// `None` when the request has no question.
    pub fn from_request(request: &Message) -> Option<Self> {
        let query = request.queries().first()?;

        let qtype = u16::from(query.query_type());
        let qclass = u16::from(query.query_class());
        let dnssec_ok = request
            .extensions()
            .as_ref()
            .map(|edns| edns.flags().dnssec_ok)
            .unwrap_or(false);
        let checking_disabled = request.checking_disabled();

        let mut name = query.name().to_ascii().to_lowercase();
        if !name.ends_with('.') {
            name.push('.');
        }

        let key = format!(
            "{}|{}|{}{}|{}",
            qtype,
            qclass,
            dnssec_ok as u8,
            checking_disabled as u8,
            name
        );
        Some(Self(CompactString::from(key)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::codec::builders;
    use hickory_proto::op::Edns;
    use hickory_proto::rr::{Name, RecordType};
    use std::str::FromStr;

    fn request(domain: &str, record_type: RecordType) -> Message {
        builders::query(Name::from_str(domain).unwrap(), record_type, true, false)
    }

    #[test]
    fn key_format_is_stable() {
        let req = request("Example.COM.", RecordType::A);
        let key = CacheKey::from_request(&req).unwrap();
        assert_eq!(key.as_str(), "1|1|00|example.com.");
    }

    #[test]
    fn key_ignores_transaction_id() {
        let mut a = request("example.com.", RecordType::A);
        let mut b = request("example.com.", RecordType::A);
        a.set_id(1);
        b.set_id(2);
        assert_eq!(
            CacheKey::from_request(&a).unwrap(),
            CacheKey::from_request(&b).unwrap()
        );
    }

    #[test]
    fn key_distinguishes_qtype_and_flags() {
        let a = CacheKey::from_request(&request("example.com.", RecordType::A)).unwrap();
        let aaaa = CacheKey::from_request(&request("example.com.", RecordType::AAAA)).unwrap();
        assert_ne!(a, aaaa);

        let mut cd = request("example.com.", RecordType::A);
        cd.set_checking_disabled(true);
        assert_ne!(a, CacheKey::from_request(&cd).unwrap());

        let mut dnssec = request("example.com.", RecordType::A);
        let mut edns = Edns::new();
        edns.set_dnssec_ok(true);
        dnssec.set_edns(edns);
        assert_ne!(a, CacheKey::from_request(&dnssec).unwrap());
    }

    #[test]
    fn root_name_serializes_as_dot() {
        let req = request(".", RecordType::NS);
        let key = CacheKey::from_request(&req).unwrap();
        assert_eq!(key.as_str(), "2|1|00|.");
    }

    #[test]
    fn no_question_yields_no_key() {
        let mut message = Message::new();
        message.set_id(7);
        message.set_message_type(hickory_proto::op::MessageType::Query);
        message.set_op_code(hickory_proto::op::OpCode::Query);
        assert!(CacheKey::from_request(&message).is_none());
    }
}
