//! Construction of synthetic responses: server failures, refusals,
//! negative answers, and the blocking responses the filter asks for.

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{rdata, DNSClass, Name, RData, Record, RecordType};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::{SystemTime, UNIX_EPOCH};
use warden_dns_domain::{is_blocking_ip, BlockingMode, FilterRule, ForwarderSettings};

/// RETRY for negative and blocking SOA responses.
pub const SOA_RETRY_DEFAULT: u32 = 900;
/// RETRY for the SOA answering AAAA queries under `block_ipv6`.
pub const SOA_RETRY_IPV6_BLOCK: u32 = 60;

const SOA_MNAME: &str = "fake-for-negative-caching.adguard.com.";

/// Empty response skeleton for a request: same id, QR set, the question
/// cloned over, recursion desired and available.
pub fn response_from_request(request: &Message) -> Message {
    let mut response = Message::new();
    response.set_id(request.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(OpCode::Query);
    response.set_recursion_desired(true);
    response.set_recursion_available(true);
    for query in request.queries() {
        response.add_query(query.clone());
    }
    response
}

pub fn servfail(request: &Message) -> Message {
    let mut response = response_from_request(request);
    response.set_response_code(ResponseCode::ServFail);
    response
}

pub fn refused(request: &Message) -> Message {
    let mut response = response_from_request(request);
    response.set_response_code(ResponseCode::Refused);
    response
}

pub fn nxdomain(request: &Message, settings: &ForwarderSettings) -> Message {
    let mut response = response_from_request(request);
    response.set_response_code(ResponseCode::NXDomain);
    response.insert_name_servers(vec![create_soa(request, settings, SOA_RETRY_DEFAULT)]);
    response
}

/// NOERROR with no answers and a single authority SOA. The negative-cache
/// shape clients expect for "this name exists but has no such data".
pub fn soa_only(request: &Message, settings: &ForwarderSettings, retry_secs: u32) -> Message {
    let mut response = response_from_request(request);
    response.set_response_code(ResponseCode::NoError);
    response.insert_name_servers(vec![create_soa(request, settings, retry_secs)]);
    response
}

pub fn a_record_response(request: &Message, ttl: u32, addrs: &[Ipv4Addr]) -> Message {
    let owner = question_name(request);
    let mut response = response_from_request(request);
    let answers = addrs
        .iter()
        .map(|ip| Record::from_rdata(owner.clone(), ttl, RData::A(rdata::A(*ip))))
        .collect();
    response.insert_answers(answers);
    response
}

pub fn aaaa_record_response(request: &Message, ttl: u32, addrs: &[Ipv6Addr]) -> Message {
    let owner = question_name(request);
    let mut response = response_from_request(request);
    let answers = addrs
        .iter()
        .map(|ip| Record::from_rdata(owner.clone(), ttl, RData::AAAA(rdata::AAAA(*ip))))
        .collect();
    response.insert_answers(answers);
    response
}

/// `0.0.0.0` / `::` answer, or the configured custom address under
/// `CustomAddress` mode. An empty custom literal for the question's family
/// degrades to SOA-only.
pub fn unspec_or_custom(request: &Message, settings: &ForwarderSettings) -> Message {
    let ttl = settings.blocked_response_ttl_secs;
    let qtype = question_type(request);
    let custom = settings.blocking_mode == BlockingMode::CustomAddress;

    match qtype {
        RecordType::A => {
            if custom && settings.custom_blocking_ipv4.is_empty() {
                return soa_only(request, settings, SOA_RETRY_DEFAULT);
            }
            let addr = if custom {
                settings
                    .custom_blocking_ipv4
                    .parse()
                    .unwrap_or(Ipv4Addr::UNSPECIFIED)
            } else {
                Ipv4Addr::UNSPECIFIED
            };
            a_record_response(request, ttl, &[addr])
        }
        _ => {
            if custom && settings.custom_blocking_ipv6.is_empty() {
                return soa_only(request, settings, SOA_RETRY_DEFAULT);
            }
            let addr = if custom {
                settings
                    .custom_blocking_ipv6
                    .parse()
                    .unwrap_or(Ipv6Addr::UNSPECIFIED)
            } else {
                Ipv6Addr::UNSPECIFIED
            };
            aaaa_record_response(request, ttl, &[addr])
        }
    }
}

/// Pick the blocking response for the effective rules according to the
/// configured blocking mode. `effective` must be non-empty; index 0 is the
/// primary verdict.
pub fn blocking_response(
    request: &Message,
    settings: &ForwarderSettings,
    effective: &[&FilterRule],
) -> Message {
    let primary = effective[0];
    let qtype = question_type(request);

    if qtype != RecordType::A && qtype != RecordType::AAAA {
        return match settings.blocking_mode {
            BlockingMode::Default => {
                if primary.ip.is_none() {
                    refused(request)
                } else {
                    soa_only(request, settings, SOA_RETRY_DEFAULT)
                }
            }
            BlockingMode::Refused => refused(request),
            BlockingMode::Nxdomain => nxdomain(request, settings),
            BlockingMode::UnspecifiedAddress | BlockingMode::CustomAddress => {
                soa_only(request, settings, SOA_RETRY_DEFAULT)
            }
        };
    }

    if primary.ip.is_none() {
        // Adblock-style rule
        return match settings.blocking_mode {
            BlockingMode::Default | BlockingMode::Refused => refused(request),
            BlockingMode::Nxdomain => nxdomain(request, settings),
            BlockingMode::UnspecifiedAddress | BlockingMode::CustomAddress => {
                unspec_or_custom(request, settings)
            }
        };
    }

    if effective
        .iter()
        .any(|r| r.ip.as_deref().is_some_and(is_blocking_ip))
    {
        return match settings.blocking_mode {
            BlockingMode::Refused => refused(request),
            BlockingMode::Nxdomain => nxdomain(request, settings),
            _ => unspec_or_custom(request, settings),
        };
    }

    response_with_rule_ips(request, settings, effective)
}

/// Hosts-style rules answer with the rule addresses whose family matches
/// the question; SOA-only when no address fits.
fn response_with_rule_ips(
    request: &Message,
    settings: &ForwarderSettings,
    effective: &[&FilterRule],
) -> Message {
    let ttl = settings.blocked_response_ttl_secs;
    match question_type(request) {
        RecordType::A => {
            let addrs: Vec<Ipv4Addr> = effective
                .iter()
                .filter_map(|r| r.ip.as_deref())
                .filter_map(|ip| ip.parse().ok())
                .collect();
            if addrs.is_empty() {
                soa_only(request, settings, SOA_RETRY_DEFAULT)
            } else {
                a_record_response(request, ttl, &addrs)
            }
        }
        _ => {
            let addrs: Vec<Ipv6Addr> = effective
                .iter()
                .filter_map(|r| r.ip.as_deref())
                .filter_map(|ip| ip.parse().ok())
                .collect();
            if addrs.is_empty() {
                soa_only(request, settings, SOA_RETRY_DEFAULT)
            } else {
                aaaa_record_response(request, ttl, &addrs)
            }
        }
    }
}

/// Plain query with a fresh random id; used for DNS64 A lookups and
/// prefix discovery.
pub fn query(name: Name, record_type: RecordType, rd: bool, cd: bool) -> Message {
    let mut q = Query::new();
    q.set_name(name);
    q.set_query_type(record_type);
    q.set_query_class(DNSClass::IN);

    let mut message = Message::new();
    message.set_id(fastrand::u16(..));
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Query);
    message.set_recursion_desired(rd);
    message.set_checking_disabled(cd);
    message.add_query(q);
    message
}

fn create_soa(request: &Message, settings: &ForwarderSettings, retry_secs: u32) -> Record {
    let owner = question_name(request);
    let mname = Name::from_ascii(SOA_MNAME).expect("static name is valid");

    let owner_str = owner.to_ascii();
    let rname = if owner_str.is_empty() || owner_str == "." {
        Name::from_ascii("hostmaster.")
    } else {
        Name::from_ascii(format!("hostmaster.{owner_str}"))
    }
    .unwrap_or_else(|_| Name::from_ascii("hostmaster.").expect("static name is valid"));

    let serial = (unix_now_secs() + 100_500) as u32;
    let soa = rdata::SOA::new(mname, rname, serial, 1800, retry_secs as i32, 604_800, 86_400);

    let mut record = Record::from_rdata(owner, settings.blocked_response_ttl_secs, RData::SOA(soa));
    record.set_dns_class(DNSClass::IN);
    record
}

fn question_name(request: &Message) -> Name {
    request
        .queries()
        .first()
        .map(|q| q.name().clone())
        .unwrap_or_else(Name::root)
}

fn question_type(request: &Message) -> RecordType {
    request
        .queries()
        .first()
        .map(|q| q.query_type())
        .unwrap_or(RecordType::A)
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
