#![allow(dead_code)]

use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::rr::{rdata, Name, RData, Record, RecordType};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use warden_dns_domain::{DnsError, FilterList, FilterParams, ForwarderSettings, UpstreamOptions};
use warden_dns_proxy::dns::codec::builders;
use warden_dns_proxy::dns::upstream::Upstream;

pub type ExchangeHandler =
    Box<dyn Fn(&Message) -> Result<Message, DnsError> + Send + Sync + 'static>;

/// Scripted upstream: every exchange goes through the handler, calls are
/// counted, RTT is adjustable like the real thing.
pub struct MockUpstream {
    options: UpstreamOptions,
    handler: ExchangeHandler,
    calls: AtomicUsize,
    rtt_ms: AtomicU64,
}

impl MockUpstream {
    pub fn new(id: i32, handler: ExchangeHandler) -> Arc<Self> {
        Arc::new(Self {
            options: UpstreamOptions::new(format!("udp://192.0.2.{id}:53"), id),
            handler,
            calls: AtomicUsize::new(0),
            rtt_ms: AtomicU64::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    fn options(&self) -> &UpstreamOptions {
        &self.options
    }

    async fn exchange(&self, request: &Message) -> Result<Message, DnsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.handler)(request)
    }

    fn rtt(&self) -> u64 {
        self.rtt_ms.load(Ordering::Relaxed)
    }

    fn adjust_rtt(&self, sample_ms: u64) {
        self.rtt_ms.store(sample_ms, Ordering::Relaxed);
    }
}

/// Upstream answering every A/AAAA question with the given addresses.
pub fn address_upstream(id: i32, ttl: u32, v4: Vec<Ipv4Addr>, v6: Vec<Ipv6Addr>) -> Arc<MockUpstream> {
    MockUpstream::new(
        id,
        Box::new(move |request| {
            let qtype = request.queries()[0].query_type();
            let mut response = builders::response_from_request(request);
            let owner = request.queries()[0].name().clone();
            match qtype {
                RecordType::A => {
                    let answers = v4
                        .iter()
                        .map(|ip| Record::from_rdata(owner.clone(), ttl, RData::A(rdata::A(*ip))))
                        .collect();
                    response.insert_answers(answers);
                }
                RecordType::AAAA => {
                    let answers = v6
                        .iter()
                        .map(|ip| {
                            Record::from_rdata(owner.clone(), ttl, RData::AAAA(rdata::AAAA(*ip)))
                        })
                        .collect();
                    response.insert_answers(answers);
                }
                _ => {}
            }
            Ok(response)
        }),
    )
}

pub fn timeout_upstream(id: i32) -> Arc<MockUpstream> {
    MockUpstream::new(
        id,
        Box::new(move |_| {
            Err(DnsError::Timeout {
                server: format!("udp://192.0.2.{id}:53"),
            })
        }),
    )
}

pub fn request(domain: &str, record_type: RecordType, id: u16) -> Message {
    let mut message = builders::query(
        Name::from_str(domain).expect("test domain is valid"),
        record_type,
        true,
        false,
    );
    message.set_id(id);
    message
}

pub fn settings_with_rules(rules: &[&str]) -> ForwarderSettings {
    ForwarderSettings {
        filter: FilterParams {
            lists: vec![FilterList {
                id: 42,
                path: None,
                rules: rules.iter().map(|s| s.to_string()).collect(),
            }],
        },
        ..ForwarderSettings::default()
    }
}
