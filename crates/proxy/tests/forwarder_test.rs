mod helpers;

use helpers::{address_upstream, request, settings_with_rules, timeout_upstream, MockUpstream};
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{RData, RecordType};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use warden_dns_domain::{BlockingMode, Dns64Settings, DnsError, ForwarderSettings};
use warden_dns_proxy::dns::codec;
use warden_dns_proxy::dns::events::EventSink;
use warden_dns_proxy::dns::filter::ListMatcher;
use warden_dns_proxy::dns::filter::RuleMatcher;
use warden_dns_proxy::dns::upstream::Upstream;
use warden_dns_proxy::Forwarder;

fn forwarder_with(
    settings: ForwarderSettings,
    upstreams: Vec<Arc<MockUpstream>>,
    fallbacks: Vec<Arc<MockUpstream>>,
) -> (
    Arc<Forwarder>,
    tokio::sync::mpsc::UnboundedReceiver<warden_dns_proxy::dns::events::RequestProcessedEvent>,
) {
    let (events, rx) = EventSink::enabled();
    let (matcher, _) = ListMatcher::new(&settings.filter).expect("filter compiles");
    let matcher: Box<dyn RuleMatcher> = Box::new(matcher);
    let upstreams = upstreams
        .into_iter()
        .map(|u| u as Arc<dyn warden_dns_proxy::dns::upstream::Upstream>)
        .collect();
    let fallbacks = fallbacks
        .into_iter()
        .map(|u| u as Arc<dyn warden_dns_proxy::dns::upstream::Upstream>)
        .collect();
    let (forwarder, _) =
        Forwarder::with_parts(settings, events, upstreams, fallbacks, matcher, None)
            .expect("forwarder builds");
    (forwarder, rx)
}

#[tokio::test]
async fn cache_hit_serves_without_upstream() {
    let upstream = address_upstream(1, 300, vec![Ipv4Addr::new(93, 184, 216, 34)], vec![]);
    let (forwarder, mut events) =
        forwarder_with(ForwarderSettings::default(), vec![upstream.clone()], vec![]);

    // Miss populates the cache.
    let miss = forwarder
        .handle_message(&codec::serialize(&request("example.com.", RecordType::A, 1)).unwrap())
        .await;
    assert!(!miss.is_empty());
    assert_eq!(upstream.calls(), 1);
    let miss_event = events.recv().await.unwrap();
    assert!(!miss_event.cache_hit);

    // Hit: same question, new id.
    let raw = forwarder
        .handle_message(&codec::serialize(&request("example.com.", RecordType::A, 42)).unwrap())
        .await;
    let response = codec::parse(&raw).unwrap();
    assert_eq!(response.id(), 42);
    assert_eq!(response.queries().len(), 1);
    assert_eq!(upstream.calls(), 1, "cache hit must not consult upstreams");
    assert_eq!(response.answers().len(), 1);
    assert_eq!(response.answers()[0].ttl(), 300);

    let hit_event = events.recv().await.unwrap();
    assert!(hit_event.cache_hit);
    assert_eq!(hit_event.upstream_id, Some(1));
}

#[tokio::test]
async fn optimistic_stale_serves_ttl_one_and_refreshes_once() {
    let upstream = address_upstream(1, 1, vec![Ipv4Addr::new(1, 2, 3, 4)], vec![]);
    let settings = ForwarderSettings {
        optimistic_cache: true,
        ..ForwarderSettings::default()
    };
    let (forwarder, mut events) = forwarder_with(settings, vec![upstream.clone()], vec![]);

    let query = |id| codec::serialize(&request("stale.example.", RecordType::A, id)).unwrap();

    forwarder.handle_message(&query(1)).await;
    assert_eq!(upstream.calls(), 1);
    events.recv().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let raw = forwarder.handle_message(&query(7)).await;
    let response = codec::parse(&raw).unwrap();
    assert_eq!(response.id(), 7);
    assert_eq!(response.answers()[0].ttl(), 1, "stale answers carry TTL 1");

    let event = events.recv().await.unwrap();
    assert!(event.cache_hit);

    // Exactly one background refresh reaches the upstream.
    for _ in 0..50 {
        if upstream.calls() == 2 && forwarder.pending_refreshes() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(upstream.calls(), 2);
    assert_eq!(forwarder.pending_refreshes(), 0);
}

#[tokio::test]
async fn adblock_rule_blocks_with_refused() {
    let upstream = address_upstream(1, 300, vec![Ipv4Addr::new(9, 9, 9, 9)], vec![]);
    let (forwarder, mut events) = forwarder_with(
        settings_with_rules(&["||ads.example^"]),
        vec![upstream.clone()],
        vec![],
    );

    let raw = forwarder
        .handle_message(&codec::serialize(&request("ads.example.", RecordType::A, 3)).unwrap())
        .await;
    let response = codec::parse(&raw).unwrap();
    assert_eq!(response.response_code(), ResponseCode::Refused);
    assert!(response.answers().is_empty());
    assert_eq!(upstream.calls(), 0);

    let event = events.recv().await.unwrap();
    assert_eq!(event.rules, vec!["||ads.example^"]);
    assert_eq!(event.filter_list_ids, vec![42]);
    assert!(!event.whitelist);
    assert_eq!(event.status, "REFUSED");
}

#[tokio::test]
async fn hosts_rule_answers_with_rule_address() {
    let upstream = address_upstream(1, 300, vec![Ipv4Addr::new(9, 9, 9, 9)], vec![]);
    let mut settings = settings_with_rules(&["1.2.3.4 foo.test"]);
    settings.blocked_response_ttl_secs = 77;
    let (forwarder, _events) = forwarder_with(settings, vec![upstream], vec![]);

    let raw = forwarder
        .handle_message(&codec::serialize(&request("foo.test.", RecordType::A, 4)).unwrap())
        .await;
    let response = codec::parse(&raw).unwrap();
    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert_eq!(response.answers().len(), 1);
    assert_eq!(response.answers()[0].ttl(), 77);
    match response.answers()[0].data() {
        RData::A(a) => assert_eq!(a.0, Ipv4Addr::new(1, 2, 3, 4)),
        other => panic!("expected A rdata, got {other:?}"),
    }
}

#[tokio::test]
async fn exception_rule_lets_query_through() {
    let upstream = address_upstream(1, 300, vec![Ipv4Addr::new(9, 9, 9, 9)], vec![]);
    let (forwarder, mut events) = forwarder_with(
        settings_with_rules(&["||ads.example^", "@@||ads.example^"]),
        vec![upstream.clone()],
        vec![],
    );

    let raw = forwarder
        .handle_message(&codec::serialize(&request("ads.example.", RecordType::A, 5)).unwrap())
        .await;
    let response = codec::parse(&raw).unwrap();
    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert_eq!(upstream.calls(), 1);

    let event = events.recv().await.unwrap();
    assert!(event.whitelist);
}

#[tokio::test]
async fn dns64_synthesizes_aaaa_from_a() {
    // AAAA answers come back empty; A answers carry the WKAs.
    let upstream = address_upstream(
        1,
        60,
        vec![
            Ipv4Addr::new(192, 0, 0, 170),
            Ipv4Addr::new(192, 0, 0, 171),
        ],
        vec![],
    );
    let settings = ForwarderSettings {
        dns64: Some(Dns64Settings {
            upstreams: vec![],
            max_tries: 0,
            wait_time_ms: 1,
        }),
        ..ForwarderSettings::default()
    };
    let (forwarder, _events) = forwarder_with(settings, vec![upstream.clone()], vec![]);

    // 64:ff9b::/96
    forwarder
        .dns64_state()
        .set_prefixes(vec![vec![0x00, 0x64, 0xff, 0x9b, 0, 0, 0, 0, 0, 0, 0, 0]]);

    let raw = forwarder
        .handle_message(
            &codec::serialize(&request("ipv4only.arpa.", RecordType::AAAA, 6)).unwrap(),
        )
        .await;
    let response = codec::parse(&raw).unwrap();

    let mut synthesized: Vec<Ipv6Addr> = response
        .answers()
        .iter()
        .filter_map(|rr| match rr.data() {
            RData::AAAA(aaaa) => Some(aaaa.0),
            _ => None,
        })
        .collect();
    synthesized.sort();
    assert_eq!(
        synthesized,
        vec![
            Ipv6Addr::from_str("64:ff9b::c000:aa").unwrap(),
            Ipv6Addr::from_str("64:ff9b::c000:ab").unwrap(),
        ]
    );
    // AAAA exchange + A re-query against the same upstream.
    assert_eq!(upstream.calls(), 2);
}

#[tokio::test]
async fn fallback_is_used_after_primary_timeout_without_retry() {
    let primary = timeout_upstream(1);
    let fallback = address_upstream(2, 300, vec![Ipv4Addr::new(5, 6, 7, 8)], vec![]);
    let (forwarder, mut events) = forwarder_with(
        ForwarderSettings::default(),
        vec![primary.clone()],
        vec![fallback.clone()],
    );

    let raw = forwarder
        .handle_message(&codec::serialize(&request("example.org.", RecordType::A, 8)).unwrap())
        .await;
    let response = codec::parse(&raw).unwrap();

    assert_eq!(primary.calls(), 1, "timeouts must not be retried");
    assert_eq!(fallback.calls(), 1);
    assert_eq!(response.response_code(), ResponseCode::NoError);
    match response.answers()[0].data() {
        RData::A(a) => assert_eq!(a.0, Ipv4Addr::new(5, 6, 7, 8)),
        other => panic!("expected A rdata, got {other:?}"),
    }

    let event = events.recv().await.unwrap();
    assert_eq!(event.upstream_id, Some(2));
}

#[tokio::test]
async fn transient_error_is_retried_once_on_same_upstream() {
    let flaky_calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let calls_clone = Arc::clone(&flaky_calls);
    let upstream = MockUpstream::new(
        1,
        Box::new(move |request| {
            if calls_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Err(DnsError::TransportIo {
                    server: "udp://192.0.2.1:53".to_string(),
                    details: "connection reset".to_string(),
                })
            } else {
                let mut response =
                    warden_dns_proxy::dns::codec::builders::response_from_request(request);
                response.insert_answers(vec![hickory_proto::rr::Record::from_rdata(
                    request.queries()[0].name().clone(),
                    60,
                    RData::A(hickory_proto::rr::rdata::A(Ipv4Addr::new(7, 7, 7, 7))),
                )]);
                Ok(response)
            }
        }),
    );
    let (forwarder, _events) =
        forwarder_with(ForwarderSettings::default(), vec![upstream.clone()], vec![]);

    let raw = forwarder
        .handle_message(&codec::serialize(&request("retry.example.", RecordType::A, 9)).unwrap())
        .await;
    let response = codec::parse(&raw).unwrap();
    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert_eq!(upstream.calls(), 2, "exactly one retry");
}

#[tokio::test]
async fn upstreams_are_tried_in_rtt_order() {
    let slow = address_upstream(1, 300, vec![Ipv4Addr::new(1, 1, 1, 1)], vec![]);
    let fast = address_upstream(2, 300, vec![Ipv4Addr::new(2, 2, 2, 2)], vec![]);
    slow.adjust_rtt(50);
    fast.adjust_rtt(10);
    let (forwarder, mut events) = forwarder_with(
        ForwarderSettings::default(),
        vec![slow.clone(), fast.clone()],
        vec![],
    );

    forwarder
        .handle_message(&codec::serialize(&request("order.example.", RecordType::A, 14)).unwrap())
        .await;

    assert_eq!(fast.calls(), 1, "lowest-RTT upstream answers first");
    assert_eq!(slow.calls(), 0);
    let event = events.recv().await.unwrap();
    assert_eq!(event.upstream_id, Some(2));
}

#[tokio::test]
async fn total_failure_returns_servfail_with_last_upstream() {
    let primary = timeout_upstream(1);
    let fallback = timeout_upstream(2);
    let (forwarder, mut events) = forwarder_with(
        ForwarderSettings::default(),
        vec![primary],
        vec![fallback],
    );

    let raw = forwarder
        .handle_message(&codec::serialize(&request("down.example.", RecordType::A, 10)).unwrap())
        .await;
    let response = codec::parse(&raw).unwrap();
    assert_eq!(response.response_code(), ResponseCode::ServFail);

    let event = events.recv().await.unwrap();
    assert_eq!(event.upstream_id, Some(2), "last tried upstream is reported");
    assert!(!event.error.is_empty());
}

#[tokio::test]
async fn mozilla_canary_yields_nxdomain() {
    let upstream = address_upstream(1, 300, vec![Ipv4Addr::new(9, 9, 9, 9)], vec![]);
    let (forwarder, _events) = forwarder_with(
        ForwarderSettings::default(),
        vec![upstream.clone()],
        vec![],
    );

    let raw = forwarder
        .handle_message(
            &codec::serialize(&request("use-application-dns.net.", RecordType::A, 11)).unwrap(),
        )
        .await;
    let response = codec::parse(&raw).unwrap();
    assert_eq!(response.response_code(), ResponseCode::NXDomain);
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn block_ipv6_answers_aaaa_with_short_retry_soa() {
    let upstream = address_upstream(1, 300, vec![], vec![Ipv6Addr::LOCALHOST]);
    let settings = ForwarderSettings {
        block_ipv6: true,
        ..ForwarderSettings::default()
    };
    let (forwarder, _events) = forwarder_with(settings, vec![upstream.clone()], vec![]);

    let raw = forwarder
        .handle_message(&codec::serialize(&request("example.com.", RecordType::AAAA, 12)).unwrap())
        .await;
    let response = codec::parse(&raw).unwrap();
    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(response.answers().is_empty());
    assert_eq!(response.name_servers().len(), 1);
    match response.name_servers()[0].data() {
        RData::SOA(soa) => assert_eq!(soa.retry(), 60),
        other => panic!("expected SOA rdata, got {other:?}"),
    }
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn cname_post_filter_blocks_response() {
    let upstream = MockUpstream::new(
        1,
        Box::new(|request| {
            let mut response =
                warden_dns_proxy::dns::codec::builders::response_from_request(request);
            let owner = request.queries()[0].name().clone();
            response.insert_answers(vec![
                hickory_proto::rr::Record::from_rdata(
                    owner,
                    60,
                    RData::CNAME(hickory_proto::rr::rdata::CNAME(
                        hickory_proto::rr::Name::from_str("evil.tracker.").unwrap(),
                    )),
                ),
                hickory_proto::rr::Record::from_rdata(
                    hickory_proto::rr::Name::from_str("evil.tracker.").unwrap(),
                    60,
                    RData::A(hickory_proto::rr::rdata::A(Ipv4Addr::new(6, 6, 6, 6))),
                ),
            ]);
            Ok(response)
        }),
    );
    let (forwarder, mut events) = forwarder_with(
        settings_with_rules(&["||evil.tracker^"]),
        vec![upstream],
        vec![],
    );

    let raw = forwarder
        .handle_message(&codec::serialize(&request("clean.example.", RecordType::A, 13)).unwrap())
        .await;
    let response = codec::parse(&raw).unwrap();
    assert_eq!(response.response_code(), ResponseCode::Refused);

    let event = events.recv().await.unwrap();
    assert_eq!(event.rules, vec!["||evil.tracker^"]);
    assert!(!event.original_answer.is_empty());
}

#[tokio::test]
async fn unparseable_message_returns_empty() {
    let upstream = address_upstream(1, 300, vec![Ipv4Addr::new(9, 9, 9, 9)], vec![]);
    let (forwarder, _events) =
        forwarder_with(ForwarderSettings::default(), vec![upstream], vec![]);
    let raw = forwarder.handle_message(&[0xde, 0xad, 0xbe]).await;
    assert!(raw.is_empty());
}

#[tokio::test]
async fn init_fails_without_usable_upstreams() {
    let (events, _rx) = EventSink::enabled();
    let (matcher, _) = ListMatcher::new(&Default::default()).unwrap();
    let result = Forwarder::with_parts(
        ForwarderSettings::default(),
        events,
        vec![],
        vec![],
        Box::new(matcher),
        None,
    );
    assert!(matches!(result, Err(DnsError::NoUsableUpstreams)));
}

#[tokio::test]
async fn init_rejects_invalid_custom_blocking_address() {
    let upstream = address_upstream(1, 300, vec![], vec![]);
    let settings = ForwarderSettings {
        blocking_mode: BlockingMode::CustomAddress,
        custom_blocking_ipv4: "not-an-ip".to_string(),
        ..ForwarderSettings::default()
    };
    let (events, _rx) = EventSink::enabled();
    let (matcher, _) = ListMatcher::new(&Default::default()).unwrap();
    let result = Forwarder::with_parts(
        settings,
        events,
        vec![upstream as Arc<dyn warden_dns_proxy::dns::upstream::Upstream>],
        vec![],
        Box::new(matcher),
        None,
    );
    assert!(matches!(result, Err(DnsError::InvalidIpAddress(_))));
}

#[tokio::test]
async fn deinit_is_idempotent() {
    let upstream = address_upstream(1, 300, vec![Ipv4Addr::new(9, 9, 9, 9)], vec![]);
    let (forwarder, _events) =
        forwarder_with(ForwarderSettings::default(), vec![upstream], vec![]);
    forwarder.deinit().await;
    forwarder.deinit().await;
}
