//! The per-query pipeline: parse, cache lookup, filter, upstream
//! exchange, post-filter, DNS64 synthesis, cache store, serialize.

use crate::dns::cache::{CacheKey, RefreshTable, ResponseCache};
use crate::dns::codec::{self, builders};
use crate::dns::dns64::{self, Dns64State};
use crate::dns::events::{EventSink, RequestProcessedEvent};
use crate::dns::filter::{ListMatcher, RuleMatcher};
use crate::dns::upstream::{build_upstream, do_upstream_exchange, Upstream};
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::{RData, RecordType};
use parking_lot::Mutex;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use warden_dns_domain::{effective_rules, BlockingMode, DnsError, FilterRule, ForwarderSettings};

/// Mozilla's DoH canary domain; answering NXDOMAIN keeps browsers on the
/// configured resolver.
const MOZILLA_DOH_HOST: &str = "use-application-dns.net";

pub struct Forwarder {
    settings: ForwarderSettings,
    events: EventSink,
    upstreams: Vec<Arc<dyn Upstream>>,
    fallbacks: Vec<Arc<dyn Upstream>>,
    matcher: Box<dyn RuleMatcher>,
    cache: ResponseCache,
    refresh: RefreshTable,
    dns64: Arc<Dns64State>,
    dns64_task: Mutex<Option<JoinHandle<()>>>,
    dns64_cancel: CancellationToken,
}

impl Forwarder {
    /// Build the forwarder from settings: validates blocking addresses,
    /// constructs upstreams (logging and skipping failures), compiles the
    /// filter, kicks off DNS64 discovery, and sizes the cache.
    ///
    /// Returns the forwarder plus an optional warning for non-fatal
    /// oddities (skipped rules, empty custom blocking literals).
    pub async fn init(
        settings: ForwarderSettings,
        events: EventSink,
    ) -> Result<(Arc<Self>, Option<String>), DnsError> {
        info!("Initializing forwarder");

        let mut upstreams: Vec<Arc<dyn Upstream>> = Vec::with_capacity(settings.upstreams.len());
        for options in &settings.upstreams {
            info!(address = %options.address, "Initializing upstream");
            match build_upstream(options.clone()).await {
                Ok(upstream) => upstreams.push(upstream),
                Err(e) => error!(address = %options.address, error = %e, "Failed to create upstream"),
            }
        }

        let mut fallbacks: Vec<Arc<dyn Upstream>> = Vec::with_capacity(settings.fallbacks.len());
        for options in &settings.fallbacks {
            info!(address = %options.address, "Initializing fallback upstream");
            match build_upstream(options.clone()).await {
                Ok(upstream) => fallbacks.push(upstream),
                Err(e) => {
                    error!(address = %options.address, error = %e, "Failed to create fallback upstream")
                }
            }
        }

        let (list_matcher, filter_warning) = ListMatcher::new(&settings.filter)?;
        let matcher: Box<dyn RuleMatcher> = Box::new(list_matcher);

        Self::with_parts(settings, events, upstreams, fallbacks, matcher, filter_warning)
    }

    /// Assembly entry point shared by `init` and tests that inject their
    /// own upstreams and matcher.
    pub fn with_parts(
        settings: ForwarderSettings,
        events: EventSink,
        upstreams: Vec<Arc<dyn Upstream>>,
        fallbacks: Vec<Arc<dyn Upstream>>,
        matcher: Box<dyn RuleMatcher>,
        mut warning: Option<String>,
    ) -> Result<(Arc<Self>, Option<String>), DnsError> {
        if settings.blocking_mode == BlockingMode::CustomAddress {
            if settings.custom_blocking_ipv4.is_empty() {
                warn!("Custom blocking IPv4 not set: blocking responses to A queries will be empty");
                append_warning(&mut warning, "custom blocking IPv4 not set");
            } else if settings.custom_blocking_ipv4.parse::<Ipv4Addr>().is_err() {
                return Err(DnsError::InvalidIpAddress(format!(
                    "Invalid custom blocking IPv4 address: {}",
                    settings.custom_blocking_ipv4
                )));
            }
            if settings.custom_blocking_ipv6.is_empty() {
                warn!("Custom blocking IPv6 not set: blocking responses to AAAA queries will be empty");
                append_warning(&mut warning, "custom blocking IPv6 not set");
            } else if settings.custom_blocking_ipv6.parse::<Ipv6Addr>().is_err() {
                return Err(DnsError::InvalidIpAddress(format!(
                    "Invalid custom blocking IPv6 address: {}",
                    settings.custom_blocking_ipv6
                )));
            }
        }

        if upstreams.is_empty() && fallbacks.is_empty() {
            error!("Failed to initialize any upstream");
            return Err(DnsError::NoUsableUpstreams);
        }

        let cache = ResponseCache::new(settings.dns_cache_size);
        let dns64 = Arc::new(Dns64State::new());
        let dns64_cancel = CancellationToken::new();

        let dns64_task = settings.dns64.clone().map(|dns64_settings| {
            info!("DNS64 discovery is enabled");
            dns64::spawn_discovery(Arc::clone(&dns64), dns64_settings, dns64_cancel.clone())
        });

        let forwarder = Arc::new(Self {
            settings,
            events,
            upstreams,
            fallbacks,
            matcher,
            cache,
            refresh: RefreshTable::new(),
            dns64,
            dns64_task: Mutex::new(dns64_task),
            dns64_cancel,
        });

        info!("Forwarder initialized");
        Ok((forwarder, warning))
    }

    /// Cancel DNS64 discovery, wait out in-flight refreshes, and drop the
    /// cache. Safe to call more than once.
    pub async fn deinit(&self) {
        info!("Deinitializing forwarder");

        self.dns64_cancel.cancel();
        if let Some(task) = self.dns64_task.lock().take() {
            task.abort();
        }

        self.refresh.shutdown().await;
        self.cache.clear();

        info!("Forwarder deinitialized");
    }

    pub fn settings(&self) -> &ForwarderSettings {
        &self.settings
    }

    /// Visible for tests: the number of in-flight optimistic refreshes.
    pub fn pending_refreshes(&self) -> usize {
        self.refresh.len()
    }

    /// The DNS64 prefix store. Discovery fills it asynchronously; tests
    /// seed it directly.
    pub fn dns64_state(&self) -> Arc<Dns64State> {
        Arc::clone(&self.dns64)
    }

    /// Process one DNS message and produce the wire response. A zero-length
    /// return means the message was unparseable and should be dropped.
    pub async fn handle_message(self: &Arc<Self>, message: &[u8]) -> Vec<u8> {
        let start = Instant::now();
        let mut event = RequestProcessedEvent::default();

        let request = match codec::parse(message) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "Dropping unparseable message");
                event.error = e.to_string();
                self.finalize_event(&mut event, None, None, None, None, start);
                return Vec::new();
            }
        };
        trace!(id = request.id(), "Client dns request");

        let Some(question) = request.queries().first() else {
            let response = builders::servfail(&request);
            event.error = DnsError::NoQuestion.to_string();
            let bytes = self.serialize_or_empty(&response, &mut event);
            self.finalize_event(&mut event, None, Some(&response), None, None, start);
            return bytes;
        };

        let domain = question.name().to_ascii();
        let qtype = question.query_type();
        event.domain = domain.clone();

        let cache_key = CacheKey::from_request(&request);
        if let Some(key) = &cache_key {
            if !codec::has_unsupported_extensions(&request) {
                if let Some(hit) = self.cache.lookup(key, &request) {
                    let serve_stale = !hit.expired || self.settings.optimistic_cache;
                    if serve_stale {
                        if hit.expired {
                            self.spawn_refresh(key.clone(), request.clone());
                        }
                        trace!(id = request.id(), key = %key, "Cached response");
                        event.cache_hit = true;
                        let bytes = self.serialize_or_empty(&hit.response, &mut event);
                        self.finalize_event(
                            &mut event,
                            Some(&request),
                            Some(&hit.response),
                            None,
                            hit.upstream_id,
                            start,
                        );
                        return bytes;
                    }
                }
            }
        }

        let pure_domain = domain.trim_end_matches('.').to_string();

        // Mozilla DoH canary suppression.
        if (qtype == RecordType::A || qtype == RecordType::AAAA)
            && pure_domain.eq_ignore_ascii_case(MOZILLA_DOH_HOST)
        {
            let response = builders::nxdomain(&request, &self.settings);
            debug!(id = request.id(), "Mozilla DOH blocking response");
            let bytes = self.serialize_or_empty(&response, &mut event);
            self.finalize_event(&mut event, Some(&request), Some(&response), None, None, start);
            return bytes;
        }

        let mut carried_rules: Vec<FilterRule> = Vec::new();

        if self.settings.block_ipv6 && qtype == RecordType::AAAA {
            let mut rcode = ResponseCode::NoError;
            let blocked = self.apply_filter(
                &pure_domain,
                &request,
                None,
                &mut event,
                &mut carried_rules,
                false,
                Some(&mut rcode),
                start,
            );
            match blocked {
                Some((bytes, response)) if rcode != ResponseCode::NoError => {
                    self.finalize_event(
                        &mut event,
                        Some(&request),
                        Some(&response),
                        None,
                        None,
                        start,
                    );
                    return bytes;
                }
                _ => {
                    debug!(id = request.id(), "AAAA query blocked: IPv6 blocking is enabled");
                    let response = builders::soa_only(
                        &request,
                        &self.settings,
                        builders::SOA_RETRY_IPV6_BLOCK,
                    );
                    let bytes = self.serialize_or_empty(&response, &mut event);
                    self.finalize_event(
                        &mut event,
                        Some(&request),
                        Some(&response),
                        None,
                        None,
                        start,
                    );
                    return bytes;
                }
            }
        }

        if let Some((bytes, _)) = self.apply_filter(
            &pure_domain,
            &request,
            None,
            &mut event,
            &mut carried_rules,
            true,
            None,
            start,
        ) {
            return bytes;
        }

        let (mut response, upstream) =
            match do_upstream_exchange(&self.upstreams, &self.fallbacks, &request).await {
                Ok(outcome) => outcome,
                Err(failure) => {
                    let response = builders::servfail(&request);
                    debug!(id = request.id(), error = %failure.error, "Server failure response");
                    event.error = failure.error.to_string();
                    let upstream_id = failure.last_tried.map(|u| u.options().id);
                    let bytes = self.serialize_or_empty(&response, &mut event);
                    self.finalize_event(
                        &mut event,
                        Some(&request),
                        Some(&response),
                        None,
                        upstream_id,
                        start,
                    );
                    return bytes;
                }
            };

        trace!(id = request.id(), upstream = %upstream.options().address, "Upstream dns response");

        if response.response_code() == ResponseCode::NoError {
            let answers: Vec<_> = response.answers().to_vec();
            for record in &answers {
                let target = match record.data() {
                    RData::CNAME(cname) => {
                        let target = cname.0.to_ascii();
                        trace!(id = request.id(), cname = %target, "Response CNAME");
                        Some(target.trim_end_matches('.').to_string())
                    }
                    RData::A(a) => Some(a.0.to_string()),
                    RData::AAAA(aaaa) => Some(aaaa.0.to_string()),
                    _ => None,
                };
                let Some(target) = target else { continue };
                if let Some((bytes, _)) = self.apply_filter(
                    &target,
                    &request,
                    Some(&response),
                    &mut event,
                    &mut carried_rules,
                    true,
                    None,
                    start,
                ) {
                    return bytes;
                }
            }

            if self.settings.dns64.is_some() && qtype == RecordType::AAAA {
                let has_aaaa = response
                    .answers()
                    .iter()
                    .any(|rr| rr.record_type() == RecordType::AAAA);
                if !has_aaaa {
                    if let Some(synth) =
                        dns64::try_aaaa_synthesis(&upstream, &request, &self.dns64).await
                    {
                        debug!(id = request.id(), "DNS64 synthesized response");
                        response = synth;
                    }
                }
            }
        }

        let bytes = self.serialize_or_empty(&response, &mut event);
        event.bytes_sent = message.len();
        event.bytes_received = bytes.len();
        let upstream_id = upstream.options().id;
        self.finalize_event(
            &mut event,
            Some(&request),
            Some(&response),
            None,
            Some(upstream_id),
            start,
        );

        if let Some(key) = cache_key {
            self.cache.store(key, response, Some(upstream_id));
        }
        bytes
    }

    /// Match `hostname`, resolve the effective rules, and build a blocking
    /// response when the verdict says block. `carried_rules` threads the
    /// pre-filter verdict into CNAME/IP post-filter calls.
    #[allow(clippy::too_many_arguments)]
    fn apply_filter(
        &self,
        hostname: &str,
        request: &Message,
        original_response: Option<&Message>,
        event: &mut RequestProcessedEvent,
        carried_rules: &mut Vec<FilterRule>,
        fire_event: bool,
        out_rcode: Option<&mut ResponseCode>,
        start: Instant,
    ) -> Option<(Vec<u8>, Message)> {
        let mut candidates = self.matcher.match_hostname(hostname);
        for rule in &candidates {
            trace!(id = request.id(), rule = %rule.text, "Matched rule");
        }
        candidates.extend(carried_rules.iter().cloned());

        let effective = effective_rules(&candidates);
        event.prepend_rules(&effective);

        let pass = effective.is_empty() || effective[0].is_exception;
        let blocked_response = if pass {
            None
        } else {
            debug!(id = request.id(), rule = %effective[0].text, "DNS query blocked by rule");
            Some(builders::blocking_response(request, &self.settings, &effective))
        };

        *carried_rules = effective.into_iter().cloned().collect();
        let response = blocked_response?;

        if let Some(out) = out_rcode {
            *out = response.response_code();
        }

        let bytes = self.serialize_or_empty(&response, event);
        if fire_event {
            self.finalize_event(
                event,
                Some(request),
                Some(&response),
                original_response,
                None,
                start,
            );
        }
        Some((bytes, response))
    }

    /// Deduplicated background refresh of an expired cache entry. The
    /// entry is dropped when the exchange fails so the next query goes
    /// back to the upstream.
    fn spawn_refresh(self: &Arc<Self>, key: CacheKey, request: Message) {
        if !self.refresh.try_claim(&key) {
            return;
        }

        let forwarder = Arc::clone(self);
        let cancel = self.refresh.cancel_token();
        tokio::spawn(async move {
            if !cancel.is_cancelled() {
                debug!(key = %key, "Starting async upstream exchange");
                match do_upstream_exchange(&forwarder.upstreams, &forwarder.fallbacks, &request)
                    .await
                {
                    Ok((response, upstream)) => {
                        forwarder
                            .cache
                            .store(key.clone(), response, Some(upstream.options().id));
                    }
                    Err(failure) => {
                        debug!(key = %key, error = %failure.error, "Async exchange failed, dropping stale entry");
                        forwarder.cache.erase(&key);
                    }
                }
            }
            forwarder.refresh.release(&key);
        });
    }

    fn serialize_or_empty(&self, response: &Message, event: &mut RequestProcessedEvent) -> Vec<u8> {
        match codec::serialize(response) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "Failed to serialize response");
                event.error = e.to_string();
                Vec::new()
            }
        }
    }

    fn finalize_event(
        &self,
        event: &mut RequestProcessedEvent,
        request: Option<&Message>,
        response: Option<&Message>,
        original_response: Option<&Message>,
        upstream_id: Option<i32>,
        start: Instant,
    ) {
        if let Some(request) = request {
            if let Some(question) = request.queries().first() {
                event.qtype = question.query_type().to_string();
            }
        }
        if let Some(response) = response {
            event.status = codec::rcode_to_str(response.response_code()).to_string();
            event.answer = codec::answers_to_string(response);
        }
        if let Some(original) = original_response {
            event.original_answer = codec::answers_to_string(original);
        }
        event.upstream_id = upstream_id;
        event.elapsed_ms = start.elapsed().as_millis() as u64;
        self.events.emit(std::mem::take(event));
    }
}

fn append_warning(warning: &mut Option<String>, message: &str) {
    match warning {
        Some(existing) => {
            existing.push_str("; ");
            existing.push_str(message);
        }
        None => *warning = Some(message.to_string()),
    }
}
