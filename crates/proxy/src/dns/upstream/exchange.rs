//! Upstream selection: RTT-ordered within each group, primaries before
//! fallbacks, one same-endpoint retry for non-timeout failures.

use super::Upstream;
use hickory_proto::op::Message;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};
use warden_dns_domain::DnsError;

/// Total-failure outcome: the aggregated error plus the upstream that was
/// tried last, for event reporting.
pub struct ExchangeFailure {
    pub error: DnsError,
    pub last_tried: Option<Arc<dyn Upstream>>,
}

/// Try every upstream until one answers.
///
/// Within each of `[primaries, fallbacks]` the endpoints are attempted in
/// ascending order of their current RTT estimate (stable, so equal
/// estimates keep configuration order). Every attempt's wall time feeds
/// the estimate. A timeout has already consumed the endpoint's budget and
/// moves straight on; any other failure earns a single retry against the
/// same endpoint before moving on.
pub async fn do_upstream_exchange(
    primaries: &[Arc<dyn Upstream>],
    fallbacks: &[Arc<dyn Upstream>],
    request: &Message,
) -> Result<(Message, Arc<dyn Upstream>), ExchangeFailure> {
    let mut last_error: Option<DnsError> = None;
    let mut last_tried: Option<Arc<dyn Upstream>> = None;

    for group in [primaries, fallbacks] {
        let mut sorted: Vec<&Arc<dyn Upstream>> = group.iter().collect();
        sorted.sort_by_key(|u| u.rtt());

        for upstream in sorted {
            let address = &upstream.options().address;
            last_tried = Some(Arc::clone(upstream));

            trace!(id = request.id(), upstream = %address, "Starting exchange");
            let start = Instant::now();
            let result = upstream.exchange(request).await;
            upstream.adjust_rtt(start.elapsed().as_millis() as u64);

            match result {
                Ok(response) => return Ok((response, Arc::clone(upstream))),
                Err(error) if error.is_timeout() => {
                    debug!(id = request.id(), upstream = %address, %error, "Exchange failed");
                    last_error = Some(DnsError::AllUpstreamsFailed(format!(
                        "Upstream ({address}) exchange failed: {error}"
                    )));
                }
                Err(error) => {
                    // Often transient (reset, malformed response): one retry.
                    match upstream.exchange(request).await {
                        Ok(response) => return Ok((response, Arc::clone(upstream))),
                        Err(retry_error) => {
                            let message = format!(
                                "Upstream ({address}) exchange failed: first reason is {error}, second is: {retry_error}"
                            );
                            debug!(id = request.id(), "{message}");
                            last_error = Some(DnsError::AllUpstreamsFailed(message));
                        }
                    }
                }
            }
        }
    }

    Err(ExchangeFailure {
        error: last_error.unwrap_or(DnsError::NoUsableUpstreams),
        last_tried,
    })
}
