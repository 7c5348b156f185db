//! Per-query telemetry: one `RequestProcessedEvent` per handled message,
//! delivered through an optional channel sink.

use tokio::sync::mpsc;

/// Everything known about one processed query, emitted after the response
/// is determined.
#[derive(Debug, Clone, Default)]
pub struct RequestProcessedEvent {
    /// Queried domain, with trailing dot.
    pub domain: String,
    /// Query type as text (`A`, `AAAA`, ...).
    pub qtype: String,
    /// Response code as text (`NOERROR`, `REFUSED`, ...).
    pub status: String,
    /// Final answer section, `<TYPE>, <rdata>` per line.
    pub answer: String,
    /// Answer section of the upstream response a post-filter replaced.
    pub original_answer: String,
    /// Texts of the effective rules, primary verdict first.
    pub rules: Vec<String>,
    /// List ids of the effective rules, aligned with `rules`.
    pub filter_list_ids: Vec<i32>,
    /// True when the primary verdict was an exception rule.
    pub whitelist: bool,
    /// Id of the answering upstream, when one was consulted.
    pub upstream_id: Option<i32>,
    /// Transport-level failure description, empty on success.
    pub error: String,
    pub bytes_sent: usize,
    pub bytes_received: usize,
    pub elapsed_ms: u64,
    pub cache_hit: bool,
}

impl RequestProcessedEvent {
    /// Merge `rules` into the event, deduplicated by text, keeping the
    /// incoming order ahead of previously recorded entries.
    pub fn prepend_rules(&mut self, rules: &[&warden_dns_domain::FilterRule]) {
        if rules.is_empty() {
            return;
        }
        for rule in rules.iter().rev() {
            if self.rules.iter().any(|text| *text == rule.text) {
                continue;
            }
            self.rules.insert(0, rule.text.clone());
            self.filter_list_ids.insert(0, rule.filter_id);
        }
        self.whitelist = rules[0].is_exception;
    }
}

/// Hands events to whoever is listening; a disabled sink drops them with
/// no overhead beyond the branch.
#[derive(Clone, Default)]
pub struct EventSink {
    sender: Option<mpsc::UnboundedSender<RequestProcessedEvent>>,
}

impl EventSink {
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn enabled() -> (Self, mpsc::UnboundedReceiver<RequestProcessedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: Some(tx) }, rx)
    }

    pub fn emit(&self, event: RequestProcessedEvent) {
        if let Some(tx) = &self.sender {
            let _ = tx.send(event);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
