use serde::{Deserialize, Serialize};

use super::filter::FilterParams;
use super::upstream::UpstreamOptions;

/// How blocked queries are answered.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockingMode {
    /// REFUSED for adblock-style rules, the rule address otherwise.
    #[default]
    Default,
    /// Always REFUSED.
    Refused,
    /// Always NXDOMAIN.
    Nxdomain,
    /// `0.0.0.0` / `::` for A/AAAA, SOA-only otherwise.
    UnspecifiedAddress,
    /// The configured custom address for A/AAAA, SOA-only otherwise.
    CustomAddress,
}

/// DNS64 prefix discovery parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Dns64Settings {
    /// Resolvers queried for `ipv4only.arpa.` during discovery.
    pub upstreams: Vec<UpstreamOptions>,

    #[serde(default = "default_dns64_max_tries")]
    pub max_tries: u32,

    /// Delay before each discovery attempt, in milliseconds.
    #[serde(default = "default_dns64_wait_time_ms")]
    pub wait_time_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwarderSettings {
    /// Upstreams tried first, in configuration order.
    #[serde(default)]
    pub upstreams: Vec<UpstreamOptions>,

    /// Upstreams tried only after every primary has failed.
    #[serde(default)]
    pub fallbacks: Vec<UpstreamOptions>,

    #[serde(default)]
    pub blocking_mode: BlockingMode,

    /// Used by `BlockingMode::CustomAddress` for A questions; empty means
    /// "respond with SOA-only instead".
    #[serde(default)]
    pub custom_blocking_ipv4: String,

    /// Same for AAAA questions.
    #[serde(default)]
    pub custom_blocking_ipv6: String,

    #[serde(default = "default_blocked_response_ttl")]
    pub blocked_response_ttl_secs: u32,

    /// Answer every AAAA query with a short-retry SOA.
    #[serde(default)]
    pub block_ipv6: bool,

    /// Whether upstreams may be reached over IPv6.
    #[serde(default = "default_true")]
    pub ipv6_available: bool,

    /// Response cache capacity in entries; 0 disables caching entirely.
    #[serde(default = "default_dns_cache_size")]
    pub dns_cache_size: usize,

    /// Serve expired entries immediately and refresh them in the background.
    #[serde(default)]
    pub optimistic_cache: bool,

    #[serde(default)]
    pub dns64: Option<Dns64Settings>,

    #[serde(default)]
    pub filter: FilterParams,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            upstreams: vec![UpstreamOptions::new("udp://8.8.8.8:53", 0)],
            fallbacks: Vec::new(),
            blocking_mode: BlockingMode::Default,
            custom_blocking_ipv4: String::new(),
            custom_blocking_ipv6: String::new(),
            blocked_response_ttl_secs: default_blocked_response_ttl(),
            block_ipv6: false,
            ipv6_available: true,
            dns_cache_size: default_dns_cache_size(),
            optimistic_cache: false,
            dns64: None,
            filter: FilterParams::default(),
        }
    }
}

fn default_blocked_response_ttl() -> u32 {
    3600
}

fn default_dns_cache_size() -> usize {
    1000
}

fn default_dns64_max_tries() -> u32 {
    5
}

fn default_dns64_wait_time_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}
