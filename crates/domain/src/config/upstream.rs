use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Configuration of a single upstream resolver. Immutable after creation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamOptions {
    /// Endpoint in `udp://HOST:PORT`, `tcp://HOST:PORT`, or bare
    /// `HOST:PORT` form (bare defaults to UDP with TCP fallback).
    pub address: String,

    /// Exchange timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Resolvers used to resolve the upstream's own hostname.
    #[serde(default)]
    pub bootstrap: Vec<String>,

    /// Overrides hostname resolution entirely when set.
    #[serde(default)]
    pub server_ip: Option<IpAddr>,

    /// Name of the network interface to bind outgoing sockets to.
    #[serde(default)]
    pub outbound_interface: Option<String>,

    /// Stable id reported back with every response served by this upstream.
    #[serde(default)]
    pub id: i32,
}

impl UpstreamOptions {
    pub fn new(address: impl Into<String>, id: i32) -> Self {
        Self {
            address: address.into(),
            timeout_ms: default_timeout_ms(),
            bootstrap: Vec::new(),
            server_ip: None,
            outbound_interface: None,
            id,
        }
    }
}

fn default_timeout_ms() -> u64 {
    5000
}
