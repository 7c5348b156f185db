use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListenerProtocol {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerSettings {
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub protocol: ListenerProtocol,

    /// TCP only: keep the connection open for pipelined requests.
    #[serde(default = "default_true")]
    pub persistent: bool,

    /// TCP only: close idle connections after this long. Must be > 0.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Number of concurrently processed queries per listener.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
}

impl ListenerSettings {
    pub fn udp(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            protocol: ListenerProtocol::Udp,
            persistent: true,
            idle_timeout_ms: default_idle_timeout_ms(),
            worker_pool_size: default_worker_pool_size(),
        }
    }

    pub fn tcp(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            protocol: ListenerProtocol::Tcp,
            persistent: true,
            idle_timeout_ms: default_idle_timeout_ms(),
            worker_pool_size: default_worker_pool_size(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.protocol == ListenerProtocol::Tcp && self.idle_timeout_ms == 0 {
            return Err("idle_timeout_ms must be greater than zero".to_string());
        }
        if self.worker_pool_size == 0 {
            return Err("worker_pool_size must be greater than zero".to_string());
        }
        Ok(())
    }
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    53
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_worker_pool_size() -> usize {
    24
}

fn default_true() -> bool {
    true
}
