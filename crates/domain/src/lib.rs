pub mod config;
pub mod errors;
pub mod filter_rule;

pub use config::{
    BlockingMode, CliOverrides, Config, ConfigError, Dns64Settings, FilterList, FilterParams,
    ForwarderSettings, ListenerProtocol, ListenerSettings, LoggingConfig, UpstreamOptions,
};
pub use errors::DnsError;
pub use filter_rule::{effective_rules, is_blocking_ip, FilterRule};
