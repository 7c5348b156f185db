pub mod filter;
pub mod forwarder;
pub mod listener;
pub mod logging;
pub mod root;
pub mod upstream;

pub use filter::{FilterList, FilterParams};
pub use forwarder::{BlockingMode, Dns64Settings, ForwarderSettings};
pub use listener::{ListenerProtocol, ListenerSettings};
pub use logging::LoggingConfig;
pub use root::{CliOverrides, Config, ConfigError};
pub use upstream::UpstreamOptions;
