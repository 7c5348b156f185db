use tracing_subscriber::EnvFilter;
use warden_dns_domain::Config;

/// `RUST_LOG` wins over the configured level so ad-hoc debugging never
/// requires a config edit.
pub fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
