use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use warden_dns_domain::{CliOverrides, Config};
use warden_dns_proxy::dns::events::EventSink;
use warden_dns_proxy::dns::server::create_and_listen;
use warden_dns_proxy::Forwarder;

mod bootstrap;

#[derive(Parser)]
#[command(name = "warden-dns")]
#[command(version)]
#[command(about = "Warden DNS - filtering DNS forwarder with caching and DNS64")]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address applied to every configured listener
    #[arg(short = 'b', long)]
    bind: Option<String>,

    /// Listen port applied to every configured listener
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let overrides = CliOverrides {
        listen_address: cli.bind.clone(),
        listen_port: cli.port,
        log_level: cli.log_level.clone(),
    };
    let config = Config::load(cli.config.as_deref(), overrides)?;

    bootstrap::init_logging(&config);
    info!("Starting Warden DNS v{}", warden_dns_proxy::version());

    let (events, mut event_rx) = EventSink::enabled();
    let (forwarder, warning) = Forwarder::init(config.forwarder.clone(), events)
        .await
        .map_err(|e| anyhow::anyhow!("Forwarder init failed: {e}"))?;
    if let Some(warning) = warning {
        warn!("Forwarder initialized with warnings: {warning}");
    }

    // Query log: one structured line per processed request.
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            info!(
                domain = %event.domain,
                qtype = %event.qtype,
                status = %event.status,
                elapsed_ms = event.elapsed_ms,
                cache_hit = event.cache_hit,
                upstream_id = ?event.upstream_id,
                "Request processed"
            );
        }
    });

    let mut listeners = Vec::with_capacity(config.listeners.len());
    for settings in &config.listeners {
        let listener = create_and_listen(settings, Arc::clone(&forwarder))
            .await
            .map_err(|e| anyhow::anyhow!("Listener init failed: {e}"))?;
        info!(address = %listener.local_addr(), protocol = ?settings.protocol, "Listener ready");
        listeners.push(listener);
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    for listener in &listeners {
        listener.shutdown();
    }
    for listener in listeners {
        listener.await_shutdown().await;
    }
    forwarder.deinit().await;

    Ok(())
}
