//! Listeners: UDP datagram and TCP length-framed ingestion feeding the
//! forwarder through a bounded worker pool.
//!
//! Each listener owns one accept/receive loop task. Workers are plain
//! tokio tasks gated by a semaphore so a listener never has more than
//! `worker_pool_size` queries in flight; the loop itself never calls the
//! forwarder.

pub mod tcp;
pub mod udp;

use crate::dns::forwarder::Forwarder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use warden_dns_domain::{DnsError, ListenerProtocol, ListenerSettings};

/// Running listener: reports its bound address and supports graceful
/// shutdown. Dropping the handle does not stop the listener; call
/// `shutdown` first.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// The actually bound address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the event loop to stop. Safe to call from any task; queued
    /// but unstarted work is cancelled, running workers finish and their
    /// responses are dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub async fn await_shutdown(self) {
        let _ = self.task.await;
    }
}

/// Bind and run a listener for `settings`, serving queries through
/// `forwarder`. The forwarder must outlive the listener.
pub async fn create_and_listen(
    settings: &ListenerSettings,
    forwarder: Arc<Forwarder>,
) -> Result<ListenerHandle, DnsError> {
    settings
        .validate()
        .map_err(DnsError::ListenerError)?;

    let ip: std::net::IpAddr = settings.address.parse().map_err(|_| {
        DnsError::ListenerError(format!("Invalid listen address {}", settings.address))
    })?;
    let bind_addr = SocketAddr::new(ip, settings.port);

    match settings.protocol {
        ListenerProtocol::Udp => udp::listen(bind_addr, settings, forwarder).await,
        ListenerProtocol::Tcp => tcp::listen(bind_addr, settings, forwarder).await,
    }
}

pub(crate) fn handle_from_parts(
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
) -> ListenerHandle {
    ListenerHandle {
        local_addr,
        cancel,
        task,
    }
}
