//! UDP listener: one datagram is one logical request.

use super::{handle_from_parts, ListenerHandle};
use crate::dns::cache::UDP_RECV_BUF_SIZE;
use crate::dns::forwarder::Forwarder;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use warden_dns_domain::{DnsError, ListenerSettings};

pub(super) async fn listen(
    bind_addr: SocketAddr,
    settings: &ListenerSettings,
    forwarder: Arc<Forwarder>,
) -> Result<ListenerHandle, DnsError> {
    let socket = create_udp_socket(bind_addr)
        .map_err(|e| DnsError::ListenerError(format!("Failed to bind UDP {bind_addr}: {e}")))?;
    let local_addr = socket
        .local_addr()
        .map_err(|e| DnsError::ListenerError(e.to_string()))?;

    info!(address = %local_addr, "UDP listener started");

    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();
    let workers = Arc::new(Semaphore::new(settings.worker_pool_size));
    let socket = Arc::new(socket);

    let task = tokio::spawn(async move {
        run_loop(socket, forwarder, workers, loop_cancel).await;
    });

    Ok(handle_from_parts(local_addr, cancel, task))
}

async fn run_loop(
    socket: Arc<UdpSocket>,
    forwarder: Arc<Forwarder>,
    workers: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let mut recv_buf = [0u8; UDP_RECV_BUF_SIZE as usize];

    loop {
        let (len, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut recv_buf) => match received {
                Ok(x) => x,
                Err(e) => {
                    error!(error = %e, "UDP recv error");
                    continue;
                }
            },
        };

        // Datagrams larger than the buffer arrive truncated and would
        // only parse by accident; drop them.
        if len >= recv_buf.len() {
            debug!(peer = %peer, "Dropping oversized datagram");
            continue;
        }

        let payload = recv_buf[..len].to_vec();
        let socket = Arc::clone(&socket);
        let forwarder = Arc::clone(&forwarder);
        let workers = Arc::clone(&workers);
        let cancel = cancel.clone();

        tokio::spawn(async move {
            // Queued until a worker slot frees up; cancelled work never
            // reaches the forwarder.
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            if cancel.is_cancelled() {
                return;
            }

            let response = forwarder.handle_message(&payload).await;
            if response.is_empty() || cancel.is_cancelled() {
                return;
            }
            if let Err(e) = socket.send_to(&response, peer).await {
                debug!(peer = %peer, error = %e, "Failed to send UDP response");
            }
        });
    }

    info!("UDP listener stopped");
}

fn create_udp_socket(bind_addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let domain = if bind_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_recv_buffer_size(1 << 20)?;
    socket.bind(&bind_addr.into())?;
    socket.set_nonblocking(true)?;
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}
