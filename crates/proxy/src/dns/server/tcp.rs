//! TCP listener: RFC 7766 framing, pipelined requests, idle timeout.
//!
//! Responses are written back in worker completion order, which is legal
//! for DNS-over-TCP pipelining; clients match on transaction id.

use super::{handle_from_parts, ListenerHandle};
use crate::dns::forwarder::Forwarder;
use crate::dns::upstream::tcp::send_with_length_prefix;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use warden_dns_domain::{DnsError, ListenerSettings};

const ACCEPT_BACKLOG: i32 = 128;

pub(super) async fn listen(
    bind_addr: SocketAddr,
    settings: &ListenerSettings,
    forwarder: Arc<Forwarder>,
) -> Result<ListenerHandle, DnsError> {
    let listener = create_tcp_listener(bind_addr)
        .map_err(|e| DnsError::ListenerError(format!("Failed to bind TCP {bind_addr}: {e}")))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| DnsError::ListenerError(e.to_string()))?;

    info!(address = %local_addr, "TCP listener started");

    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();
    let workers = Arc::new(Semaphore::new(settings.worker_pool_size));
    let persistent = settings.persistent;
    let idle_timeout = Duration::from_millis(settings.idle_timeout_ms);

    let task = tokio::spawn(async move {
        loop {
            let (stream, peer) = tokio::select! {
                _ = loop_cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(x) => x,
                    Err(e) => {
                        error!(error = %e, "TCP accept error");
                        continue;
                    }
                },
            };

            debug!(peer = %peer, "TCP connection accepted");
            let connection = Connection {
                forwarder: Arc::clone(&forwarder),
                workers: Arc::clone(&workers),
                cancel: loop_cancel.child_token(),
                persistent,
                idle_timeout,
            };
            tokio::spawn(async move {
                connection.run(stream, peer).await;
            });
        }
        info!("TCP listener stopped");
    });

    Ok(handle_from_parts(local_addr, cancel, task))
}

struct Connection {
    forwarder: Arc<Forwarder>,
    workers: Arc<Semaphore>,
    cancel: CancellationToken,
    persistent: bool,
    idle_timeout: Duration,
}

impl Connection {
    async fn run(self, stream: TcpStream, peer: SocketAddr) {
        let (mut read_half, write_half) = stream.into_split();
        let (response_tx, response_rx) = mpsc::channel::<Vec<u8>>(64);

        let writer_cancel = self.cancel.clone();
        let writer = tokio::spawn(async move {
            write_loop(write_half, response_rx, writer_cancel).await;
        });

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break,
                read = tokio::time::timeout(self.idle_timeout, read_frame(&mut read_half)) => {
                    match read {
                        Err(_) => {
                            debug!(peer = %peer, "TCP connection idle, closing");
                            break;
                        }
                        Ok(Err(e)) => {
                            debug!(peer = %peer, error = %e, "TCP read ended");
                            break;
                        }
                        Ok(Ok(frame)) => frame,
                    }
                }
            };

            self.dispatch(frame, response_tx.clone());

            if !self.persistent {
                // One-shot mode: stop reading; the connection closes once
                // the response write completes.
                break;
            }
        }

        // Writers drain after every worker drops its sender clone.
        drop(response_tx);
        let _ = writer.await;
        debug!(peer = %peer, "TCP connection closed");
    }

    fn dispatch(&self, payload: Vec<u8>, response_tx: mpsc::Sender<Vec<u8>>) {
        let forwarder = Arc::clone(&self.forwarder);
        let workers = Arc::clone(&self.workers);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
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
            // Fails only when the connection went away; the response is
            // dropped rather than touching dead state.
            let _ = response_tx.send(response).await;
        });
    }
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut responses: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    loop {
        let response = tokio::select! {
            _ = cancel.cancelled() => break,
            received = responses.recv() => match received {
                Some(r) => r,
                None => break,
            },
        };
        if let Err(e) = send_with_length_prefix(&mut write_half, &response).await {
            debug!(error = %e, "TCP write failed, closing connection");
            cancel.cancel();
            break;
        }
    }
}

async fn read_frame(read_half: &mut OwnedReadHalf) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 2];
    read_half.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "zero-length frame",
        ));
    }
    let mut payload = vec![0u8; len];
    read_half.read_exact(&mut payload).await?;
    Ok(payload)
}

fn create_tcp_listener(bind_addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if bind_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&bind_addr.into())?;
    socket.listen(ACCEPT_BACKLOG)?;
    socket.set_nonblocking(true)?;
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}
