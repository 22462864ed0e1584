use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use anyhow::Result;
use chrono::Local;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use crate::capture::{pktinfo, Datagram};

/// Large enough for any UDP payload.
const RECV_BUF_LEN: usize = 9000;

/// Read datagrams from `socket` and queue them for the monitor loop until
/// cancelled or the queue closes.
///
/// `fallback_destination` is used when the kernel did not report one.
pub async fn run_listener(
    name: &'static str,
    socket: Arc<AsyncFd<std::net::UdpSocket>>,
    fallback_destination: IpAddr,
    tx: mpsc::Sender<Datagram>,
    cancel: CancellationToken,
) -> Result<()> {
    tracing::debug!("Starting {} listener", name);
    let mut buf = vec![0u8; RECV_BUF_LEN];

    loop {
        let mut guard = tokio::select! {
            _ = cancel.cancelled() => break,
            ready = socket.readable() => ready?,
        };

        loop {
            match pktinfo::try_recv(socket.get_ref(), &mut buf) {
                Ok(received) => {
                    let datagram = Datagram {
                        bytes: buf[..received.len].to_vec(),
                        source: received.source,
                        destination: received.destination.unwrap_or(fallback_destination),
                        interface: received.interface,
                        received_at: Instant::now(),
                        timestamp: Local::now(),
                    };
                    if tx.send(datagram).await.is_err() {
                        tracing::debug!("{} listener: queue closed", name);
                        return Ok(());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    guard.clear_ready();
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("{} listener: receive failed: {}", name, e);
                    guard.clear_ready();
                    break;
                }
            }
        }
    }

    tracing::debug!("{} listener stopped", name);
    Ok(())
}
