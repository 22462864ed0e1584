use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use shared::types::PacketKind;
use crate::capture::transport::Transport;
use crate::capture::Datagram;
use crate::monitor::Monitor;

/// Write display lines to stdout. Output errors are logged, never fatal.
pub fn emit(lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    let mut out = std::io::stdout().lock();
    for line in lines {
        if let Err(e) = writeln!(out, "{}", line) {
            tracing::warn!("Failed to write output: {}", e);
            return;
        }
    }
    let _ = out.flush();
}

fn log_status(monitor: &Monitor) {
    let totals = monitor.totals();
    tracing::info!(
        "Status: {} packets ({} query, {} legacy, {} response, {} bad), {} probes, {} goodbyes, {} service types",
        totals.packets.total(),
        totals.packets.get(PacketKind::Query),
        totals.packets.get(PacketKind::LegacyQuery),
        totals.packets.get(PacketKind::Response),
        totals.packets.get(PacketKind::Bad),
        totals.probes,
        totals.goodbyes,
        monitor.stats().len()
    );
}

/// Single consumer of the capture queue. Each datagram is tagged, classified
/// and its follow-up queries sent before the next one is taken.
///
/// Returns the monitor for the final summary once cancelled, or once every
/// listener has gone away (which also cancels `cancel`).
pub async fn run(
    mut monitor: Monitor,
    mut transport: Transport,
    mut rx: mpsc::Receiver<Datagram>,
    status_interval: Option<Duration>,
    cancel: CancellationToken,
) -> Monitor {
    let mut status = tokio::time::interval(status_interval.unwrap_or(Duration::from_secs(3600)));
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // first tick completes immediately
    status.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            datagram = rx.recv() => {
                let Some(datagram) = datagram else {
                    tracing::warn!("All listeners stopped");
                    cancel.cancel();
                    break;
                };
                let mut packet = transport.tag(datagram);
                let outcome = monitor.classify(&mut packet);
                emit(&outcome.lines);
                for query in &outcome.queries {
                    if let Err(e) = transport.send(query) {
                        tracing::warn!("{:#}", e);
                    }
                }
            }
            _ = status.tick(), if status_interval.is_some() => log_status(&monitor),
        }
    }

    monitor
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Instant;
    use chrono::Local;
    use shared::protocol::{MDNS_GROUP_V4, MDNS_PORT};
    use shared::types::AddressFamily;
    use crate::monitor::filter::AddressFilter;
    use crate::wire::testing::*;

    fn datagram(bytes: Vec<u8>) -> Datagram {
        Datagram {
            bytes,
            source: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), MDNS_PORT),
            destination: IpAddr::V4(MDNS_GROUP_V4),
            interface: None,
            received_at: Instant::now(),
            timestamp: Local::now(),
        }
    }

    #[tokio::test]
    async fn test_run_drains_queue_and_returns_monitor() {
        let monitor = Monitor::new(AddressFilter::new(AddressFamily::Ipv4), true, None);
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let query = PacketBuilder::query().question("_http._tcp.local.", TYPE_PTR, false).build();
        tx.send(datagram(query.clone())).await.unwrap();
        tx.send(datagram(query)).await.unwrap();
        drop(tx);

        // no sockets: follow-up sends fail and are only logged
        let monitor = run(monitor, Transport::new(None), rx, None, cancel.clone()).await;
        assert_eq!(monitor.totals().questions, 2);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let monitor = Monitor::new(AddressFilter::new(AddressFamily::Ipv4), false, None);
        let (_tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let monitor = run(monitor, Transport::new(None), rx, Some(Duration::from_secs(1)), cancel).await;
        assert_eq!(monitor.totals().packets.total(), 0);
    }
}
