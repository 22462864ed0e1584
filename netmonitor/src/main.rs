mod capture;
mod config;
mod monitor;
mod session;
mod wire;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use shared::protocol::{MDNS_GROUP_V4, MDNS_GROUP_V6};
use shared::types::AddressFamily;
use crate::capture::listener::run_listener;
use crate::capture::socket::{bind_multicast, bind_unicast};
use crate::capture::transport::{Endpoint, Transport};
use crate::config::{CliOverrides, Config};
use crate::monitor::filter::AddressFilter;
use crate::monitor::Monitor;

const LEGEND: &str = "\
Per-packet header:
  -Q-   Multicast query from a client that accepts multicast responses
  -R-   Multicast response containing answers or announcements
  -LQ-  Query from a legacy client that does not listen for multicast responses
  Q/Ans/Auth/Add  Question, answer, authority and additional record counts

Per-record display:
  (PM)  Probe question (new service starting), requesting multicast response
  (PU)  Probe question (new service starting), requesting unicast response
  (DE)  Deletion or goodbye (service going away)
  (LQ)  Legacy query question
  (QM)  Query question, requesting multicast response
  (QU)  Query question, requesting unicast response
  (KA)  Known answer (information the querier already knows)
  (AU)  Authority record
  (AN)  Unique answer or announcement (entire RR set)
  (AN+) Answer or announcement (adds to existing RR set members)
  (AD)  Unique additional record set
  (AD+) Additional records (add to existing RR set members)
  (OP)  OPT pseudo-record

Summary columns:
  Probe     Probes for this service type starting up
  Goodbye   Goodbyes for this service type shutting down
  BrowseQ   Browse questions looking for instances of this service
  BrowseA   Browse answers advertising instances of this service
  ResolveQ  Resolve questions connecting to an instance of this service
  ResolveA  Resolve answers giving connection details for an instance";

#[derive(Parser)]
#[command(name = "mdns-netmonitor")]
#[command(version)]
#[command(about = "Passively watch mDNS traffic and summarise it on exit")]
#[command(after_help = LEGEND)]
struct Cli {
    /// Path to configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Only watch traffic on this interface (name or index)
    #[arg(short = 'i', long, value_name = "IFACE")]
    interface: Option<String>,

    /// Watch IPv6 instead of IPv4 when no hosts are given
    #[arg(short = '6', long)]
    ipv6: bool,

    /// Don't send reverse and HINFO queries for newly seen hosts
    #[arg(long)]
    no_resolve: bool,

    /// Only show traffic from these hosts (addresses or names)
    #[arg(value_name = "HOST")]
    hosts: Vec<String>,
}

async fn shutdown_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

fn group(family: AddressFamily) -> IpAddr {
    match family {
        AddressFamily::Ipv4 => IpAddr::V4(MDNS_GROUP_V4),
        AddressFamily::Ipv6 => IpAddr::V6(MDNS_GROUP_V6),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Log to stderr so stdout carries only the packet display
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mdns_netmonitor=info")),
        )
        .init();

    tracing::info!("Starting mdns-netmonitor");

    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            tracing::info!("Loaded config from {}", path.display());
            config
        }
        None => Config::default(),
    };
    config.apply(CliOverrides {
        interface: cli.interface,
        ipv6: cli.ipv6,
        no_resolve: cli.no_resolve,
        hosts: cli.hosts,
    });
    config.validate()?;

    let interface = config
        .monitor
        .interface
        .as_deref()
        .map(capture::interface::resolve)
        .transpose()?;
    if let Some(iface) = &interface {
        tracing::info!(
            "Watching interface {}/{}",
            iface.index,
            iface.name.as_deref().unwrap_or("?")
        );
    }
    let index = interface.as_ref().map(|iface| iface.index);

    let family = config.monitor.family;
    let mut monitor = Monitor::new(
        AddressFilter::new(family).with_interface(index),
        config.monitor.resolve_hosts,
        interface.and_then(|iface| iface.name),
    );
    for host in &config.monitor.filters {
        let addr = config::resolve_filter(host, family).await?;
        tracing::info!("Filtering on {} ({})", addr, host);
        monitor.add_filter(addr);
    }

    // Capture every family a filter needs, or the default one
    let mut families: Vec<AddressFamily> = Vec::new();
    for addr in monitor.filter().addresses() {
        let f = AddressFamily::of(addr);
        if !families.contains(&f) {
            families.push(f);
        }
    }
    if families.is_empty() {
        families.push(family);
    }

    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(1024);
    let mut transport = Transport::new(index);
    let mut listeners = Vec::new();

    for family in families {
        let multicast = Arc::new(bind_multicast(family, index)?);
        let unicast = Arc::new(bind_unicast(family)?);
        let unspecified = match family {
            AddressFamily::Ipv4 => IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            AddressFamily::Ipv6 => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
        };

        for (name, socket, fallback) in [
            ("multicast", multicast.clone(), group(family)),
            ("unicast", unicast.clone(), unspecified),
        ] {
            let listener_tx = tx.clone();
            let listener_cancel = cancel.clone();
            listeners.push(tokio::spawn(async move {
                if let Err(e) = run_listener(name, socket, fallback, listener_tx, listener_cancel).await {
                    tracing::error!("{} {} listener error: {:#}", family.label(), name, e);
                }
            }));
        }

        transport = transport.with_endpoint(family, Endpoint { multicast, unicast });
    }
    // Only listeners hold senders, so the queue closes when they all stop
    drop(tx);

    let status_interval = config.report.status_interval();
    let session_cancel = cancel.clone();
    let session_handle = tokio::spawn(session::run(monitor, transport, rx, status_interval, session_cancel));

    tokio::select! {
        result = shutdown_signal() => {
            result?;
            tracing::info!("Shutdown signal received");
        }
        _ = cancel.cancelled() => {}
    }

    cancel.cancel();

    let mut monitor = session_handle.await.context("Monitor task failed")?;
    for handle in listeners {
        if let Err(e) = handle.await {
            tracing::error!("Listener task failed: {}", e);
        }
    }

    let elapsed = monitor.elapsed();
    let lines = monitor.summary(
        Local::now(),
        elapsed,
        config.report.top_services,
        config.report.top_hosts,
    );
    session::emit(&lines);

    tracing::info!("Shutdown complete");
    Ok(())
}
