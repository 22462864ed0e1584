pub mod classify;
pub mod display;
pub mod filter;
pub mod hosts;
pub mod report;
pub mod resolve;
pub mod stats;

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use chrono::{DateTime, Local};
use shared::types::{Origin, PacketCounts};
use crate::monitor::filter::AddressFilter;
use crate::monitor::hosts::HostRegistries;
use crate::monitor::resolve::OutboundQuery;
use crate::monitor::stats::ServiceStats;

/// One captured datagram on its way through the classifier.
#[derive(Debug, Clone)]
pub struct InboundPacket {
    pub bytes: Vec<u8>,
    pub source: SocketAddr,
    pub destination: IpAddr,
    pub interface: Option<u32>,
    pub origin: Origin,
    pub received_at: Instant,
    pub timestamp: DateTime<Local>,
}

/// What classifying one packet produced: display lines and any follow-up
/// queries for the transport.
#[derive(Debug, Default)]
pub struct Outcome {
    pub lines: Vec<String>,
    pub queries: Vec<OutboundQuery>,
}

/// Session-wide counters, readable at any time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Totals {
    pub packets: PacketCounts,
    pub probes: u64,
    pub goodbyes: u64,
    pub questions: u64,
    pub legacy: u64,
    pub answers: u64,
    pub additionals: u64,
}

/// All state for one monitoring session.
#[derive(Debug)]
pub struct Monitor {
    filter: AddressFilter,
    hosts: HostRegistries,
    stats: ServiceStats,
    totals: Totals,
    resolve_hosts: bool,
    interface_name: Option<String>,
    started: DateTime<Local>,
    started_at: Instant,
}

impl Monitor {
    pub fn new(filter: AddressFilter, resolve_hosts: bool, interface_name: Option<String>) -> Self {
        Self {
            filter,
            hosts: HostRegistries::default(),
            stats: ServiceStats::default(),
            totals: Totals::default(),
            resolve_hosts,
            interface_name,
            started: Local::now(),
            started_at: Instant::now(),
        }
    }

    pub fn add_filter(&mut self, addr: IpAddr) {
        self.filter.add(addr);
    }

    #[cfg(test)]
    pub fn clear_filters(&mut self) {
        self.filter.clear();
    }

    pub fn filter(&self) -> &AddressFilter {
        &self.filter
    }

    pub fn hosts(&self) -> &HostRegistries {
        &self.hosts
    }

    pub fn stats(&self) -> &ServiceStats {
        &self.stats
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    /// Time since the session started, on the monotonic clock.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
