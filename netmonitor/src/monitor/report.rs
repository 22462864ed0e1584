//! End-of-session summary.

use std::time::Duration;
use chrono::{DateTime, Local, Timelike};
use shared::types::{AddressFamily, OpCounts, OpKind, PacketKind};
use crate::monitor::filter::HostTracking;
use crate::monitor::hosts::{HostEntry, HostRegistry};
use crate::monitor::stats::ActivityStat;
use crate::monitor::Monitor;

const OP_BANNER: &str = "Total Ops   Probe   Goodbye  BrowseQ  BrowseA ResolveQ ResolveA";
const PACKET_BANNER: &str = "    Pkts    Query   LegacyQ Response";
const ADDRESS_COLUMN: usize = 25;
const UNKNOWN_SOFTWARE: &str = "*** Unknown (Jaguar, Windows, etc.) ***";

/// Hosts queried more often than this without ever answering HINFO are
/// flagged as running an unknown responder.
const UNANSWERED_QUERY_THRESHOLD: u32 = 2;

/// Average per minute. Short captures are measured in milliseconds so a
/// few seconds of traffic still gives a meaningful figure.
pub fn per_minute(count: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs();
    if secs > 10 {
        count * 60 / secs
    } else {
        let millis = (secs * 1000 + u64::from(elapsed.subsec_millis())).max(1);
        count * 60_000 / millis
    }
}

fn clock(time: &DateTime<Local>) -> String {
    format!(
        "{:>3}:{:02}:{:02}.{:06}",
        time.hour(),
        time.minute(),
        time.second(),
        (time.nanosecond() / 1000) % 1_000_000
    )
}

fn span(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{:>3}:{:02}:{:02}.{:06}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60,
        elapsed.subsec_micros()
    )
}

fn op_columns(ops: &OpCounts) -> String {
    let mut line = format!("{:>8}", ops.total());
    for op in OpKind::ALL {
        line.push_str(&format!(" {:>8}", ops.get(op)));
    }
    line
}

fn service_rows(top: &[ActivityStat]) -> Vec<String> {
    if top.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!("{:<width$}{}", "Service Type", OP_BANNER, width = ADDRESS_COLUMN)];
    for stat in top {
        lines.push(format!(
            "{:<width$}{}",
            stat.service_type(),
            op_columns(stat.ops()),
            width = ADDRESS_COLUMN
        ));
    }
    lines
}

fn host_rows(host: &HostEntry) -> Vec<String> {
    let mut lines = Vec::new();
    let address = host.address().to_string();
    let mut line = if address.len() > ADDRESS_COLUMN {
        lines.push(address);
        " ".repeat(ADDRESS_COLUMN)
    } else {
        format!("{:<width$}", address, width = ADDRESS_COLUMN)
    };

    let packets = host.packets();
    line.push_str(&op_columns(host.ops()));
    line.push_str(&format!(
        " {:>8} {:>8} {:>8} {:>8}",
        host.total_packets(),
        packets.get(PacketKind::Query),
        packets.get(PacketKind::LegacyQuery),
        packets.get(PacketKind::Response)
    ));
    if packets.get(PacketKind::Bad) > 0 {
        line.push_str(&format!("Bad: {:>8}", packets.get(PacketKind::Bad)));
    }
    lines.push(line);

    let software = match host.software() {
        Some(software) => Some(software),
        None if host.query_attempts() > UNANSWERED_QUERY_THRESHOLD => Some(UNKNOWN_SOFTWARE),
        None => None,
    };
    if host.hostname().is_some() || host.hardware().is_some() || software.is_some() {
        let hostname = host.hostname().map(|n| n.to_string()).unwrap_or_default();
        lines.push(format!(
            "{:<45} {:<14} {}",
            hostname,
            host.hardware().unwrap_or_default(),
            software.unwrap_or_default()
        ));
    }
    lines
}

/// Busiest hosts of one family, preceded by a blank line and the banner.
pub fn host_table(registry: &HostRegistry, n: usize) -> Vec<String> {
    if registry.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![
        String::new(),
        format!("{:<width$}{}{}", "Source Address", OP_BANNER, PACKET_BANNER, width = ADDRESS_COLUMN),
    ];
    for host in registry.top_by_packets(n) {
        lines.extend(host_rows(host));
    }
    lines
}

impl Monitor {
    /// Render the final summary. Service types already reported are not
    /// repeated if this is called again.
    pub fn summary(
        &mut self,
        ended: DateTime<Local>,
        elapsed: Duration,
        top_services: usize,
        top_hosts: usize,
    ) -> Vec<String> {
        let tracking = self.filter.tracking();
        let totals = self.totals.clone();
        let rate = |count: u64| per_minute(count, elapsed);

        let mut lines = vec![
            String::new(),
            String::new(),
            format!("Started      {}", clock(&self.started)),
            format!("End          {}", clock(&ended)),
            format!("Captured for {}", span(elapsed)),
        ];

        if tracking == HostTracking::Enabled {
            let mut line = String::from("Unique source addresses seen on network:");
            for family in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
                let count = self.hosts.family(family).len();
                if count > 0 {
                    line.push_str(&format!(" {} ({})", count, family.label()));
                }
            }
            if self.hosts.family(AddressFamily::Ipv4).is_empty() && self.hosts.family(AddressFamily::Ipv6).is_empty() {
                line.push_str(" None");
            }
            lines.push(line);
        }
        lines.push(String::new());

        let packets = &totals.packets;
        let multicast_total = packets.get(PacketKind::Query)
            + packets.get(PacketKind::LegacyQuery)
            + packets.get(PacketKind::Response);
        let rows = [
            ("Modern Query        Packets:      ", packets.get(PacketKind::Query)),
            ("Legacy Query        Packets:      ", packets.get(PacketKind::LegacyQuery)),
            ("Multicast Response  Packets:      ", packets.get(PacketKind::Response)),
            ("Total     Multicast Packets:      ", multicast_total),
        ];
        for (label, count) in rows {
            lines.push(format!("{}{:>7}   (avg{:>5}/min)", label, count, rate(count)));
        }
        lines.push(String::new());

        let rows = [
            ("Total New Service Probes:         ", totals.probes),
            ("Total Goodbye Announcements:      ", totals.goodbyes),
            ("Total Query Questions:            ", totals.questions),
            ("Total Queries from Legacy Clients:", totals.legacy),
            ("Total Answers/Announcements:      ", totals.answers),
            ("Total Additional Records:         ", totals.additionals),
        ];
        for (label, count) in rows {
            lines.push(format!("{}{:>7}   (avg{:>5}/min)", label, count, rate(count)));
        }
        lines.push(String::new());

        lines.extend(service_rows(&self.stats.take_top(top_services)));

        if tracking == HostTracking::Enabled {
            for family in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
                lines.extend(host_table(self.hosts.family(family), top_hosts));
            }
        }
        lines
    }
}
