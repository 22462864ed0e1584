use std::fmt;
use std::net::IpAddr;
use serde::Deserialize;

/// Address family of an observed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[default]
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "IPv4",
            AddressFamily::Ipv6 => "IPv6",
        }
    }
}

/// The six classified mDNS operations.
///
/// Browse traffic enumerates instances of a service type; resolve traffic
/// fetches SRV/TXT details for one known instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Probe,
    Goodbye,
    BrowseQuery,
    BrowseAnswer,
    ResolveQuery,
    ResolveAnswer,
}

impl OpKind {
    pub const COUNT: usize = 6;

    pub const ALL: [OpKind; OpKind::COUNT] = [
        OpKind::Probe,
        OpKind::Goodbye,
        OpKind::BrowseQuery,
        OpKind::BrowseAnswer,
        OpKind::ResolveQuery,
        OpKind::ResolveAnswer,
    ];

    pub fn index(self) -> usize {
        match self {
            OpKind::Probe => 0,
            OpKind::Goodbye => 1,
            OpKind::BrowseQuery => 2,
            OpKind::BrowseAnswer => 3,
            OpKind::ResolveQuery => 4,
            OpKind::ResolveAnswer => 5,
        }
    }

    /// Map a browse operation onto its resolve counterpart.
    pub fn as_resolve(self) -> Self {
        match self {
            OpKind::BrowseQuery => OpKind::ResolveQuery,
            OpKind::BrowseAnswer => OpKind::ResolveAnswer,
            other => other,
        }
    }
}

/// Running operation totals. `total()` always equals the sum of the slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpCounts {
    total: u64,
    slots: [u64; OpKind::COUNT],
}

impl OpCounts {
    pub fn record(&mut self, op: OpKind) {
        self.total += 1;
        self.slots[op.index()] += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn get(&self, op: OpKind) -> u64 {
        self.slots[op.index()]
    }
}

/// Per-packet classification used for host and session tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Query,
    LegacyQuery,
    Response,
    Bad,
}

impl PacketKind {
    fn index(self) -> usize {
        match self {
            PacketKind::Query => 0,
            PacketKind::LegacyQuery => 1,
            PacketKind::Response => 2,
            PacketKind::Bad => 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketCounts([u64; 4]);

impl PacketCounts {
    pub fn record(&mut self, kind: PacketKind) {
        self.0[kind.index()] += 1;
    }

    pub fn get(&self, kind: PacketKind) -> u64 {
        self.0[kind.index()]
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }
}

/// Whether an inbound packet answers a query this monitor sent itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Origin {
    #[default]
    External,
    SelfGenerated,
}

impl Origin {
    pub fn is_external(self) -> bool {
        self == Origin::External
    }
}

/// Two-label service type such as `_http._tcp`, normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceType(String);

impl ServiceType {
    pub fn from_labels(service: &[u8], protocol: &[u8]) -> Self {
        let mut key = String::with_capacity(service.len() + protocol.len() + 1);
        key.push_str(&String::from_utf8_lossy(service).to_ascii_lowercase());
        key.push('.');
        key.push_str(&String::from_utf8_lossy(protocol).to_ascii_lowercase());
        ServiceType(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}
