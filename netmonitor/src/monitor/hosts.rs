use std::net::IpAddr;
use std::time::Instant;
use hickory_proto::rr::{Name, RecordType};
use rustc_hash::FxHashMap;
use shared::protocol::{REVERSE_ZONE_V4, REVERSE_ZONE_V6};
use shared::types::{AddressFamily, OpCounts, OpKind, PacketCounts, PacketKind};
use crate::monitor::resolve::MAX_QUERY_ATTEMPTS;
use crate::wire::{RecordData, WireRecord};

/// Registry storage grows by this many entries at a time.
pub const HOST_CHUNK: usize = 64;

/// Everything learned about one source address during the session.
#[derive(Debug, Clone)]
pub struct HostEntry {
    address: IpAddr,
    packets: PacketCounts,
    ops: OpCounts,
    hostname: Option<Name>,
    reverse_name: Option<Name>,
    hardware: Option<String>,
    software: Option<String>,
    query_attempts: u32,
    last_query: Option<Instant>,
}

impl HostEntry {
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            packets: PacketCounts::default(),
            ops: OpCounts::default(),
            hostname: None,
            reverse_name: reverse_name(&address),
            hardware: None,
            software: None,
            query_attempts: 0,
            last_query: None,
        }
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn packets(&self) -> &PacketCounts {
        &self.packets
    }

    pub fn ops(&self) -> &OpCounts {
        &self.ops
    }

    pub fn hostname(&self) -> Option<&Name> {
        self.hostname.as_ref()
    }

    pub fn reverse_name(&self) -> Option<&Name> {
        self.reverse_name.as_ref()
    }

    pub fn hardware(&self) -> Option<&str> {
        self.hardware.as_deref()
    }

    pub fn software(&self) -> Option<&str> {
        self.software.as_deref()
    }

    pub fn query_attempts(&self) -> u32 {
        self.query_attempts
    }

    pub fn last_query(&self) -> Option<Instant> {
        self.last_query
    }

    pub fn total_packets(&self) -> u64 {
        self.packets.total()
    }

    pub fn record_packet(&mut self, kind: PacketKind) {
        self.packets.record(kind);
    }

    pub fn record_op(&mut self, op: OpKind) {
        self.ops.record(op);
    }

    pub(crate) fn note_query_sent(&mut self, now: Instant) {
        self.query_attempts += 1;
        self.last_query = Some(now);
    }

    /// Set the hostname if none is known yet. A fresh name restarts the
    /// query budget for the HINFO lookup unless the host was given up on.
    pub fn learn_hostname(&mut self, name: Name) -> bool {
        if self.hostname.is_some() {
            return false;
        }
        self.hostname = Some(name);
        if self.query_attempts < MAX_QUERY_ATTEMPTS {
            self.query_attempts = 0;
        }
        true
    }

    /// Pull hostname or HINFO details out of a record sent by this host.
    pub fn absorb(&mut self, record: &WireRecord) {
        match (&self.hostname, &record.data) {
            (None, RecordData::A(ip)) if record.rtype == RecordType::A => {
                if IpAddr::V4(*ip) == self.address {
                    self.learn_hostname(record.name.clone());
                }
            }
            (None, RecordData::Aaaa(ip)) if record.rtype == RecordType::AAAA => {
                if IpAddr::V6(*ip) == self.address {
                    self.learn_hostname(record.name.clone());
                }
            }
            (None, RecordData::Name(target)) if record.rtype == RecordType::PTR => {
                if self.reverse_name.as_ref() == Some(&record.name) {
                    self.learn_hostname(target.clone());
                }
            }
            (Some(hostname), RecordData::Text(strings)) if record.rtype == RecordType::HINFO => {
                // an empty hardware string tells us nothing; keep asking
                let known = strings.len() >= 2 && !strings[0].is_empty();
                if self.hardware.is_none() && *hostname == record.name && known {
                    self.hardware = Some(String::from_utf8_lossy(&strings[0]).into_owned());
                    self.software = Some(String::from_utf8_lossy(&strings[1]).into_owned());
                }
            }
            _ => {}
        }
    }
}

/// Reverse-lookup name for an address: dotted-decimal labels reversed for
/// IPv4, nibble labels reversed for IPv6.
pub fn reverse_name(addr: &IpAddr) -> Option<Name> {
    let text = match addr {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.{}.{}", o[3], o[2], o[1], o[0], REVERSE_ZONE_V4)
        }
        IpAddr::V6(v6) => {
            let mut text = String::with_capacity(64 + REVERSE_ZONE_V6.len());
            for byte in v6.octets().iter().rev() {
                text.push_str(&format!("{:X}.{:X}.", byte & 0x0F, byte >> 4));
            }
            text.push_str(REVERSE_ZONE_V6);
            text
        }
    };
    Name::from_ascii(&text).ok()
}

/// Hosts of one address family in first-seen order.
#[derive(Debug, Default)]
pub struct HostRegistry {
    entries: Vec<HostEntry>,
    index: FxHashMap<IpAddr, usize>,
}

impl HostRegistry {
    #[cfg(test)]
    pub fn find(&self, addr: &IpAddr) -> Option<&HostEntry> {
        self.index.get(addr).and_then(|&i| self.entries.get(i))
    }

    /// Look up `addr`, creating an entry on first sighting. `None` means the
    /// registry could not grow; the caller skips per-host accounting.
    pub fn get_or_create(&mut self, addr: IpAddr) -> Option<&mut HostEntry> {
        if let Some(&i) = self.index.get(&addr) {
            return self.entries.get_mut(i);
        }

        if self.entries.len() == self.entries.capacity()
            && self.entries.try_reserve_exact(HOST_CHUNK).is_err()
        {
            tracing::warn!("Host table full, not tracking {}", addr);
            return None;
        }

        let i = self.entries.len();
        self.entries.push(HostEntry::new(addr));
        self.index.insert(addr, i);
        self.entries.get_mut(i)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &HostEntry> {
        self.entries.iter()
    }

    /// Busiest hosts by total packets; equal totals keep first-seen order.
    pub fn top_by_packets(&self, n: usize) -> Vec<&HostEntry> {
        let mut hosts: Vec<&HostEntry> = self.entries.iter().collect();
        hosts.sort_by(|a, b| b.total_packets().cmp(&a.total_packets()));
        hosts.truncate(n);
        hosts
    }
}

/// One registry per address family.
#[derive(Debug, Default)]
pub struct HostRegistries {
    v4: HostRegistry,
    v6: HostRegistry,
}

impl HostRegistries {
    pub fn family(&self, family: AddressFamily) -> &HostRegistry {
        match family {
            AddressFamily::Ipv4 => &self.v4,
            AddressFamily::Ipv6 => &self.v6,
        }
    }

    fn family_mut(&mut self, family: AddressFamily) -> &mut HostRegistry {
        match family {
            AddressFamily::Ipv4 => &mut self.v4,
            AddressFamily::Ipv6 => &mut self.v6,
        }
    }

    #[cfg(test)]
    pub fn find(&self, addr: &IpAddr) -> Option<&HostEntry> {
        self.family(AddressFamily::of(addr)).find(addr)
    }

    pub fn get_or_create(&mut self, addr: IpAddr) -> Option<&mut HostEntry> {
        self.family_mut(AddressFamily::of(&addr)).get_or_create(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use crate::wire::{read_record, testing::*};
    use shared::protocol::HEADER_LEN;

    fn single_record(rtype: u16, name: &str, rdata: &[u8]) -> WireRecord {
        let bytes = PacketBuilder::response().answer(name, rtype, 120, rdata).build();
        read_record(&bytes, HEADER_LEN).unwrap().0
    }

    #[test]
    fn test_reverse_name_v4() {
        let name = reverse_name(&IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))).unwrap();
        assert_eq!(name.to_string(), "20.1.168.192.in-addr.arpa.");
    }

    #[test]
    fn test_reverse_name_v6() {
        let addr = IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0x1a2b));
        let name = reverse_name(&addr).unwrap().to_string();
        assert!(name.starts_with("B.2.A.1.0.0.0.0."));
        assert!(name.ends_with("0.8.E.F.ip6.arpa."));
        assert_eq!(name.split('.').filter(|l| !l.is_empty()).count(), 34);
    }

    #[test]
    fn test_get_or_create_is_keyed_by_address() {
        let mut registry = HostRegistry::default();
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        registry.get_or_create(a).unwrap().record_packet(PacketKind::Query);
        registry.get_or_create(a).unwrap().record_packet(PacketKind::Query);
        registry.get_or_create(b).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find(&a).unwrap().packets().get(PacketKind::Query), 2);
        assert!(registry.find(&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3))).is_none());
    }

    #[test]
    fn test_registry_grows_past_one_chunk() {
        let mut registry = HostRegistry::default();
        for i in 0..(HOST_CHUNK as u32 + 5) {
            let addr = IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + i));
            assert!(registry.get_or_create(addr).is_some());
        }
        assert_eq!(registry.len(), HOST_CHUNK + 5);
        let first = registry.iter().next().unwrap();
        assert_eq!(first.address(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)));
    }

    #[test]
    fn test_families_are_separate() {
        let mut registries = HostRegistries::default();
        registries.get_or_create(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        registries.get_or_create("fe80::1".parse().unwrap());
        registries.get_or_create("fe80::2".parse().unwrap());
        assert_eq!(registries.family(AddressFamily::Ipv4).len(), 1);
        assert_eq!(registries.family(AddressFamily::Ipv6).len(), 2);
    }

    #[test]
    fn test_hostname_from_matching_address_record_only() {
        let mut host = HostEntry::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));

        host.absorb(&single_record(TYPE_A, "other.local.", &[10, 0, 0, 8]));
        assert!(host.hostname().is_none());

        host.absorb(&single_record(TYPE_A, "nas.local.", &[10, 0, 0, 7]));
        assert_eq!(host.hostname().unwrap().to_string(), "nas.local.");

        // never replaced once known
        host.absorb(&single_record(TYPE_A, "renamed.local.", &[10, 0, 0, 7]));
        assert_eq!(host.hostname().unwrap().to_string(), "nas.local.");
    }

    #[test]
    fn test_hostname_from_reverse_pointer() {
        let mut host = HostEntry::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
        host.absorb(&single_record(TYPE_PTR, "7.0.0.10.in-addr.arpa.", &encode_name("printer.local.")));
        assert_eq!(host.hostname().unwrap().to_string(), "printer.local.");
    }

    #[test]
    fn test_hinfo_needs_known_hostname() {
        let mut host = HostEntry::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
        let hinfo = single_record(TYPE_HINFO, "nas.local.", &strings_rdata(&["ARM", "Linux"]));

        host.absorb(&hinfo);
        assert!(host.hardware().is_none());

        host.absorb(&single_record(TYPE_A, "nas.local.", &[10, 0, 0, 7]));
        host.absorb(&hinfo);
        assert_eq!(host.hardware(), Some("ARM"));
        assert_eq!(host.software(), Some("Linux"));
    }

    #[test]
    fn test_hinfo_with_empty_hardware_is_ignored() {
        let mut host = HostEntry::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
        host.absorb(&single_record(TYPE_A, "nas.local.", &[10, 0, 0, 7]));

        host.absorb(&single_record(TYPE_HINFO, "nas.local.", &strings_rdata(&["", "Linux"])));
        assert!(host.hardware().is_none());
        assert!(host.software().is_none());

        host.absorb(&single_record(TYPE_HINFO, "nas.local.", &strings_rdata(&["ARM", "Linux"])));
        assert_eq!(host.hardware(), Some("ARM"));
    }

    #[test]
    fn test_learning_hostname_restarts_query_budget() {
        let now = Instant::now();
        let mut host = HostEntry::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
        host.note_query_sent(now);
        host.note_query_sent(now);
        assert!(host.learn_hostname(Name::from_ascii("nas.local.").unwrap()));
        assert_eq!(host.query_attempts(), 0);
        assert!(!host.learn_hostname(Name::from_ascii("x.local.").unwrap()));
    }

    #[test]
    fn test_top_by_packets_is_stable() {
        let mut registry = HostRegistry::default();
        let addrs: Vec<IpAddr> = (1..=3).map(|i| IpAddr::V4(Ipv4Addr::new(10, 0, 0, i))).collect();
        for (addr, count) in addrs.iter().zip([2, 5, 2]) {
            let host = registry.get_or_create(*addr).unwrap();
            for _ in 0..count {
                host.record_packet(PacketKind::Response);
            }
        }
        let top: Vec<IpAddr> = registry.top_by_packets(3).iter().map(|h| h.address()).collect();
        assert_eq!(top, vec![addrs[1], addrs[0], addrs[2]]);
        assert_eq!(registry.top_by_packets(1).len(), 1);
    }
}
