use std::net::{Ipv4Addr, Ipv6Addr};

/// mDNS UDP port
pub const MDNS_PORT: u16 = 5353;

/// mDNS link-local multicast groups
pub const MDNS_GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

/// Fixed DNS message header size
pub const HEADER_LEN: usize = 12;

/// Largest payload that fits an Ethernet frame once IP and UDP headers are added
pub const NORMAL_MAX_MESSAGE_DATA: usize = 1440;

/// IPv6 + UDP header bytes on top of the DNS message
pub const IP_UDP_OVERHEAD: usize = 40 + 8;

/// Top bit of a question's class requests a unicast reply
pub const QCLASS_UNICAST_RESPONSE: u16 = 0x8000;

/// Top bit of a record's class marks a unique (cache-flush) RRSet
pub const RRCLASS_CACHE_FLUSH: u16 = 0x8000;

pub const CLASS_IN: u16 = 1;
pub const CLASS_ANY: u16 = 255;

/// Reverse-lookup zone suffixes
pub const REVERSE_ZONE_V4: &str = "in-addr.arpa.";
pub const REVERSE_ZONE_V6: &str = "ip6.arpa.";

/// Default number of rows in each summary table
pub const REPORT_TOP_SERVICES: usize = 15;
pub const REPORT_TOP_HOSTS: usize = 15;
