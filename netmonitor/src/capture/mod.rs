pub mod interface;
pub mod listener;
pub mod pktinfo;
pub mod socket;
pub mod transport;

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;
use chrono::{DateTime, Local};

/// A raw datagram as received, before origin tagging.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub bytes: Vec<u8>,
    pub source: SocketAddr,
    pub destination: IpAddr,
    pub interface: Option<u32>,
    pub received_at: Instant,
    pub timestamp: DateTime<Local>,
}
