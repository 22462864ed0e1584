use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr, SocketAddrV6};
use std::sync::Arc;
use anyhow::{Context, Result};
use tokio::io::unix::AsyncFd;
use shared::protocol::{MDNS_GROUP_V4, MDNS_GROUP_V6, MDNS_PORT};
use shared::types::{AddressFamily, Origin};
use crate::capture::Datagram;
use crate::monitor::resolve::{OutboundQuery, QueryTarget};
use crate::monitor::InboundPacket;
use crate::wire::build_query;

/// How many recent query ids are remembered for origin tagging.
const TRACKED_QUERY_IDS: usize = 64;

/// Remembers the ids of queries we sent so their replies can be recognized.
#[derive(Debug, Default)]
pub struct QueryTracker {
    recent: VecDeque<u16>,
}

impl QueryTracker {
    /// Pick a fresh non-zero id and remember it.
    pub fn issue(&mut self) -> u16 {
        let id = loop {
            let id = fastrand::u16(1..);
            if !self.recent.contains(&id) {
                break id;
            }
        };
        if self.recent.len() == TRACKED_QUERY_IDS {
            self.recent.pop_front();
        }
        self.recent.push_back(id);
        id
    }

    pub fn origin(&self, id: u16) -> Origin {
        if id != 0 && self.recent.contains(&id) {
            Origin::SelfGenerated
        } else {
            Origin::External
        }
    }
}

/// Sockets for one address family.
pub struct Endpoint {
    pub multicast: Arc<AsyncFd<std::net::UdpSocket>>,
    pub unicast: Arc<AsyncFd<std::net::UdpSocket>>,
}

/// Where a query goes and whether it leaves from the mDNS port.
fn destination(query: &OutboundQuery, default_interface: Option<u32>) -> (SocketAddr, bool) {
    let scope = query.interface.or(default_interface).unwrap_or(0);
    match query.target {
        QueryTarget::Host(IpAddr::V6(ip)) => (SocketAddr::V6(SocketAddrV6::new(ip, MDNS_PORT, 0, scope)), false),
        QueryTarget::Host(ip) => (SocketAddr::new(ip, MDNS_PORT), false),
        QueryTarget::Group(AddressFamily::Ipv4) => (SocketAddr::new(IpAddr::V4(MDNS_GROUP_V4), MDNS_PORT), true),
        QueryTarget::Group(AddressFamily::Ipv6) => {
            (SocketAddr::V6(SocketAddrV6::new(MDNS_GROUP_V6, MDNS_PORT, 0, scope)), true)
        }
    }
}

/// Outbound side of the monitor, plus origin tagging for inbound packets.
pub struct Transport {
    v4: Option<Endpoint>,
    v6: Option<Endpoint>,
    interface: Option<u32>,
    tracker: QueryTracker,
}

impl Transport {
    pub fn new(interface: Option<u32>) -> Self {
        Self {
            v4: None,
            v6: None,
            interface,
            tracker: QueryTracker::default(),
        }
    }

    pub fn with_endpoint(mut self, family: AddressFamily, endpoint: Endpoint) -> Self {
        match family {
            AddressFamily::Ipv4 => self.v4 = Some(endpoint),
            AddressFamily::Ipv6 => self.v6 = Some(endpoint),
        }
        self
    }

    /// Attach an origin to a received datagram.
    pub fn tag(&self, datagram: Datagram) -> InboundPacket {
        let origin = match datagram.bytes.get(..2) {
            Some(id) => self.tracker.origin(u16::from_be_bytes([id[0], id[1]])),
            None => Origin::External,
        };
        InboundPacket {
            bytes: datagram.bytes,
            source: datagram.source,
            destination: datagram.destination,
            interface: datagram.interface,
            origin,
            received_at: datagram.received_at,
            timestamp: datagram.timestamp,
        }
    }

    /// Send one follow-up query. Fire and forget: no reply is awaited.
    pub fn send(&mut self, query: &OutboundQuery) -> Result<()> {
        let (to, from_mdns_port) = destination(query, self.interface);
        let family = AddressFamily::of(&to.ip());
        let endpoint = match family {
            AddressFamily::Ipv4 => self.v4.as_ref(),
            AddressFamily::Ipv6 => self.v6.as_ref(),
        }
        .with_context(|| format!("No {} socket to send from", family.label()))?;

        let id = self.tracker.issue();
        let bytes = build_query(id, &query.name, query.rtype)?;
        let socket = if from_mdns_port { &endpoint.multicast } else { &endpoint.unicast };
        socket
            .get_ref()
            .send_to(&bytes, to)
            .with_context(|| format!("Failed to send {} query to {}", query.rtype, to))?;

        tracing::debug!("Sent {} {} query (id {}) to {}", query.name, query.rtype, id, to);
        Ok(())
    }
}
