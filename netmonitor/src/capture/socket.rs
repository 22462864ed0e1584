use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use anyhow::{Context, Result};
use socket2::{Domain, InterfaceIndexOrAddress, Protocol, Socket, Type};
use tokio::io::unix::AsyncFd;
use shared::protocol::{MDNS_GROUP_V4, MDNS_GROUP_V6, MDNS_PORT};
use shared::types::AddressFamily;
use crate::capture::pktinfo;

const RECV_BUFFER_SIZE: usize = 512 * 1024;

fn new_socket(family: AddressFamily) -> Result<Socket> {
    let domain = match family {
        AddressFamily::Ipv4 => Domain::IPV4,
        AddressFamily::Ipv6 => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .context("Failed to create UDP socket")?;
    if family == AddressFamily::Ipv6 {
        socket.set_only_v6(true)?;
    }
    pktinfo::enable_pktinfo(&socket, family == AddressFamily::Ipv6)
        .context("Failed to enable packet info")?;
    Ok(socket)
}

fn finish(socket: Socket) -> Result<AsyncFd<std::net::UdpSocket>> {
    socket.set_nonblocking(true)?;
    let std_socket: std::net::UdpSocket = socket.into();
    AsyncFd::new(std_socket).context("Failed to register socket with the runtime")
}

fn unspecified(family: AddressFamily) -> IpAddr {
    match family {
        AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Shared listener on the mDNS port, joined to the group on `interface` (or
/// the system default). Also used to send queries to the group.
pub fn bind_multicast(family: AddressFamily, interface: Option<u32>) -> Result<AsyncFd<std::net::UdpSocket>> {
    let socket = new_socket(family)?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_recv_buffer_size(RECV_BUFFER_SIZE)?;

    let bind_addr = SocketAddr::new(unspecified(family), MDNS_PORT);
    socket
        .bind(&bind_addr.into())
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    match family {
        AddressFamily::Ipv4 => {
            let iface = match interface {
                Some(index) => InterfaceIndexOrAddress::Index(index),
                None => InterfaceIndexOrAddress::Address(Ipv4Addr::UNSPECIFIED),
            };
            socket
                .join_multicast_v4_n(&MDNS_GROUP_V4, &iface)
                .with_context(|| format!("Failed to join {}", MDNS_GROUP_V4))?;
            if let Some(index) = interface {
                pktinfo::set_multicast_if_index_v4(&socket, index)
                    .context("Failed to select multicast interface")?;
            }
            socket.set_multicast_loop_v4(true)?;
        }
        AddressFamily::Ipv6 => {
            socket
                .join_multicast_v6(&MDNS_GROUP_V6, interface.unwrap_or(0))
                .with_context(|| format!("Failed to join {}", MDNS_GROUP_V6))?;
            if let Some(index) = interface {
                socket.set_multicast_if_v6(index)?;
            }
            socket.set_multicast_loop_v6(true)?;
        }
    }

    tracing::info!("Listening for {} mDNS traffic on {}", family.label(), bind_addr);
    finish(socket)
}

/// Ephemeral-port socket for direct queries; hosts reply to it by unicast.
pub fn bind_unicast(family: AddressFamily) -> Result<AsyncFd<std::net::UdpSocket>> {
    let socket = new_socket(family)?;
    let bind_addr = SocketAddr::new(unspecified(family), 0);
    socket
        .bind(&bind_addr.into())
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    finish(socket)
}
