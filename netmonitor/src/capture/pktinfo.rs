//! `recvmsg` with packet-info control messages, so each datagram carries the
//! address it was sent to and the interface it arrived on.

use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::AsRawFd;
use socket2::Socket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub len: usize,
    pub source: SocketAddr,
    pub destination: Option<IpAddr>,
    pub interface: Option<u32>,
}

const CONTROL_LEN: usize = 128;

/// Control-message space, aligned for `cmsghdr` access.
#[repr(C, align(8))]
struct ControlBuf([u8; CONTROL_LEN]);

fn set_flag(socket: &Socket, level: libc::c_int, name: libc::c_int) -> io::Result<()> {
    let val: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            &val as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub fn enable_pktinfo(socket: &Socket, ipv6: bool) -> io::Result<()> {
    if ipv6 {
        set_flag(socket, libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO)
    } else {
        set_flag(socket, libc::IPPROTO_IP, libc::IP_PKTINFO)
    }
}

/// Pin outgoing IPv4 multicast to one interface index.
pub fn set_multicast_if_index_v4(socket: &Socket, index: u32) -> io::Result<()> {
    let mreqn = libc::ip_mreqn {
        imr_multiaddr: libc::in_addr { s_addr: 0 },
        imr_address: libc::in_addr { s_addr: 0 },
        imr_ifindex: index as libc::c_int,
    };
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_MULTICAST_IF,
            &mreqn as *const libc::ip_mreqn as *const libc::c_void,
            mem::size_of::<libc::ip_mreqn>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn socket_addr_from_storage(storage: &libc::sockaddr_storage) -> Option<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const libc::sockaddr_storage as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const libc::sockaddr_storage as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

/// Non-blocking receive; `WouldBlock` when the socket is drained.
pub fn try_recv(socket: &std::net::UdpSocket, buf: &mut [u8]) -> io::Result<Received> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut cmsg_buf = ControlBuf([0u8; CONTROL_LEN]);
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = &mut storage as *mut libc::sockaddr_storage as *mut libc::c_void;
    msg.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.0.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = CONTROL_LEN as _;

    let n = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, libc::MSG_DONTWAIT) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let source = socket_addr_from_storage(&storage)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unsupported source address family"))?;

    let mut received = Received {
        len: n as usize,
        source,
        destination: None,
        interface: None,
    };

    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            let hdr = &*cmsg;
            if hdr.cmsg_level == libc::IPPROTO_IP && hdr.cmsg_type == libc::IP_PKTINFO {
                let info = (libc::CMSG_DATA(cmsg) as *const libc::in_pktinfo).read_unaligned();
                received.destination = Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(info.ipi_addr.s_addr))));
                received.interface = Some(info.ipi_ifindex as u32);
            } else if hdr.cmsg_level == libc::IPPROTO_IPV6 && hdr.cmsg_type == libc::IPV6_PKTINFO {
                let info = (libc::CMSG_DATA(cmsg) as *const libc::in6_pktinfo).read_unaligned();
                received.destination = Some(IpAddr::V6(Ipv6Addr::from(info.ipi6_addr.s6_addr)));
                received.interface = Some(info.ipi6_ifindex as u32);
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use socket2::{Domain, Protocol, Type};

    #[test]
    fn test_control_buffer_fits_cmsghdr() {
        assert!(mem::align_of::<ControlBuf>() >= mem::align_of::<libc::cmsghdr>());
        let needed = unsafe { libc::CMSG_SPACE(mem::size_of::<libc::in6_pktinfo>() as u32) } as usize;
        assert!(CONTROL_LEN >= needed);
    }

    #[test]
    fn test_loopback_destination_and_interface() {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        socket.bind(&SocketAddr::from((Ipv4Addr::LOCALHOST, 0)).into()).unwrap();
        enable_pktinfo(&socket, false).unwrap();
        let receiver: std::net::UdpSocket = socket.into();
        let local = receiver.local_addr().unwrap();

        let sender = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        sender.send_to(b"hello", local).unwrap();

        let mut buf = [0u8; 64];
        // non-blocking receive, so poll briefly
        let received = (0..200)
            .find_map(|_| match try_recv(&receiver, &mut buf) {
                Ok(r) => Some(r),
                Err(_) => {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    None
                }
            })
            .unwrap();

        assert_eq!(&buf[..received.len], b"hello");
        assert_eq!(received.source, sender.local_addr().unwrap());
        assert_eq!(received.destination, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(received.interface.is_some());
    }
}
