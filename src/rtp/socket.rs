//! Extended UDP socket
//!
//! A UDP socket that also recovers the *destination* address of every
//! received packet. RTP sessions are keyed by destination, so a single
//! socket bound to a port must be able to tell which multicast group a
//! packet was sent to. On Unix this comes from the IP_PKTINFO /
//! IP_RECVDSTADDR control message; elsewhere the destination is unknown
//! and classification falls back to the source only.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::unix::AsyncFd;
use tracing::debug;

use crate::error::{NodeError, NodeResult};

/// One received datagram with both endpoints.
#[derive(Debug, Clone, Copy)]
pub struct RecvInfo {
    pub len: usize,
    pub src: SocketAddr,
    /// Destination address recovered from the control message, if the
    /// platform delivers it.
    pub dst: Option<IpAddr>,
}

/// A non-blocking UDP socket with destination recovery.
pub struct UdpExtSocket {
    io: AsyncFd<std::net::UdpSocket>,
    port: u16,
}

impl UdpExtSocket {
    /// Binds to `0.0.0.0:port` with address reuse and destination
    /// recovery enabled.
    pub fn bind(port: u16) -> NodeResult<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        #[cfg(unix)]
        socket.set_reuse_port(true)?;

        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        socket
            .bind(&addr.into())
            .map_err(|e| NodeError::Config(format!("cannot bind UDP port {port}: {e}")))?;
        socket.set_nonblocking(true)?;

        let socket: std::net::UdpSocket = socket.into();
        enable_pktinfo(&socket)?;

        Ok(Self {
            io: AsyncFd::new(socket)?,
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn join_multicast_v4(&self, group: Ipv4Addr, interface: Ipv4Addr) -> io::Result<()> {
        debug!("joining multicast group {group} on {interface}");
        self.io.get_ref().join_multicast_v4(&group, &interface)
    }

    pub fn leave_multicast_v4(&self, group: Ipv4Addr, interface: Ipv4Addr) -> io::Result<()> {
        debug!("leaving multicast group {group} on {interface}");
        self.io.get_ref().leave_multicast_v4(&group, &interface)
    }

    /// Receives one datagram together with its endpoints.
    pub async fn recv_ext(&self, buf: &mut [u8]) -> io::Result<RecvInfo> {
        loop {
            let mut guard = self.io.readable().await?;
            match guard.try_io(|inner| recv_with_dst(inner.get_ref(), buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<usize> {
        loop {
            let mut guard = self.io.writable().await?;
            match guard.try_io(|inner| inner.get_ref().send_to(data, target)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

#[cfg(unix)]
fn enable_pktinfo(socket: &std::net::UdpSocket) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let enable: libc::c_int = 1;
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let (level, option) = (libc::IPPROTO_IP, libc::IP_PKTINFO);
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let (level, option) = (libc::IPPROTO_IP, libc::IP_RECVDSTADDR);

    let result = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            option,
            &enable as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn enable_pktinfo(_socket: &std::net::UdpSocket) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn recv_with_dst(socket: &std::net::UdpSocket, buf: &mut [u8]) -> io::Result<RecvInfo> {
    use std::os::unix::io::AsRawFd;

    let mut src_storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    let mut control = [0u8; 64];

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_name = &mut src_storage as *mut _ as *mut libc::c_void;
    msg.msg_namelen = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = control.len() as _;

    let len = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, 0) };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }

    let src = parse_sockaddr(&src_storage)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad source address"))?;

    let mut dst = None;
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            #[cfg(any(target_os = "linux", target_os = "android"))]
            if (*cmsg).cmsg_level == libc::IPPROTO_IP && (*cmsg).cmsg_type == libc::IP_PKTINFO {
                let info = &*(libc::CMSG_DATA(cmsg) as *const libc::in_pktinfo);
                dst = Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(
                    info.ipi_addr.s_addr,
                ))));
            }
            #[cfg(not(any(target_os = "linux", target_os = "android")))]
            if (*cmsg).cmsg_level == libc::IPPROTO_IP && (*cmsg).cmsg_type == libc::IP_RECVDSTADDR
            {
                let addr = &*(libc::CMSG_DATA(cmsg) as *const libc::in_addr);
                dst = Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(addr.s_addr))));
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok(RecvInfo {
        len: len as usize,
        src,
        dst,
    })
}

#[cfg(unix)]
fn parse_sockaddr(storage: &libc::sockaddr_storage) -> Option<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            Some(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr))),
                u16::from_be(addr.sin_port),
            ))
        }
        libc::AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            Some(SocketAddr::new(
                IpAddr::V6(addr.sin6_addr.s6_addr.into()),
                u16::from_be(addr.sin6_port),
            ))
        }
        _ => None,
    }
}

#[cfg(not(unix))]
fn recv_with_dst(socket: &std::net::UdpSocket, buf: &mut [u8]) -> io::Result<RecvInfo> {
    let (len, src) = socket.recv_from(buf)?;
    Ok(RecvInfo {
        len,
        src,
        dst: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_receive_with_dst() {
        let receiver = UdpExtSocket::bind(0).unwrap();
        let local_port = receiver.io.get_ref().local_addr().unwrap().port();

        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(b"hello", ("127.0.0.1", local_port))
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let info = receiver.recv_ext(&mut buf).await.unwrap();
        assert_eq!(info.len, 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(info.src.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));

        #[cfg(any(target_os = "linux", target_os = "android"))]
        assert_eq!(info.dst, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }
}
