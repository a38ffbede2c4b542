//! Raw socket syscall helpers shared by sessions and the acceptor.
//!
//! IPv4 only, matching the address family the rest of the crate serves.

use libc::{
    AF_INET, F_GETFL, F_SETFL, IPPROTO_TCP, O_NONBLOCK, SO_ERROR, SO_REUSEADDR, SOCK_CLOEXEC,
    SOCK_DGRAM, SOCK_NONBLOCK, SOCK_STREAM, SOL_SOCKET, bind, c_void, connect, fcntl, getpeername,
    getsockname, getsockopt, in_addr, listen, setsockopt, sockaddr, sockaddr_in, socket, socklen_t,
};
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

pub(crate) const LISTEN_BACKLOG: i32 = 128;

pub(crate) fn errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Parses "ip:port" into a `sockaddr_in`.
pub(crate) fn parse_sockaddr(address: &str) -> io::Result<sockaddr_in> {
    let (ip_string, port_string) = address
        .rsplit_once(':')
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;

    let port: u16 = port_string
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid port"))?;

    let mut octets = [0u8; 4];
    let parts: Vec<&str> = ip_string.split('.').collect();
    if parts.len() != 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid IPv4 address",
        ));
    }
    for (index, part) in parts.iter().enumerate() {
        octets[index] = part
            .parse::<u8>()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid IPv4 octet"))?;
    }

    let ip_u32 = u32::from_be_bytes(octets);
    Ok(sockaddr_in {
        sin_family: AF_INET as u16,
        sin_port: port.to_be(),
        sin_addr: in_addr {
            s_addr: ip_u32.to_be(),
        },
        sin_zero: [0; 8],
    })
}

pub(crate) fn sockaddr_to_socketaddr(address: &sockaddr_in) -> SocketAddr {
    let octets = u32::from_be(address.sin_addr.s_addr).to_be_bytes();
    SocketAddr::from((octets, u16::from_be(address.sin_port)))
}

pub(crate) fn socketaddr_to_sockaddr(address: SocketAddr) -> io::Result<sockaddr_in> {
    match address {
        SocketAddr::V4(v4) => Ok(sockaddr_in {
            sin_family: AF_INET as u16,
            sin_port: v4.port().to_be(),
            sin_addr: in_addr {
                s_addr: u32::from_be_bytes(v4.ip().octets()).to_be(),
            },
            sin_zero: [0; 8],
        }),
        SocketAddr::V6(_) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "IPv6 not supported",
        )),
    }
}

/// Creates a non-blocking, close-on-exec TCP socket.
pub(crate) fn new_stream_socket() -> io::Result<RawFd> {
    let fd = unsafe { socket(AF_INET, SOCK_STREAM | SOCK_NONBLOCK | SOCK_CLOEXEC, IPPROTO_TCP) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Creates a non-blocking, close-on-exec UDP socket.
pub(crate) fn new_datagram_socket() -> io::Result<RawFd> {
    let fd = unsafe { socket(AF_INET, SOCK_DGRAM | SOCK_NONBLOCK | SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Binds `fd` and, for stream sockets, starts listening.
pub(crate) fn bind_socket(fd: RawFd, address: &sockaddr_in) -> io::Result<()> {
    let reuse: i32 = 1;
    unsafe {
        setsockopt(
            fd,
            SOL_SOCKET,
            SO_REUSEADDR,
            &reuse as *const i32 as *const c_void,
            mem::size_of::<i32>() as socklen_t,
        );
    }

    let ret = unsafe {
        bind(
            fd,
            address as *const sockaddr_in as *const sockaddr,
            mem::size_of::<sockaddr_in>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn listen_socket(fd: RawFd) -> io::Result<()> {
    if unsafe { listen(fd, LISTEN_BACKLOG) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Starts a non-blocking connect; EINPROGRESS is success here, completion
/// is observed through write readiness plus [`socket_error`].
pub(crate) fn connect_socket(fd: RawFd, address: &sockaddr_in) -> io::Result<()> {
    let ret = unsafe {
        connect(
            fd,
            address as *const sockaddr_in as *const sockaddr,
            mem::size_of::<sockaddr_in>() as socklen_t,
        )
    };
    if ret < 0 && errno() != libc::EINPROGRESS {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Reads and clears the pending SO_ERROR on a socket.
pub(crate) fn socket_error(fd: RawFd) -> i32 {
    let mut error: i32 = 0;
    let mut len = mem::size_of::<i32>() as socklen_t;
    let ret = unsafe {
        getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut error as *mut i32 as *mut c_void,
            &mut len,
        )
    };
    if ret < 0 { errno() } else { error }
}

pub(crate) fn local_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let mut addr: sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_in>() as socklen_t;
    let ret = unsafe { getsockname(fd, &mut addr as *mut _ as *mut sockaddr, &mut len) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sockaddr_to_socketaddr(&addr))
}

pub(crate) fn peer_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let mut addr: sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_in>() as socklen_t;
    let ret = unsafe { getpeername(fd, &mut addr as *mut _ as *mut sockaddr, &mut len) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sockaddr_to_socketaddr(&addr))
}

pub(crate) fn set_nonblocking(fd: RawFd) {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    unsafe {
        fcntl(fd, F_SETFL, flags | O_NONBLOCK);
    }
}
