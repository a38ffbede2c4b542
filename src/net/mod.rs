//! Socket sessions built on the reactor.
//!
//! - [`tcp`]: [`TcpSession`] stream sessions with buffered output and a
//!   forward-only connection state machine
//! - [`udp`]: [`UdpSession`] datagram sessions with message boundaries
//! - [`acceptor`]: [`Acceptor`] listening sockets that manufacture sessions
//! - [`socket`]: raw syscall helpers shared by the above
//!
//! [`TcpSession`]: tcp::TcpSession
//! [`UdpSession`]: udp::UdpSession
//! [`Acceptor`]: acceptor::Acceptor

pub mod acceptor;
pub(crate) mod socket;
pub mod tcp;
pub mod udp;
