//! Pluggable wire-protocol contract.
//!
//! The core never decodes an application protocol itself; a session owner
//! (say an RTMP ingest server) installs a [`Protocol`] behind its message
//! callback. The parser consumes as many complete frames as the readable
//! region holds, leaves a partial trailing frame untouched for the next
//! invocation, and reports an [`Error`] value the owner uses to tear the
//! session down.

use crate::buffer::Buffer;
use crate::error::Result;
use crate::net::tcp::TcpSession;

/// Type tag distinguishing protocol variants at session construction time.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolKind {
    /// RTMP ingest (handshake + chunk stream), decoded outside the core.
    Rtmp,
    /// Anything else layered by an embedding server.
    Other,
}

/// A protocol parser chosen per-session at construction time.
pub trait Protocol {
    fn kind(&self) -> ProtocolKind;

    /// Consumes every complete frame in `input`'s readable region.
    ///
    /// Must leave a trailing partial frame in the buffer untouched; the
    /// session delivers the grown region again once more bytes arrive.
    /// A returned error means the stream is unrecoverable and the caller
    /// should close `session`.
    fn parse(&mut self, input: &mut Buffer, session: &TcpSession) -> Result<()>;
}
