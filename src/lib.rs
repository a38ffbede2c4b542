//! Event-driven network core for TCP/UDP media-streaming servers.
//!
//! One [`Cycle`] is a single-threaded dispatch loop over OS readiness
//! notification (epoll preferred, poll fallback) with an integrated timer
//! schedule and a cross-thread task queue. Sessions and acceptors are
//! Events registered with a Cycle; multi-core scaling is N independent
//! Cycles, one per thread, never shared loop state.
//!
//! # Architecture
//!
//! - **Buffer**: growable byte container with prependable/readable/writable
//!   regions, tuned for scatter reads from non-blocking sockets
//! - **Poller**: epoll/poll backends translated to portable readiness flags
//! - **Event**: one descriptor's interest set and callbacks within a Cycle
//! - **Timer**: one-shot or persistent callbacks bounded into the loop wait
//! - **Cycle**: the reactor; readiness, timers and queued tasks in order
//! - **TcpSession / UdpSession / Acceptor**: socket I/O with a forward-only
//!   connection state machine and a session factory on accept
//! - **CycleThread**: a dedicated thread owning exactly one Cycle, with
//!   synchronized startup publication
//! - **Console**: textual control commands marshalled onto the loop thread
//! - **Protocol**: the parse contract an embedding server plugs in
//!
//! Cross-thread interaction goes exclusively through [`CycleHandle`]; every
//! other surface is confined to the loop's own thread. Timer and task
//! callbacks run inline on that thread, so a long-running callback stalls
//! the whole Cycle. Cooperative scheduling is the contract, not a bug.

pub mod buffer;
pub mod console;
pub mod cycle;
pub mod cycle_thread;
pub mod error;
pub mod event;
pub mod net;
pub(crate) mod poller;
pub mod protocol;
pub mod timer;

pub use buffer::Buffer;
pub use console::Console;
pub use cycle::{Cycle, CycleHandle};
pub use cycle_thread::CycleThread;
pub use error::{Error, Result};
pub use event::Event;
pub use net::acceptor::{Acceptor, SessionFactory};
pub use net::tcp::{SessionState, TcpSession};
pub use net::udp::UdpSession;
pub use protocol::{Protocol, ProtocolKind};
pub use timer::TimerId;
