//! Minimal command console attached to a Cycle.
//!
//! Textual commands are read line-by-line from a control descriptor
//! (typically stdin or one end of a pipe). Each recognised command is
//! routed through `queue_in_cycle`, so handlers run on the loop's own
//! thread no matter which thread fed the control stream.

use crate::buffer::Buffer;
use crate::cycle::{Cycle, CycleHandle};
use crate::event::Event;
use crate::net::socket;

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

type CommandHandler = Arc<dyn Fn() + Send + Sync>;

/// Registry mapping command names to zero-argument handlers.
#[derive(Default)]
pub struct Console {
    commands: HashMap<String, CommandHandler>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for the exact command `name`.
    pub fn register(&mut self, name: &str, handler: impl Fn() + Send + Sync + 'static) {
        self.commands.insert(name.to_string(), Arc::new(handler));
    }

    /// Binds the conventional `quit` command to loop exit.
    pub fn register_quit(&mut self, handle: CycleHandle) {
        self.register("quit", move || handle.exit());
    }

    /// Registers read interest on `fd` and starts dispatching complete
    /// lines. The descriptor is borrowed, not owned: it is never closed
    /// here.
    pub fn attach(self, cycle: &Rc<Cycle>, fd: RawFd) -> AttachedConsole {
        cycle.assert_in_cycle_thread();
        socket::set_nonblocking(fd);

        let commands = self.commands;
        let pending = RefCell::new(Buffer::new());
        let cycle_ref = Rc::downgrade(cycle);

        let event = Event::new(cycle, fd);
        let event_ref = Rc::downgrade(&event);
        event.set_read_handler(move || {
            let eof = loop {
                match pending.borrow_mut().read_from_descriptor(fd) {
                    Ok(0) => break true,
                    Ok(_) => break false,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) if detaches(err.kind()) => {
                        warn!(error = %err, "console read failed");
                        break true;
                    }
                    Err(_) => break false,
                }
            };

            let cycle = match cycle_ref.upgrade() {
                Some(cycle) => cycle,
                None => return,
            };

            loop {
                let line = {
                    let mut buffer = pending.borrow_mut();
                    match buffer.peek().iter().position(|&b| b == b'\n') {
                        Some(end) => {
                            let line = buffer.take(end + 1);
                            String::from_utf8_lossy(&line).trim().to_string()
                        }
                        None => break,
                    }
                };
                if line.is_empty() {
                    continue;
                }
                match commands.get(&line) {
                    Some(handler) => {
                        debug!(command = %line, "console command");
                        let handler = handler.clone();
                        cycle.queue_in_cycle(move |_| handler());
                    }
                    None => warn!(command = %line, "unknown console command"),
                }
            }

            if eof
                && let Some(event) = event_ref.upgrade()
            {
                event.disable_all();
                event.remove();
            }
        });
        event.enable_reading();

        AttachedConsole { event }
    }
}

/// Transient read conditions leave the console attached and re-armed;
/// everything else is treated like end of stream.
fn detaches(kind: io::ErrorKind) -> bool {
    !matches!(
        kind,
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// A console wired into a Cycle; keeps the control-stream Event reachable.
pub struct AttachedConsole {
    event: Rc<Event>,
}

impl AttachedConsole {
    /// Stops dispatching and removes the control Event from its Cycle.
    pub fn detach(&self) {
        self.event.disable_all();
        self.event.remove();
    }
}
