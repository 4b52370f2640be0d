//! Doorbell mailbox between a host application processor ("AP") and an I/O coprocessor ("IOP").
//!
//! The mailbox exposes a small MMIO window:
//! - interrupt mask set/clear registers and one control register per direction,
//! - a 16-byte send frame and a 16-byte receive frame per direction, assembled from partial
//!   register writes and latched on reads of the first receive word.
//!
//! A coprocessor model attaches its own state as the `T` of [`Mailbox<T>`] so that protocol
//! state and queue state share one lock.

mod irq;
mod message;
pub mod regs;
mod state;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use iop_io_snapshot::io::state::{IoSnapshot, SnapshotResult};
use tracing::{debug, warn};

pub use irq::{InterruptLog, InterruptSink, IrqLine, NullInterruptSink};
pub use message::{MailboxMessage, FRAME_LEN};
pub use regs::{IntMask, Queue};
pub use state::MailboxState;

use regs::Reg;

#[derive(Debug, Clone)]
pub struct MailboxConfig {
    /// Name of the coprocessor this mailbox belongs to; used to tag log records.
    pub role: String,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            role: "IOP".to_string(),
        }
    }
}

/// State guarded by the mailbox lock.
#[derive(Debug)]
pub struct MailboxInner<T> {
    pub transport: MailboxState,
    pub device: T,
}

pub struct Mailbox<T = ()> {
    role: String,
    irq: Arc<dyn InterruptSink>,
    inner: Mutex<MailboxInner<T>>,
}

impl<T> Mailbox<T> {
    pub fn new(config: MailboxConfig, irq: Arc<dyn InterruptSink>, device: T) -> Self {
        Self {
            role: config.role,
            irq,
            inner: Mutex::new(MailboxInner {
                transport: MailboxState::new(),
                device,
            }),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    fn lock(&self) -> MutexGuard<'_, MailboxInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with the lock held, then delivers any interrupt edges it produced.
    pub fn with_locked<R>(&self, f: impl FnOnce(&mut MailboxInner<T>) -> R) -> R {
        let (ret, irqs) = {
            let mut guard = self.lock();
            let ret = f(&mut *guard);
            (ret, guard.transport.take_irq_changes())
        };
        for (line, level) in irqs {
            if level {
                self.irq.raise(line);
            } else {
                self.irq.lower(line);
            }
        }
        ret
    }

    /// Enqueues a frame for the coprocessor.
    pub fn send_iop(&self, msg: MailboxMessage) {
        debug!(role = %self.role, msg = msg.msg(), info = msg.info(), "AP sent");
        self.with_locked(|inner| inner.transport.push(Queue::Iop, msg));
    }

    /// Enqueues a frame for the host.
    pub fn send_ap(&self, msg: MailboxMessage) {
        debug!(role = %self.role, msg = msg.msg(), info = msg.info(), "IOP sent");
        self.with_locked(|inner| inner.transport.push(Queue::Ap, msg));
    }

    pub fn recv_iop(&self) -> Option<MailboxMessage> {
        self.with_locked(|inner| inner.transport.pop(Queue::Iop))
    }

    pub fn recv_ap(&self) -> Option<MailboxMessage> {
        self.with_locked(|inner| inner.transport.pop(Queue::Ap))
    }

    pub fn pending(&self, q: Queue) -> usize {
        self.lock().transport.len(q)
    }

    pub fn int_mask(&self) -> IntMask {
        self.lock().transport.int_mask()
    }

    pub fn mmio_read(&self, offset: u64, size: usize) -> u64 {
        let size = size.min(8);
        let reg = match Reg::decode(offset) {
            Some(reg) => reg,
            None => {
                warn!(role = %self.role, offset, size, "mailbox read from unknown register");
                return 0;
            }
        };

        let (value, popped) = self.with_locked(|inner| {
            let t = &mut inner.transport;
            match reg {
                Reg::IntMaskSet => (u64::from(t.int_mask().bits()), None),
                // Reads back the complement of the mask.
                Reg::IntMaskClr => (u64::from(!t.int_mask().bits()), None),
                Reg::Ctrl(q) => (u64::from(t.ctrl(q)), None),
                Reg::Recv(q, off) => {
                    let (value, popped) = t.read_recv(q, off, size);
                    (value, popped.map(|m| (q, m)))
                }
                Reg::Send(..) => (0, None),
            }
        });

        match (reg, popped) {
            (_, Some((q, msg))) => {
                let who = match q {
                    Queue::Iop => "IOP received",
                    Queue::Ap => "AP received",
                };
                debug!(role = %self.role, msg = msg.msg(), info = msg.info(), "{who}");
            }
            (Reg::Send(..), _) => {
                warn!(role = %self.role, offset, size, "mailbox read from send frame");
            }
            _ => {}
        }
        value
    }

    pub fn mmio_write(&self, offset: u64, size: usize, value: u64) {
        let size = size.min(8);
        let reg = match Reg::decode(offset) {
            Some(reg) => reg,
            None => {
                warn!(role = %self.role, offset, size, value, "mailbox write to unknown register");
                return;
            }
        };

        let completed = self.with_locked(|inner| {
            let t = &mut inner.transport;
            match reg {
                Reg::IntMaskSet => t.set_int_mask(value as u32),
                Reg::IntMaskClr => t.clear_int_mask(value as u32),
                Reg::Ctrl(q) => t.set_ctrl(q, value as u32),
                Reg::Send(q, off) => {
                    let bytes = value.to_le_bytes();
                    return t.write_send(q, off, &bytes[..size]).map(|m| (q, m));
                }
                Reg::Recv(..) => {}
            }
            None
        });

        match (reg, completed) {
            (_, Some((q, msg))) => {
                let who = match q {
                    Queue::Iop => "AP sent",
                    Queue::Ap => "IOP sent",
                };
                debug!(role = %self.role, msg = msg.msg(), info = msg.info(), "{who}");
            }
            (Reg::Recv(..), _) => {
                warn!(role = %self.role, offset, size, value, "mailbox write to receive frame");
            }
            _ => {}
        }
    }

    /// Drops every queued and staged frame and clears the interrupt mask.
    pub fn reset_transport(&self) {
        self.with_locked(|inner| inner.transport.reset());
    }

    pub fn save_transport(&self) -> Vec<u8> {
        self.lock().transport.save_state()
    }

    pub fn load_transport(&self, bytes: &[u8]) -> SnapshotResult<()> {
        self.with_locked(|inner| inner.transport.load_state(bytes))
    }
}

impl<T: Default> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new(
            MailboxConfig::default(),
            Arc::new(NullInterruptSink),
            T::default(),
        )
    }
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox").field("role", &self.role).finish_non_exhaustive()
    }
}
