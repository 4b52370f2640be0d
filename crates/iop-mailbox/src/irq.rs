use std::sync::{Mutex, PoisonError};

use crate::regs::Queue;

/// Interrupt line driven by a non-empty queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqLine {
    Iop,
    Ap,
}

impl From<Queue> for IrqLine {
    fn from(q: Queue) -> Self {
        match q {
            Queue::Iop => IrqLine::Iop,
            Queue::Ap => IrqLine::Ap,
        }
    }
}

/// A sink for interrupt level changes produced by the mailbox.
///
/// Calls are made after the mailbox lock has been released, so implementations may call back
/// into the mailbox.
pub trait InterruptSink: Send + Sync {
    fn raise(&self, line: IrqLine);
    fn lower(&self, line: IrqLine);
}

/// Sink that drops every change.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullInterruptSink;

impl InterruptSink for NullInterruptSink {
    fn raise(&self, _line: IrqLine) {}
    fn lower(&self, _line: IrqLine) {}
}

/// Records every change; useful for tests and tracing harnesses.
#[derive(Debug, Default)]
pub struct InterruptLog {
    events: Mutex<Vec<(IrqLine, bool)>>,
}

impl InterruptLog {
    pub fn events(&self) -> Vec<(IrqLine, bool)> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take(&self) -> Vec<(IrqLine, bool)> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Current level of `line` as implied by the recorded edges.
    pub fn level(&self, line: IrqLine) -> bool {
        self.events()
            .iter()
            .rev()
            .find(|(l, _)| *l == line)
            .is_some_and(|(_, level)| *level)
    }

    fn push(&self, line: IrqLine, level: bool) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((line, level));
    }
}

impl InterruptSink for InterruptLog {
    fn raise(&self, line: IrqLine) {
        self.push(line, true);
    }

    fn lower(&self, line: IrqLine) {
        self.push(line, false);
    }
}
