//! Register window layout.

use bitflags::bitflags;

pub const REG_INT_MASK_SET: u64 = 0x000;
pub const REG_INT_MASK_CLR: u64 = 0x004;
pub const REG_IOP_CTRL: u64 = 0x008;
pub const REG_AP_CTRL: u64 = 0x00C;

pub const REG_IOP_SEND0: u64 = 0x700;
pub const REG_IOP_RECV0: u64 = 0x710;
pub const REG_AP_SEND0: u64 = 0x720;
pub const REG_AP_RECV0: u64 = 0x730;

/// Size of the MMIO window (one past `AP_RECV3`).
pub const MMIO_WINDOW_SIZE: u64 = 0x740;

/// Queue-empty status bit merged into control register reads.
pub const CTRL_EMPTY: u32 = 1 << 17;
pub const CTRL_COUNT_SHIFT: u32 = 20;
pub const CTRL_COUNT_MASK: u32 = 0xF << CTRL_COUNT_SHIFT;

bitflags! {
    /// Interrupt enable mask (`INT_MASK_SET` / `INT_MASK_CLR`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IntMask: u32 {
        const IOP_NONEMPTY = 1 << 0;
        const AP_NONEMPTY = 1 << 1;
        // Guests may set bits we don't model; keep them readable.
        const _ = !0;
    }
}

/// One of the two directional frame groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    /// Coprocessor-bound.
    Iop,
    /// Host-bound.
    Ap,
}

/// Decoded register offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reg {
    IntMaskSet,
    IntMaskClr,
    Ctrl(Queue),
    /// Send frame for a queue plus the byte offset inside the frame.
    Send(Queue, usize),
    /// Receive frame for a queue plus the byte offset inside the frame.
    Recv(Queue, usize),
}

impl Reg {
    pub(crate) fn decode(offset: u64) -> Option<Self> {
        let frame = |base: u64| (base..base + 16).contains(&offset).then(|| (offset - base) as usize);

        match offset {
            REG_INT_MASK_SET => Some(Reg::IntMaskSet),
            REG_INT_MASK_CLR => Some(Reg::IntMaskClr),
            REG_IOP_CTRL => Some(Reg::Ctrl(Queue::Iop)),
            REG_AP_CTRL => Some(Reg::Ctrl(Queue::Ap)),
            _ => {
                if let Some(off) = frame(REG_IOP_SEND0) {
                    Some(Reg::Send(Queue::Iop, off))
                } else if let Some(off) = frame(REG_IOP_RECV0) {
                    Some(Reg::Recv(Queue::Iop, off))
                } else if let Some(off) = frame(REG_AP_SEND0) {
                    Some(Reg::Send(Queue::Ap, off))
                } else {
                    frame(REG_AP_RECV0).map(|off| Reg::Recv(Queue::Ap, off))
                }
            }
        }
    }
}

/// Live status bits for a control register read.
pub fn ctrl_status(depth: usize) -> u32 {
    let mut status = (depth.min(15) as u32) << CTRL_COUNT_SHIFT;
    if depth == 0 {
        status |= CTRL_EMPTY;
    }
    status
}
