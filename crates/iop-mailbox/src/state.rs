use std::collections::VecDeque;

use iop_io_snapshot::io::state::codec::{Decoder, Encoder};
use iop_io_snapshot::io::state::{
    IoSnapshot, SnapshotError, SnapshotReader, SnapshotResult, SnapshotVersion, SnapshotWriter,
};

use crate::irq::IrqLine;
use crate::message::{MailboxMessage, FRAME_LEN};
use crate::regs::{ctrl_status, IntMask, Queue, CTRL_COUNT_MASK, CTRL_EMPTY};

/// Per-direction registers: frame staging, FIFO and control word.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Channel {
    queue: VecDeque<MailboxMessage>,
    /// Partially written send frame.
    send: [u8; FRAME_LEN],
    /// Last frame latched by a `RECV0` read.
    recv: [u8; FRAME_LEN],
    ctrl: u32,
    /// Interrupt level last reported to the sink.
    line: bool,
}

impl Channel {
    fn reset(&mut self) {
        let line = self.line;
        *self = Self::default();
        self.line = line;
    }
}

/// Mailbox transport registers and queues.
///
/// All mutation goes through `&mut self`; the owning [`crate::Mailbox`] provides the locking and
/// delivers the interrupt edges collected here once the lock is dropped.
#[derive(Debug, Clone, Default)]
pub struct MailboxState {
    mask: IntMask,
    iop: Channel,
    ap: Channel,
    pending_irqs: Vec<(IrqLine, bool)>,
}

impl MailboxState {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, q: Queue) -> &Channel {
        match q {
            Queue::Iop => &self.iop,
            Queue::Ap => &self.ap,
        }
    }

    fn channel_mut(&mut self, q: Queue) -> &mut Channel {
        match q {
            Queue::Iop => &mut self.iop,
            Queue::Ap => &mut self.ap,
        }
    }

    pub fn push(&mut self, q: Queue, msg: MailboxMessage) {
        self.channel_mut(q).queue.push_back(msg);
        self.update_lines();
    }

    pub fn pop(&mut self, q: Queue) -> Option<MailboxMessage> {
        let msg = self.channel_mut(q).queue.pop_front();
        self.update_lines();
        msg
    }

    pub fn len(&self, q: Queue) -> usize {
        self.channel(q).queue.len()
    }

    pub fn is_empty(&self, q: Queue) -> bool {
        self.channel(q).queue.is_empty()
    }

    pub fn int_mask(&self) -> IntMask {
        self.mask
    }

    pub fn set_int_mask(&mut self, bits: u32) {
        self.mask |= IntMask::from_bits_retain(bits);
        self.update_lines();
    }

    pub fn clear_int_mask(&mut self, bits: u32) {
        self.mask &= !IntMask::from_bits_retain(bits);
        self.update_lines();
    }

    /// Control register value as seen by a read: stored bits merged with live queue status.
    pub fn ctrl(&self, q: Queue) -> u32 {
        let ch = self.channel(q);
        ch.ctrl | ctrl_status(ch.queue.len())
    }

    pub fn set_ctrl(&mut self, q: Queue, value: u32) {
        self.channel_mut(q).ctrl = value & !(CTRL_EMPTY | CTRL_COUNT_MASK);
    }

    /// Stages `bytes` at `off` in the send frame of `q`. Returns the frame if this write
    /// completed it; the frame has then already been pushed.
    pub(crate) fn write_send(
        &mut self,
        q: Queue,
        off: usize,
        bytes: &[u8],
    ) -> Option<MailboxMessage> {
        let ch = self.channel_mut(q);
        let end = (off + bytes.len()).min(FRAME_LEN);
        ch.send[off..end].copy_from_slice(&bytes[..end - off]);
        if off + bytes.len() < FRAME_LEN {
            return None;
        }
        let msg = MailboxMessage::from_bytes(ch.send);
        ch.send = [0; FRAME_LEN];
        self.push(q, msg);
        Some(msg)
    }

    /// Reads `size` bytes of the receive frame of `q` at `off`. A read of the first word pops
    /// the next frame into the latch; the popped frame is returned alongside the value.
    pub(crate) fn read_recv(
        &mut self,
        q: Queue,
        off: usize,
        size: usize,
    ) -> (u64, Option<MailboxMessage>) {
        let popped = if off == 0 {
            let msg = self.pop(q);
            self.channel_mut(q).recv = msg.map(|m| *m.as_bytes()).unwrap_or([0; FRAME_LEN]);
            msg
        } else {
            None
        };

        let recv = &self.channel(q).recv;
        let end = (off + size).min(FRAME_LEN);
        let mut out = [0u8; 8];
        out[..end - off].copy_from_slice(&recv[off..end]);
        (u64::from_le_bytes(out), popped)
    }

    /// Clears queues, staging buffers, control registers and the mask. Interrupt lines drop as a
    /// consequence.
    pub fn reset(&mut self) {
        self.mask = IntMask::empty();
        self.iop.reset();
        self.ap.reset();
        self.update_lines();
    }

    pub(crate) fn take_irq_changes(&mut self) -> Vec<(IrqLine, bool)> {
        std::mem::take(&mut self.pending_irqs)
    }

    fn update_lines(&mut self) {
        for (q, bit) in [
            (Queue::Iop, IntMask::IOP_NONEMPTY),
            (Queue::Ap, IntMask::AP_NONEMPTY),
        ] {
            let level = self.mask.contains(bit) && !self.is_empty(q);
            let ch = self.channel_mut(q);
            if ch.line != level {
                ch.line = level;
                self.pending_irqs.push((IrqLine::from(q), level));
            }
        }
    }
}

const TAG_INT_MASK: u16 = 1;
const TAG_IOP_CTRL: u16 = 2;
const TAG_AP_CTRL: u16 = 3;
const TAG_IOP_QUEUE: u16 = 4;
const TAG_AP_QUEUE: u16 = 5;
const TAG_IOP_SEND: u16 = 6;
const TAG_IOP_RECV: u16 = 7;
const TAG_AP_SEND: u16 = 8;
const TAG_AP_RECV: u16 = 9;

fn encode_queue(queue: &VecDeque<MailboxMessage>) -> Vec<u8> {
    queue
        .iter()
        .fold(Encoder::new().u32(queue.len() as u32), |e, m| {
            e.bytes(m.as_bytes())
        })
        .finish()
}

fn decode_queue(bytes: &[u8]) -> SnapshotResult<VecDeque<MailboxMessage>> {
    let mut d = Decoder::new(bytes);
    let count = d.u32()? as usize;
    if count > d.remaining() / FRAME_LEN {
        return Err(SnapshotError::InvalidFieldEncoding("mailbox queue length"));
    }
    let mut queue = VecDeque::with_capacity(count);
    for _ in 0..count {
        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(d.bytes(FRAME_LEN)?);
        queue.push_back(MailboxMessage::from_bytes(frame));
    }
    d.finish()?;
    Ok(queue)
}

fn frame_field(bytes: Option<&[u8]>) -> SnapshotResult<[u8; FRAME_LEN]> {
    match bytes {
        None => Ok([0; FRAME_LEN]),
        Some(b) => b
            .try_into()
            .map_err(|_| SnapshotError::InvalidFieldEncoding("mailbox staging frame")),
    }
}

impl IoSnapshot for MailboxState {
    const DEVICE_ID: [u8; 4] = *b"MBOX";
    const DEVICE_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

    fn save_state(&self) -> Vec<u8> {
        let mut w = SnapshotWriter::new(Self::DEVICE_ID, Self::DEVICE_VERSION);
        w.field_u32(TAG_INT_MASK, self.mask.bits());
        w.field_u32(TAG_IOP_CTRL, self.iop.ctrl);
        w.field_u32(TAG_AP_CTRL, self.ap.ctrl);
        w.field_bytes(TAG_IOP_QUEUE, encode_queue(&self.iop.queue));
        w.field_bytes(TAG_AP_QUEUE, encode_queue(&self.ap.queue));
        w.field_bytes(TAG_IOP_SEND, self.iop.send.to_vec());
        w.field_bytes(TAG_IOP_RECV, self.iop.recv.to_vec());
        w.field_bytes(TAG_AP_SEND, self.ap.send.to_vec());
        w.field_bytes(TAG_AP_RECV, self.ap.recv.to_vec());
        w.finish()
    }

    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        let r = SnapshotReader::parse(bytes, Self::DEVICE_ID)?;
        r.ensure_device_major(Self::DEVICE_VERSION.major)?;

        // Decode everything before touching `self` so a bad snapshot leaves the state intact.
        let mask = IntMask::from_bits_retain(r.u32(TAG_INT_MASK)?.unwrap_or(0));
        let iop = Channel {
            queue: r.bytes(TAG_IOP_QUEUE).map(decode_queue).transpose()?.unwrap_or_default(),
            send: frame_field(r.bytes(TAG_IOP_SEND))?,
            recv: frame_field(r.bytes(TAG_IOP_RECV))?,
            ctrl: r.u32(TAG_IOP_CTRL)?.unwrap_or(0),
            line: self.iop.line,
        };
        let ap = Channel {
            queue: r.bytes(TAG_AP_QUEUE).map(decode_queue).transpose()?.unwrap_or_default(),
            send: frame_field(r.bytes(TAG_AP_SEND))?,
            recv: frame_field(r.bytes(TAG_AP_RECV))?,
            ctrl: r.u32(TAG_AP_CTRL)?.unwrap_or(0),
            line: self.ap.line,
        };

        self.mask = mask;
        self.iop = iop;
        self.ap = ap;
        self.update_lines();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: u8) -> MailboxMessage {
        MailboxMessage::from_bytes([n; FRAME_LEN])
    }

    #[test]
    fn line_follows_mask_and_queue() {
        let mut s = MailboxState::new();
        s.push(Queue::Ap, frame(1));
        assert!(s.take_irq_changes().is_empty());

        s.set_int_mask(IntMask::AP_NONEMPTY.bits());
        assert_eq!(s.take_irq_changes(), vec![(IrqLine::Ap, true)]);

        s.push(Queue::Ap, frame(2));
        assert!(s.take_irq_changes().is_empty());

        assert_eq!(s.pop(Queue::Ap), Some(frame(1)));
        assert!(s.take_irq_changes().is_empty());
        assert_eq!(s.pop(Queue::Ap), Some(frame(2)));
        assert_eq!(s.take_irq_changes(), vec![(IrqLine::Ap, false)]);
    }

    #[test]
    fn clearing_mask_lowers_line() {
        let mut s = MailboxState::new();
        s.set_int_mask(IntMask::IOP_NONEMPTY.bits());
        s.push(Queue::Iop, frame(1));
        s.clear_int_mask(IntMask::IOP_NONEMPTY.bits());
        assert_eq!(
            s.take_irq_changes(),
            vec![(IrqLine::Iop, true), (IrqLine::Iop, false)]
        );
    }

    #[test]
    fn ctrl_write_does_not_latch_status_bits() {
        let mut s = MailboxState::new();
        s.set_ctrl(Queue::Iop, 0xffff_ffff);
        s.push(Queue::Iop, frame(1));
        assert_eq!(s.ctrl(Queue::Iop) & CTRL_EMPTY, 0);
        assert_eq!((s.ctrl(Queue::Iop) & CTRL_COUNT_MASK) >> 20, 1);
    }

    #[test]
    fn spilled_bytes_are_dropped() {
        let mut s = MailboxState::new();
        assert!(s.write_send(Queue::Iop, 0, &[1; 8]).is_none());
        assert!(s.write_send(Queue::Iop, 8, &[2; 4]).is_none());
        let msg = s.write_send(Queue::Iop, 12, &[3; 8]).unwrap();
        let mut expected = [1u8; FRAME_LEN];
        expected[8..12].fill(2);
        expected[12..].fill(3);
        assert_eq!(msg.as_bytes(), &expected);
        assert_eq!(s.len(Queue::Iop), 1);
    }

    #[test]
    fn queue_field_rejects_count_larger_than_payload() {
        let bytes = Encoder::new().u32(1000).bytes(&[0; FRAME_LEN]).finish();
        assert_eq!(
            decode_queue(&bytes),
            Err(SnapshotError::InvalidFieldEncoding("mailbox queue length"))
        );
    }
}
