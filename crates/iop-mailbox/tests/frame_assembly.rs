use iop_mailbox::regs::{REG_AP_RECV0, REG_AP_SEND0, REG_IOP_RECV0, REG_IOP_SEND0};
use iop_mailbox::{Mailbox, MailboxMessage, Queue, FRAME_LEN};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn write_bytes(mb: &Mailbox, base: u64, off: usize, bytes: &[u8]) {
    let mut value = [0u8; 8];
    value[..bytes.len()].copy_from_slice(bytes);
    mb.mmio_write(base + off as u64, bytes.len(), u64::from_le_bytes(value));
}

fn read_frame(mb: &Mailbox, base: u64) -> [u8; FRAME_LEN] {
    let mut out = [0u8; FRAME_LEN];
    for word in 0..4 {
        let v = mb.mmio_read(base + word * 4, 4) as u32;
        out[word as usize * 4..][..4].copy_from_slice(&v.to_le_bytes());
    }
    out
}

/// Splits `0..FRAME_LEN` into consecutive chunks of 1..=8 bytes.
fn chunking() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..=8, 1..=16).prop_map(|sizes| {
        let mut out = Vec::new();
        let mut left = FRAME_LEN;
        for s in sizes {
            if left == 0 {
                break;
            }
            let s = s.min(left);
            out.push(s);
            left -= s;
        }
        // Finish with 8-byte (or smaller) chunks if the sizes ran out early.
        while left > 0 {
            let s = left.min(8);
            out.push(s);
            left -= s;
        }
        out
    })
}

/// Partial writes that never reach the final byte of the frame.
fn noise() -> impl Strategy<Value = Vec<(usize, Vec<u8>)>> {
    prop::collection::vec(
        (0usize..FRAME_LEN - 1).prop_flat_map(|off| {
            let max = (FRAME_LEN - 1 - off).min(8);
            (Just(off), prop::collection::vec(any::<u8>(), 1..=max))
        }),
        0..8,
    )
}

proptest! {
    #[test]
    fn any_write_split_yields_the_written_frame(
        frame in prop::array::uniform16(any::<u8>()),
        chunks in chunking(),
        junk in noise(),
    ) {
        let mb = Mailbox::<()>::default();

        for (off, bytes) in &junk {
            write_bytes(&mb, REG_IOP_SEND0, *off, bytes);
        }
        prop_assert_eq!(mb.pending(Queue::Iop), 0);

        let mut off = 0;
        for len in chunks {
            prop_assert_eq!(mb.pending(Queue::Iop), 0);
            write_bytes(&mb, REG_IOP_SEND0, off, &frame[off..off + len]);
            off += len;
        }

        prop_assert_eq!(mb.pending(Queue::Iop), 1);
        prop_assert_eq!(mb.recv_iop(), Some(MailboxMessage::from_bytes(frame)));
    }
}

#[test]
fn empty_receive_frame_reads_zero() {
    let mb = Mailbox::<()>::default();
    assert_eq!(read_frame(&mb, REG_AP_RECV0), [0u8; FRAME_LEN]);
    assert_eq!(read_frame(&mb, REG_IOP_RECV0), [0u8; FRAME_LEN]);
}

#[test]
fn receive_frames_pop_in_write_order() {
    let mb = Mailbox::<()>::default();
    let a = MailboxMessage::new(0x1111_2222_3333_4444, 0x20);
    let b = MailboxMessage::new(0x5555_6666_7777_8888, 0x20);
    for m in [a, b] {
        for word in 0..4usize {
            write_bytes(&mb, REG_AP_SEND0, word * 4, &m.as_bytes()[word * 4..][..4]);
        }
    }
    assert_eq!(mb.pending(Queue::Ap), 2);

    assert_eq!(read_frame(&mb, REG_AP_RECV0), *a.as_bytes());
    // Re-reading the upper words does not pop.
    assert_eq!(mb.mmio_read(REG_AP_RECV0 + 8, 8), a.info());
    assert_eq!(mb.pending(Queue::Ap), 1);

    assert_eq!(read_frame(&mb, REG_AP_RECV0), *b.as_bytes());
    assert_eq!(read_frame(&mb, REG_AP_RECV0), [0u8; FRAME_LEN]);
}

#[test]
fn eight_byte_accesses_cover_a_frame_in_two_halves() {
    let mb = Mailbox::<()>::default();
    mb.mmio_write(REG_IOP_SEND0, 8, 0xdead_beef_cafe_f00d);
    mb.mmio_write(REG_IOP_SEND0 + 8, 8, 0x20);

    assert_eq!(mb.mmio_read(REG_IOP_RECV0, 8), 0xdead_beef_cafe_f00d);
    assert_eq!(mb.mmio_read(REG_IOP_RECV0 + 8, 8), 0x20);
}
