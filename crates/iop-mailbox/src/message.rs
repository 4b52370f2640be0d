/// Size of one mailbox frame (four 32-bit register slots).
pub const FRAME_LEN: usize = 16;

/// A complete mailbox frame.
///
/// Bytes 0..8 carry the protocol message, bytes 8..16 the transport info word (the endpoint the
/// frame is addressed to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct MailboxMessage {
    bytes: [u8; FRAME_LEN],
}

impl MailboxMessage {
    pub fn new(msg: u64, info: u64) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[..8].copy_from_slice(&msg.to_le_bytes());
        bytes[8..].copy_from_slice(&info.to_le_bytes());
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; FRAME_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    pub fn msg(&self) -> u64 {
        u64::from_le_bytes(self.half(0))
    }

    pub fn info(&self) -> u64 {
        u64::from_le_bytes(self.half(8))
    }

    fn half(&self, start: usize) -> [u8; 8] {
        let mut out = [0u8; 8];
        out.copy_from_slice(&self.bytes[start..start + 8]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_are_little_endian() {
        let m = MailboxMessage::new(0x0807_0605_0403_0201, 0x20);
        assert_eq!(&m.as_bytes()[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&m.as_bytes()[8..], &[0x20, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(m.msg(), 0x0807_0605_0403_0201);
        assert_eq!(m.info(), 0x20);
    }
}
