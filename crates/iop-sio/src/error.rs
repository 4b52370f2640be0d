use memory::GuestMemoryError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SioError {
    #[error("parameter id {0} is out of range")]
    ParamOutOfRange(u8),

    #[error("endpoint {0} does not exist")]
    NoSuchEndpoint(u8),

    #[error("endpoint {0} does not support transfers in this direction")]
    WrongDirection(u8),

    #[error("endpoint {0} already has a DMA mapping")]
    AlreadyMapped(u8),

    #[error("endpoint {0} has no DMA mapping")]
    NotMapped(u8),

    #[error("segment count {count} exceeds limit {max}")]
    BadSegmentCount { count: u32, max: u32 },

    #[error("mapping of {len} bytes exceeds limit {max}")]
    MappingTooLarge { len: u64, max: u64 },

    #[error("segment base=0x{base:x} len=0x{len:x} wraps the address space")]
    SegmentOverflow { base: u64, len: u64 },

    #[error(transparent)]
    Memory(#[from] GuestMemoryError),
}

pub type SioResult<T> = Result<T, SioError>;
