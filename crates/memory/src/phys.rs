use std::ops::Range;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuestMemoryError {
    /// Access touches bytes past the end of guest RAM (or its end address wraps).
    #[error("guest access 0x{paddr:x}+{len} outside RAM of 0x{size:x} bytes")]
    OutOfRange { paddr: u64, len: usize, size: u64 },
    #[error("cannot allocate {size} bytes of guest RAM on this host")]
    SizeTooLarge { size: u64 },
}

pub type GuestMemoryResult<T> = Result<T, GuestMemoryError>;

/// Owner's view of guest physical RAM. Word helpers are little-endian, matching the
/// coprocessor's descriptor layout.
pub trait GuestMemory {
    fn size(&self) -> u64;

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()>;

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()>;

    fn read_u32_le(&self, paddr: u64) -> GuestMemoryResult<u32> {
        read_array(self, paddr).map(u32::from_le_bytes)
    }

    fn read_u64_le(&self, paddr: u64) -> GuestMemoryResult<u64> {
        read_array(self, paddr).map(u64::from_le_bytes)
    }

    fn write_u32_le(&mut self, paddr: u64, value: u32) -> GuestMemoryResult<()> {
        self.write_from(paddr, &value.to_le_bytes())
    }

    fn write_u64_le(&mut self, paddr: u64, value: u64) -> GuestMemoryResult<()> {
        self.write_from(paddr, &value.to_le_bytes())
    }
}

fn read_array<M: GuestMemory + ?Sized, const N: usize>(
    mem: &M,
    paddr: u64,
) -> GuestMemoryResult<[u8; N]> {
    let mut out = [0u8; N];
    mem.read_into(paddr, &mut out)?;
    Ok(out)
}

/// Host index range for `len` bytes at `paddr`, or `OutOfRange` when any byte (or the end
/// address itself) falls outside `size`.
pub(crate) fn span(size: u64, paddr: u64, len: usize) -> GuestMemoryResult<Range<usize>> {
    let fault = || GuestMemoryError::OutOfRange { paddr, len, size };
    let end = paddr.checked_add(len as u64).ok_or_else(fault)?;
    if end > size {
        return Err(fault());
    }
    // `size` came from a host allocation, so both bounds fit in usize.
    Ok(paddr as usize..end as usize)
}

/// Flat RAM backing the whole guest physical range `0..size`.
#[derive(Debug, Clone)]
pub struct DenseMemory {
    ram: Vec<u8>,
}

impl DenseMemory {
    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        let len = usize::try_from(size).map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        Ok(Self { ram: vec![0; len] })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.ram
    }
}

impl GuestMemory for DenseMemory {
    fn size(&self) -> u64 {
        self.ram.len() as u64
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        let r = span(self.size(), paddr, dst.len())?;
        dst.copy_from_slice(&self.ram[r]);
        Ok(())
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        let r = span(self.size(), paddr, src.len())?;
        self.ram[r].copy_from_slice(src);
        Ok(())
    }
}
