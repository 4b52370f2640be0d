use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::phys::{GuestMemory, GuestMemoryResult};

/// Bus-master view of guest physical memory.
///
/// Devices perform DMA through a shared reference so the access can happen without holding any
/// device lock. Implementations provide their own synchronization.
pub trait DmaMemory: Send + Sync {
    fn dma_read(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()>;
    fn dma_write(&self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()>;

    fn dma_read_u32(&self, paddr: u64) -> GuestMemoryResult<u32> {
        let mut buf = [0u8; 4];
        self.dma_read(paddr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn dma_read_u64(&self, paddr: u64) -> GuestMemoryResult<u64> {
        let mut buf = [0u8; 8];
        self.dma_read(paddr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

/// Adapts any [`GuestMemory`] backend into a [`DmaMemory`] by serializing accesses behind a mutex.
#[derive(Debug, Default)]
pub struct SharedGuestMemory<M> {
    inner: Mutex<M>,
}

impl<M: GuestMemory> SharedGuestMemory<M> {
    pub fn new(mem: M) -> Self {
        Self {
            inner: Mutex::new(mem),
        }
    }

    /// Exclusive access to the backing memory (e.g. for a CPU model or a test harness).
    pub fn lock(&self) -> MutexGuard<'_, M> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn into_inner(self) -> M {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M: GuestMemory + Send> DmaMemory for SharedGuestMemory<M> {
    fn dma_read(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        self.lock().read_into(paddr, dst)
    }

    fn dma_write(&self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        self.lock().write_from(paddr, src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phys::{DenseMemory, GuestMemoryError};

    #[test]
    fn shared_memory_forwards_to_backend() {
        let shared = SharedGuestMemory::new(DenseMemory::new(0x100).unwrap());
        shared.dma_write(0x10, &0x1234_5678u32.to_le_bytes()).unwrap();
        shared.lock().write_u64_le(0x20, 0xaabb_ccdd_eeff_0011).unwrap();

        assert_eq!(shared.dma_read_u32(0x10).unwrap(), 0x1234_5678);
        assert_eq!(shared.dma_read_u64(0x20).unwrap(), 0xaabb_ccdd_eeff_0011);
        assert_eq!(shared.into_inner().read_u32_le(0x10).unwrap(), 0x1234_5678);
    }

    #[test]
    fn shared_memory_reports_faults() {
        let shared = SharedGuestMemory::new(DenseMemory::new(0x10).unwrap());
        assert!(matches!(
            shared.dma_read_u64(0xc),
            Err(GuestMemoryError::OutOfRange { .. })
        ));
    }
}
