//! Host-side wiring of the SIO coprocessor: guest RAM, the interrupt sink and the device.
//!
//! [`SioMachine`] plays the part of the platform glue: it owns guest RAM, routes MMIO for the
//! mailbox window to the device and exposes the interrupt lines to whoever models the host CPU.

use std::sync::Arc;

use iop_io_snapshot::io::state::{IoSnapshot, SnapshotResult};
use iop_mailbox::regs::MMIO_WINDOW_SIZE;
use iop_mailbox::InterruptSink;
use iop_sio::{Sio, SioConfig};
use memory::{DenseMemory, GuestMemoryResult, SharedGuestMemory};
use tracing::warn;

pub use iop_io_snapshot;
pub use iop_mailbox;
pub use iop_sio;
pub use memory;

#[derive(Debug, Clone)]
pub struct SioMachineConfig {
    pub ram_size: u64,
    /// Guest physical address of the mailbox register window.
    pub mailbox_base: u64,
    pub sio: SioConfig,
}

impl Default for SioMachineConfig {
    fn default() -> Self {
        Self {
            ram_size: 16 * 1024 * 1024,
            mailbox_base: 0x2_0000_0000,
            sio: SioConfig::default(),
        }
    }
}

pub struct SioMachine {
    mailbox_base: u64,
    ram: Arc<SharedGuestMemory<DenseMemory>>,
    sio: Sio,
}

impl SioMachine {
    pub fn new(config: SioMachineConfig, irq: Arc<dyn InterruptSink>) -> GuestMemoryResult<Self> {
        let ram = Arc::new(SharedGuestMemory::new(DenseMemory::new(config.ram_size)?));
        let sio = Sio::new(config.sio, ram.clone(), irq);
        Ok(Self {
            mailbox_base: config.mailbox_base,
            ram,
            sio,
        })
    }

    pub fn ram(&self) -> &SharedGuestMemory<DenseMemory> {
        &self.ram
    }

    pub fn sio(&self) -> &Sio {
        &self.sio
    }

    pub fn sio_mut(&mut self) -> &mut Sio {
        &mut self.sio
    }

    fn window_offset(&self, paddr: u64) -> Option<u64> {
        let off = paddr.checked_sub(self.mailbox_base)?;
        (off < MMIO_WINDOW_SIZE).then_some(off)
    }

    /// Physical MMIO read issued by the host CPU.
    pub fn mmio_read(&self, paddr: u64, size: usize) -> u64 {
        match self.window_offset(paddr) {
            Some(off) => self.sio.mmio_read(off, size),
            None => {
                warn!(paddr, size, "unmapped MMIO read");
                0
            }
        }
    }

    /// Physical MMIO write issued by the host CPU.
    pub fn mmio_write(&self, paddr: u64, size: usize, value: u64) {
        match self.window_offset(paddr) {
            Some(off) => self.sio.mmio_write(off, size, value),
            None => warn!(paddr, size, value, "unmapped MMIO write"),
        }
    }

    pub fn reset(&mut self) {
        self.sio.reset();
    }

    pub fn save_device(&self) -> Vec<u8> {
        self.sio.save_state()
    }

    pub fn load_device(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        self.sio.load_state(bytes)
    }
}
