//! Guest physical memory as seen by emulated bus-master devices.
//!
//! Two views are provided:
//! - [`GuestMemory`]: exclusive (`&mut`) access, used by whoever owns guest RAM.
//! - [`DmaMemory`]: shared (`&self`) access, used by devices that perform DMA from their own
//!   execution context and must not hold device locks while touching RAM.

mod dma;
mod phys;

pub use dma::{DmaMemory, SharedGuestMemory};
pub use phys::{DenseMemory, GuestMemory, GuestMemoryError, GuestMemoryResult};
