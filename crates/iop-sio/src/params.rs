use crate::error::{SioError, SioResult};

pub const PARAM_TABLE_LEN: usize = 64;

pub const PARAM_PROTOCOL: u8 = 0;
pub const PARAM_DMA_SEGMENT_BASE: u8 = 1;
pub const PARAM_DMA_SEGMENT_SIZE: u8 = 2;
pub const PARAM_DMA_RESPONSE_BASE: u8 = 11;
pub const PARAM_DMA_RESPONSE_SIZE: u8 = 12;
pub const PARAM_PERF_BASE: u8 = 13;
pub const PARAM_PERF_SIZE: u8 = 14;
pub const PARAM_PANIC_BASE: u8 = 15;
pub const PARAM_PANIC_SIZE: u8 = 16;
pub const PARAM_PIO_BASE: u8 = 26;
pub const PARAM_PIO_SIZE: u8 = 27;
pub const PARAM_DEVICES_BASE: u8 = 28;
pub const PARAM_DEVICES_SIZE: u8 = 29;
pub const PARAM_TUNABLE_0_BASE: u8 = 30;
pub const PARAM_TUNABLE_0_SIZE: u8 = 31;
pub const PARAM_TUNABLE_1_BASE: u8 = 32;
pub const PARAM_TUNABLE_1_SIZE: u8 = 33;
pub const PARAM_PS_REGS_BASE: u8 = 36;
pub const PARAM_PS_REGS_SIZE: u8 = 37;
pub const PARAM_FORWARD_IRQS_BASE: u8 = 38;
pub const PARAM_FORWARD_IRQS_SIZE: u8 = 39;

/// Flat table of 32-bit firmware parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamStore {
    values: [u32; PARAM_TABLE_LEN],
}

impl Default for ParamStore {
    fn default() -> Self {
        Self {
            values: [0; PARAM_TABLE_LEN],
        }
    }
}

impl ParamStore {
    pub fn get(&self, id: u8) -> SioResult<u32> {
        self.values
            .get(usize::from(id))
            .copied()
            .ok_or(SioError::ParamOutOfRange(id))
    }

    pub fn set(&mut self, id: u8, value: u32) -> SioResult<()> {
        let slot = self
            .values
            .get_mut(usize::from(id))
            .ok_or(SioError::ParamOutOfRange(id))?;
        *slot = value;
        Ok(())
    }

    pub fn reset(&mut self, protocol_version: u32) {
        self.values = [0; PARAM_TABLE_LEN];
        self.values[usize::from(PARAM_PROTOCOL)] = protocol_version;
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.values
    }

    /// Base address of the segment/config descriptor area.
    pub(crate) fn segment_base(&self) -> u64 {
        u64::from(self.values[usize::from(PARAM_DMA_SEGMENT_BASE)]) << 12
    }

    pub(crate) fn load(&mut self, values: [u32; PARAM_TABLE_LEN]) {
        self.values = values;
    }
}
