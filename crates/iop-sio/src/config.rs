/// Static configuration of a [`crate::Sio`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SioConfig {
    /// Number of endpoint ids served. Messages for ids at or above this are dropped.
    pub endpoint_count: u8,
    /// Value reported by `PARAM_PROTOCOL` after reset.
    pub protocol_version: u32,
    /// Transport info word carried in bytes 8..16 of every frame the SIO sends, and expected on
    /// every frame it accepts.
    pub transport_endpoint: u64,
}

impl Default for SioConfig {
    fn default() -> Self {
        Self {
            endpoint_count: 0xDB,
            protocol_version: 9,
            transport_endpoint: 0x20,
        }
    }
}
