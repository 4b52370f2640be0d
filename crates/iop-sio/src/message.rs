//! SIO protocol message layout and opcode table.

/// Request/reply opcodes. Some request and reply values overlap (`GET_PARAM` / `ERROR`).
pub mod op {
    pub const GET_PARAM: u8 = 2;
    pub const SET_PARAM: u8 = 3;
    pub const CONFIG_SHIM: u8 = 5;
    pub const START_DMA: u8 = 6;
    pub const QUERY_DMA: u8 = 7;
    pub const STOP_DMA: u8 = 8;

    pub const ERROR: u8 = 2;
    pub const SET_PARAM_ERROR: u8 = 3;
    pub const ACK: u8 = 101;
    pub const ASYNC_ERROR: u8 = 102;
    pub const GET_PARAM_RETURN: u8 = 103;
    pub const DMA_COMPLETE: u8 = 104;
    pub const QUERY_DMA_OK: u8 = 105;
}

pub const EP_CONTROL: u8 = 0;
pub const EP_PERF: u8 = 3;

/// Sub-parameter carried by `DMA_COMPLETE`.
pub const DMA_COMPLETE_PARAM: u8 = 1 << 7;

/// Protocol view of the low 8 bytes of a mailbox frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SioMessage {
    pub endpoint: u8,
    pub tag: u8,
    pub opcode: u8,
    pub param: u8,
    pub data: u32,
}

impl SioMessage {
    pub fn parse(raw: u64) -> Self {
        let b = raw.to_le_bytes();
        Self {
            endpoint: b[0],
            tag: b[1],
            opcode: b[2],
            param: b[3],
            data: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
        }
    }

    pub fn to_raw(self) -> u64 {
        let mut b = [0u8; 8];
        b[0] = self.endpoint;
        b[1] = self.tag;
        b[2] = self.opcode;
        b[3] = self.param;
        b[4..].copy_from_slice(&self.data.to_le_bytes());
        u64::from_le_bytes(b)
    }

    /// Reply skeleton echoing this request's endpoint and tag.
    pub fn reply(&self, opcode: u8, data: u32) -> Self {
        Self {
            endpoint: self.endpoint,
            tag: self.tag,
            opcode,
            param: 0,
            data,
        }
    }
}

/// A request classified by endpoint class and opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Request {
    GetParam { param: u8 },
    SetParam { param: u8, value: u32 },
    ControlUnknown,
    ConfigShim { index: u32 },
    StartDma { index: u32 },
    QueryDma,
    StopDma,
    DmaUnknown,
    UnknownEndpoint,
}

impl Request {
    pub(crate) fn classify(msg: &SioMessage, endpoint_count: u8) -> Self {
        match msg.endpoint {
            EP_CONTROL | EP_PERF => match msg.opcode {
                op::GET_PARAM => Request::GetParam { param: msg.param },
                op::SET_PARAM => Request::SetParam {
                    param: msg.param,
                    value: msg.data,
                },
                _ => Request::ControlUnknown,
            },
            ep if ep >= endpoint_count => Request::UnknownEndpoint,
            _ => match msg.opcode {
                op::CONFIG_SHIM => Request::ConfigShim { index: msg.data },
                op::START_DMA => Request::StartDma { index: msg.data },
                op::QUERY_DMA => Request::QueryDma,
                op::STOP_DMA => Request::StopDma,
                _ => Request::DmaUnknown,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_uses_byte_offsets() {
        let m = SioMessage::parse(0x1234_5678_0306_2a05);
        assert_eq!(
            m,
            SioMessage {
                endpoint: 0x05,
                tag: 0x2a,
                opcode: op::START_DMA,
                param: 0x03,
                data: 0x1234_5678,
            }
        );
        assert_eq!(m.to_raw(), 0x1234_5678_0306_2a05);
    }

    #[test]
    fn control_endpoints_intercept_dma_opcodes() {
        let m = SioMessage {
            endpoint: EP_PERF,
            opcode: op::START_DMA,
            ..Default::default()
        };
        assert_eq!(Request::classify(&m, 0xDB), Request::ControlUnknown);

        let m = SioMessage {
            endpoint: 0xDB,
            opcode: op::QUERY_DMA,
            ..Default::default()
        };
        assert_eq!(Request::classify(&m, 0xDB), Request::UnknownEndpoint);

        let m = SioMessage {
            endpoint: 1,
            opcode: op::GET_PARAM,
            ..Default::default()
        };
        assert_eq!(Request::classify(&m, 0xDB), Request::DmaUnknown);
    }
}
