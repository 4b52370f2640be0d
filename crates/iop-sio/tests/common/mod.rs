#![allow(dead_code)]

use std::sync::Arc;

use iop_mailbox::regs::{REG_AP_RECV0, REG_IOP_SEND0};
use iop_mailbox::{InterruptLog, Queue};
use iop_sio::message::op;
use iop_sio::params::PARAM_DMA_SEGMENT_BASE;
use iop_sio::{Sio, SioConfig, SioMessage, EP_CONTROL};
use memory::{DenseMemory, DmaMemory, SharedGuestMemory};

pub const MEM_SIZE: u64 = 0x4_0000;
/// Value programmed into `PARAM_DMA_SEGMENT_BASE`; descriptors live at `0x10000`.
pub const SEGMENT_BASE_PARAM: u32 = 0x10;
pub const DESCRIPTOR_BASE: u64 = (SEGMENT_BASE_PARAM as u64) << 12;
pub const TRANSPORT_EP: u64 = 0x20;

pub struct Harness {
    pub sio: Sio,
    pub mem: Arc<SharedGuestMemory<DenseMemory>>,
    pub irq: Arc<InterruptLog>,
}

impl Harness {
    pub fn new() -> Self {
        let mem = Arc::new(SharedGuestMemory::new(DenseMemory::new(MEM_SIZE).unwrap()));
        let irq = Arc::new(InterruptLog::default());
        let sio = Sio::new(SioConfig::default(), mem.clone(), irq.clone());
        Self { sio, mem, irq }
    }

    /// Fresh device with the segment base programmed and the programming reply drained.
    pub fn with_segment_base() -> Self {
        let h = Self::new();
        let reply = h.request(msg(EP_CONTROL, 0, op::SET_PARAM, PARAM_DMA_SEGMENT_BASE, SEGMENT_BASE_PARAM));
        assert_eq!(reply.map(|r| r.opcode), Some(op::ACK));
        h
    }

    /// Writes a frame through the host send registers, one 32-bit slot at a time.
    pub fn send_raw(&self, raw: u64, info: u64) {
        let mut frame = [0u8; 16];
        frame[..8].copy_from_slice(&raw.to_le_bytes());
        frame[8..].copy_from_slice(&info.to_le_bytes());
        for (i, word) in frame.chunks_exact(4).enumerate() {
            let v = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            self.sio.mmio_write(REG_IOP_SEND0 + i as u64 * 4, 4, u64::from(v));
        }
    }

    pub fn send(&self, m: SioMessage) {
        self.send_raw(m.to_raw(), TRANSPORT_EP);
    }

    /// Pops the next host-bound frame through the receive registers.
    pub fn recv(&self) -> Option<SioMessage> {
        if self.sio.mailbox().pending(Queue::Ap) == 0 {
            return None;
        }
        let lo = self.sio.mmio_read(REG_AP_RECV0, 4);
        let hi = self.sio.mmio_read(REG_AP_RECV0 + 4, 4);
        let info = self.sio.mmio_read(REG_AP_RECV0 + 8, 8);
        assert_eq!(info, TRANSPORT_EP);
        Some(SioMessage::parse(lo | (hi << 32)))
    }

    pub fn recv_all(&self) -> Vec<SioMessage> {
        std::iter::from_fn(|| self.recv()).collect()
    }

    pub fn request(&self, m: SioMessage) -> Option<SioMessage> {
        self.send(m);
        self.recv()
    }

    pub fn write_mem(&self, addr: u64, bytes: &[u8]) {
        self.mem.dma_write(addr, bytes).unwrap();
    }

    pub fn read_mem(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.mem.dma_read(addr, &mut out).unwrap();
        out
    }

    /// Lays out a START_DMA descriptor at `index` with the given `(base, len)` segments.
    pub fn write_descriptor(&self, index: u32, segments: &[(u64, u64)]) {
        let handle = DESCRIPTOR_BASE + u64::from(index) * 12;
        self.write_mem(handle + 0x3C, &(segments.len() as u32).to_le_bytes());
        for (i, (base, len)) in segments.iter().enumerate() {
            let at = handle + 0x48 + i as u64 * 16;
            self.write_mem(at, &base.to_le_bytes());
            self.write_mem(at + 8, &len.to_le_bytes());
        }
    }

    pub fn start_dma(&self, endpoint: u8, tag: u8, index: u32) -> Option<SioMessage> {
        self.request(msg(endpoint, tag, op::START_DMA, 0, index))
    }
}

pub fn msg(endpoint: u8, tag: u8, opcode: u8, param: u8, data: u32) -> SioMessage {
    SioMessage {
        endpoint,
        tag,
        opcode,
        param,
        data,
    }
}
