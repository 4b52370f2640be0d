//! Request handling for frames popped from the coprocessor-bound queue.

use iop_mailbox::{MailboxInner, Queue};
use tracing::{debug, warn};

use crate::endpoint::{Direction, DmaMapping, Segment, CONFIG_LEN, MAX_SEGMENTS};
use crate::error::{SioError, SioResult};
use crate::message::{op, Request, SioMessage};
use crate::{SioShared, SioState};

const SEGMENT_COUNT_OFFSET: u64 = 0x3C;
const SEGMENT_ARRAY_OFFSET: u64 = 0x48;
const SEGMENT_DESC_LEN: usize = 16;
const DESCRIPTOR_STRIDE: u64 = 12;

impl SioShared {
    pub(crate) fn handle_message(&self, raw: u64) {
        let msg = SioMessage::parse(raw);
        debug!(
            endpoint = msg.endpoint,
            tag = msg.tag,
            opcode = msg.opcode,
            param = msg.param,
            data = msg.data,
            "SIO request"
        );

        match Request::classify(&msg, self.config.endpoint_count) {
            Request::GetParam { param } => self.mailbox.with_locked(|inner| {
                let reply = match inner.device.params.get(param) {
                    Ok(value) => msg.reply(op::GET_PARAM_RETURN, value),
                    Err(err) => {
                        warn!(%err, "SIO: GET_PARAM rejected");
                        msg.reply(op::ERROR, 0)
                    }
                };
                self.push_reply(inner, reply);
            }),
            Request::SetParam { param, value } => self.mailbox.with_locked(|inner| {
                let reply = match inner.device.params.set(param, value) {
                    Ok(()) => msg.reply(op::ACK, 0),
                    Err(err) => {
                        warn!(%err, "SIO: SET_PARAM rejected");
                        msg.reply(op::SET_PARAM_ERROR, 0)
                    }
                };
                self.push_reply(inner, reply);
            }),
            Request::ControlUnknown => {
                warn!(endpoint = msg.endpoint, opcode = msg.opcode, "SIO: unknown control op");
                self.reply(msg.reply(op::ERROR, 0));
            }
            Request::UnknownEndpoint => {
                warn!(endpoint = msg.endpoint, raw, "SIO: unknown endpoint");
            }
            Request::DmaUnknown => {
                warn!(endpoint = msg.endpoint, opcode = msg.opcode, "SIO: unknown DMA op");
                self.reply(msg.reply(op::ERROR, 0));
            }
            Request::ConfigShim { index } => self.config_shim(&msg, index),
            Request::StartDma { index } => self.start_dma(&msg, index),
            Request::QueryDma => self.query_dma(&msg),
            Request::StopDma => self.stop_dma(&msg),
        }
    }

    fn descriptor_addr(&self, index: u32) -> u64 {
        let base = self.mailbox.with_locked(|inner| inner.device.params.segment_base());
        base + u64::from(index) * DESCRIPTOR_STRIDE
    }

    fn config_shim(&self, msg: &SioMessage, index: u32) {
        let addr = self.descriptor_addr(index);
        let mut config = [0u8; CONFIG_LEN];
        if let Err(err) = self.dma.dma_read(addr, &mut config) {
            warn!(endpoint = msg.endpoint, addr, %err, "SIO: CONFIG_SHIM read failed, reply dropped");
            return;
        }
        self.mailbox.with_locked(|inner| {
            let stored = inner.device.endpoint_mut(msg.endpoint).map(|ep| {
                ep.config = config;
                (op::ACK, 0)
            });
            self.answer(inner, msg, stored);
        });
    }

    fn start_dma(&self, msg: &SioMessage, index: u32) {
        let id = msg.endpoint;
        let direction = self.mailbox.with_locked(|inner| {
            let direction = inner.device.idle_endpoint_mut(id).map(|ep| ep.direction);
            if let Err(err) = &direction {
                self.reject(inner, msg, err);
            }
            direction.ok()
        });
        let Some(direction) = direction else {
            return;
        };

        let handle = self.descriptor_addr(index);
        let mapping = self
            .fetch_segments(handle)
            .and_then(|segments| DmaMapping::map(&*self.dma, direction, msg.tag, segments));
        let mapping = match mapping {
            Ok(mapping) => mapping,
            Err(SioError::Memory(err)) => {
                warn!(endpoint = id, handle, %err, "SIO: START_DMA memory fault, reply dropped");
                return;
            }
            Err(err) => {
                warn!(endpoint = id, handle, %err, "SIO: START_DMA rejected");
                self.reply(msg.reply(op::ERROR, 0));
                return;
            }
        };

        self.mailbox.with_locked(|inner| {
            // Another START_DMA may have published a mapping while the lock was released.
            let published = inner.device.idle_endpoint_mut(id).map(|ep| {
                debug!(
                    endpoint = id,
                    tag = msg.tag,
                    segments = mapping.segments.len(),
                    total = mapping.total,
                    "SIO: DMA mapped"
                );
                ep.mapping = Some(mapping);
                (op::ACK, 0)
            });
            self.answer(inner, msg, published);
        });
    }

    fn fetch_segments(&self, handle: u64) -> SioResult<Vec<Segment>> {
        let count = self.dma.dma_read_u32(handle + SEGMENT_COUNT_OFFSET)?;
        if count > MAX_SEGMENTS {
            return Err(SioError::BadSegmentCount {
                count,
                max: MAX_SEGMENTS,
            });
        }
        let mut raw = vec![0u8; count as usize * SEGMENT_DESC_LEN];
        self.dma.dma_read(handle + SEGMENT_ARRAY_OFFSET, &mut raw)?;
        Ok(raw
            .chunks_exact(SEGMENT_DESC_LEN)
            .map(|d| {
                let mut base = [0u8; 8];
                let mut len = [0u8; 8];
                base.copy_from_slice(&d[..8]);
                len.copy_from_slice(&d[8..]);
                Segment {
                    base: u64::from_le_bytes(base),
                    len: u64::from_le_bytes(len),
                }
            })
            .collect())
    }

    fn query_dma(&self, msg: &SioMessage) {
        self.mailbox.with_locked(|inner| {
            // Mappings are bounded well below 4 GiB.
            let cursor = inner.device.mapping(msg.endpoint).map(|m| m.cursor as u32);
            self.answer(inner, msg, cursor.map(|c| (op::QUERY_DMA_OK, c)));
        });
    }

    fn stop_dma(&self, msg: &SioMessage) {
        self.mailbox.with_locked(|inner| match inner.device.take_mapping(msg.endpoint) {
            Ok((direction, mapping)) => {
                debug!(endpoint = msg.endpoint, cursor = mapping.cursor, "SIO: DMA stopped");
                self.release(msg.endpoint, direction, &mapping);
                self.push_reply(inner, msg.reply(op::ACK, 0));
            }
            Err(err) => self.reject(inner, msg, &err),
        });
    }

    /// Writes a FromDevice mapping's transferred bytes back to guest memory. Completion and
    /// STOP_DMA call this with the mailbox lock held, so `DmaMemory::dma_write` must not
    /// re-enter the device.
    pub(crate) fn release(&self, endpoint: u8, direction: Direction, mapping: &DmaMapping) {
        if direction == Direction::FromDevice {
            mapping.flush(&*self.dma, endpoint);
        }
    }

    /// Replies with `opcode`/`data` on success; any rejection becomes ERROR.
    fn answer(
        &self,
        inner: &mut MailboxInner<SioState>,
        msg: &SioMessage,
        result: SioResult<(u8, u32)>,
    ) {
        match result {
            Ok((opcode, data)) => self.push_reply(inner, msg.reply(opcode, data)),
            Err(err) => self.reject(inner, msg, &err),
        }
    }

    fn reject(&self, inner: &mut MailboxInner<SioState>, msg: &SioMessage, err: &SioError) {
        warn!(endpoint = msg.endpoint, opcode = msg.opcode, %err, "SIO: request rejected");
        self.push_reply(inner, msg.reply(op::ERROR, 0));
    }

    pub(crate) fn push_reply(&self, inner: &mut MailboxInner<SioState>, reply: SioMessage) {
        debug!(
            endpoint = reply.endpoint,
            tag = reply.tag,
            opcode = reply.opcode,
            param = reply.param,
            data = reply.data,
            "SIO reply"
        );
        inner.transport.push(Queue::Ap, self.frame(reply));
    }

    pub(crate) fn reply(&self, reply: SioMessage) {
        self.mailbox.with_locked(|inner| self.push_reply(inner, reply));
    }
}
