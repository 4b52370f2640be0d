//! Smart IO ("SIO") DMA offload coprocessor.
//!
//! The SIO sits behind an [`iop_mailbox::Mailbox`]. Frames written by the host into the IOP send
//! frame are decoded as [`SioMessage`]s and dispatched against a parameter table and a set of DMA
//! endpoints; replies are queued for the host on the AP side.
//!
//! Collaborating device models obtain a [`DmaEndpointHandle`] for their channel and move data
//! with [`DmaEndpointHandle::read`] / [`DmaEndpointHandle::write`]. When a transfer consumes the
//! whole mapping the endpoint unmaps itself and posts `DMA_COMPLETE` to the host.

mod config;
mod dispatch;
mod endpoint;
mod error;
mod frontend;
pub mod message;
pub mod params;
mod snapshot;

use std::sync::{Arc, Mutex, TryLockError};

use iop_mailbox::{InterruptSink, Mailbox, MailboxConfig, MailboxMessage, Queue};
use memory::DmaMemory;
use tracing::{debug, trace, warn};

pub use config::SioConfig;
pub use endpoint::{
    validate_segments, Direction, DmaMapping, EndpointState, Segment, CONFIG_LEN,
    MAX_MAPPING_BYTES, MAX_SEGMENTS,
};
pub use error::{SioError, SioResult};
pub use frontend::{BusMasterFrontEnd, PciCommand};
pub use message::{SioMessage, EP_CONTROL, EP_PERF};
pub use params::{ParamStore, PARAM_TABLE_LEN};

use message::{op, DMA_COMPLETE_PARAM};

/// Size of one `dma-channels` record: eight 32-bit cells, the first being the endpoint id.
const DMA_CHANNEL_RECORD_LEN: usize = 32;

/// SIO state guarded by the mailbox lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SioState {
    params: ParamStore,
    endpoints: Vec<EndpointState>,
}

impl SioState {
    fn new(config: &SioConfig) -> Self {
        let mut params = ParamStore::default();
        params.reset(config.protocol_version);
        Self {
            params,
            endpoints: (0..config.endpoint_count).map(EndpointState::new).collect(),
        }
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    pub fn endpoint(&self, id: u8) -> Option<&EndpointState> {
        self.endpoints.get(usize::from(id))
    }

    pub(crate) fn endpoint_mut(&mut self, id: u8) -> SioResult<&mut EndpointState> {
        self.endpoints
            .get_mut(usize::from(id))
            .ok_or(SioError::NoSuchEndpoint(id))
    }

    /// Endpoint `id`, provided no mapping is installed on it.
    pub(crate) fn idle_endpoint_mut(&mut self, id: u8) -> SioResult<&mut EndpointState> {
        let ep = self.endpoint_mut(id)?;
        if ep.is_mapped() {
            return Err(SioError::AlreadyMapped(id));
        }
        Ok(ep)
    }

    pub(crate) fn mapping(&self, id: u8) -> SioResult<&DmaMapping> {
        self.endpoint(id)
            .ok_or(SioError::NoSuchEndpoint(id))?
            .mapping
            .as_ref()
            .ok_or(SioError::NotMapped(id))
    }

    pub(crate) fn take_mapping(&mut self, id: u8) -> SioResult<(Direction, DmaMapping)> {
        let ep = self.endpoint_mut(id)?;
        let mapping = ep.mapping.take().ok_or(SioError::NotMapped(id))?;
        Ok((ep.direction, mapping))
    }
}

pub(crate) struct SioShared {
    pub(crate) config: SioConfig,
    pub(crate) mailbox: Mailbox<SioState>,
    pub(crate) dma: Arc<dyn DmaMemory>,
    /// Held by whichever context is draining the IOP queue, so requests are answered in the
    /// order they were queued.
    pub(crate) drain: Mutex<()>,
}

impl SioShared {
    pub(crate) fn frame(&self, msg: SioMessage) -> MailboxMessage {
        MailboxMessage::new(msg.to_raw(), self.config.transport_endpoint)
    }
}

pub struct Sio {
    shared: Arc<SioShared>,
    frontend: BusMasterFrontEnd,
}

impl Sio {
    pub fn new(config: SioConfig, dma: Arc<dyn DmaMemory>, irq: Arc<dyn InterruptSink>) -> Self {
        let mailbox = Mailbox::new(
            MailboxConfig {
                role: "SIO".to_string(),
            },
            irq,
            SioState::new(&config),
        );
        Self {
            shared: Arc::new(SioShared {
                config,
                mailbox,
                dma,
                drain: Mutex::new(()),
            }),
            frontend: BusMasterFrontEnd::new(),
        }
    }

    pub fn config(&self) -> &SioConfig {
        &self.shared.config
    }

    pub fn mailbox(&self) -> &Mailbox<SioState> {
        &self.shared.mailbox
    }

    pub fn mmio_read(&self, offset: u64, size: usize) -> u64 {
        self.shared.mailbox.mmio_read(offset, size)
    }

    /// Host register write. A completed frame is serviced before this returns, either here or
    /// by the context that is already draining the queue.
    pub fn mmio_write(&self, offset: u64, size: usize, value: u64) {
        self.shared.mailbox.mmio_write(offset, size, value);
        self.process_pending();
    }

    /// Register window of the coprocessor core wrapper. Nothing behind it is modelled.
    pub fn core_mmio_read(&self, offset: u64, size: usize) -> u64 {
        trace!(offset, size, "SIO core register read");
        0
    }

    pub fn core_mmio_write(&self, offset: u64, size: usize, value: u64) {
        trace!(offset, size, value, "SIO core register write");
    }

    /// Services every frame waiting in the coprocessor-bound queue. Returns the number of
    /// frames consumed by this call.
    ///
    /// Only one context drains at a time. A caller that finds the queue already being drained
    /// returns immediately; the draining context re-checks the queue after giving up the drain
    /// lock, so no frame is left behind.
    pub fn process_pending(&self) -> usize {
        let mut n = 0;
        loop {
            let guard = match self.shared.drain.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return n,
            };
            while let Some(frame) = self.shared.mailbox.recv_iop() {
                n += 1;
                if frame.info() != self.shared.config.transport_endpoint {
                    warn!(
                        info = frame.info(),
                        msg = frame.msg(),
                        "SIO: frame for unsupported transport endpoint dropped"
                    );
                    continue;
                }
                self.shared.handle_message(frame.msg());
            }
            drop(guard);
            if self.shared.mailbox.pending(Queue::Iop) == 0 {
                return n;
            }
        }
    }

    /// Dispatches one protocol message as if it had arrived through the mailbox.
    pub fn handle_message(&self, raw: u64) {
        self.shared.handle_message(raw);
    }

    pub fn param(&self, id: u8) -> SioResult<u32> {
        self.shared
            .mailbox
            .with_locked(|inner| inner.device.params.get(id))
    }

    /// Handle for a collaborator-facing DMA endpoint. Control, perf and the reserved ids below
    /// them are never handed out.
    pub fn endpoint(&self, id: u8) -> Option<DmaEndpointHandle> {
        if id <= EP_PERF || id >= self.shared.config.endpoint_count {
            return None;
        }
        Some(DmaEndpointHandle {
            id,
            direction: Direction::for_endpoint(id),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Resolves entry `idx` of a `dma-channels` property (32-byte records whose first
    /// little-endian cell is the endpoint id).
    pub fn endpoint_from_dma_channels(&self, prop: &[u8], idx: usize) -> Option<DmaEndpointHandle> {
        let record = prop.chunks_exact(DMA_CHANNEL_RECORD_LEN).nth(idx)?;
        let id = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        self.endpoint(u8::try_from(id).ok()?)
    }

    pub fn frontend(&self) -> &BusMasterFrontEnd {
        &self.frontend
    }

    pub fn frontend_mut(&mut self) -> &mut BusMasterFrontEnd {
        &mut self.frontend
    }

    /// Coprocessor start/wakeup.
    pub fn start(&mut self) {
        self.frontend.start();
    }

    /// Returns the device to its power-on state. Active mappings are released without a
    /// completion message.
    pub fn reset(&mut self) {
        let protocol_version = self.shared.config.protocol_version;
        let released = self.shared.mailbox.with_locked(|inner| {
            let released: Vec<_> = inner
                .device
                .endpoints
                .iter_mut()
                .filter_map(|ep| {
                    ep.config = [0; CONFIG_LEN];
                    ep.mapping.take().map(|m| (ep.id, ep.direction, m))
                })
                .collect();
            inner.device.params.reset(protocol_version);
            inner.transport.reset();
            released
        });
        for (id, direction, mapping) in &released {
            self.shared.release(*id, *direction, mapping);
        }
        self.frontend.reset();
        debug!(released = released.len(), "SIO reset");
    }
}

impl std::fmt::Debug for Sio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sio")
            .field("config", &self.shared.config)
            .field("frontend", &self.frontend)
            .finish_non_exhaustive()
    }
}

/// Collaborator view of one DMA endpoint.
#[derive(Clone)]
pub struct DmaEndpointHandle {
    id: u8,
    direction: Direction,
    shared: Arc<SioShared>,
}

impl DmaEndpointHandle {
    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Configuration blob last loaded by `CONFIG_SHIM`.
    pub fn config(&self) -> [u8; CONFIG_LEN] {
        self.shared.mailbox.with_locked(|inner| {
            inner
                .device
                .endpoint(self.id)
                .map(|ep| ep.config)
                .unwrap_or_default()
        })
    }

    pub fn is_mapped(&self) -> bool {
        self.shared.mailbox.with_locked(|inner| {
            inner
                .device
                .endpoint(self.id)
                .is_some_and(EndpointState::is_mapped)
        })
    }

    pub fn remaining(&self) -> u64 {
        self.shared.mailbox.with_locked(|inner| {
            inner
                .device
                .endpoint(self.id)
                .and_then(|ep| ep.mapping.as_ref())
                .map_or(0, DmaMapping::remaining)
        })
    }

    /// Device-side read of a `ToDevice` transfer. Returns 0 when nothing is mapped.
    pub fn read(&self, buf: &mut [u8]) -> SioResult<usize> {
        if self.direction != Direction::ToDevice {
            return Err(SioError::WrongDirection(self.id));
        }
        Ok(self.transfer(|m| m.read(buf)))
    }

    /// Device-side write of a `FromDevice` transfer. Returns 0 when nothing is mapped.
    pub fn write(&self, buf: &[u8]) -> SioResult<usize> {
        if self.direction != Direction::FromDevice {
            return Err(SioError::WrongDirection(self.id));
        }
        Ok(self.transfer(|m| m.write(buf)))
    }

    fn transfer(&self, f: impl FnOnce(&mut DmaMapping) -> usize) -> usize {
        let shared = &self.shared;
        shared.mailbox.with_locked(|inner| {
            let Ok(ep) = inner.device.endpoint_mut(self.id) else {
                return 0;
            };
            let Some(mapping) = ep.mapping.as_mut() else {
                return 0;
            };
            let n = f(mapping);
            trace!(endpoint = self.id, n, cursor = mapping.cursor, total = mapping.total, "SIO DMA");
            if !mapping.is_complete() {
                return n;
            }

            let Some(mapping) = ep.mapping.take() else {
                return n;
            };
            // Unmap, writeback and completion happen under one lock: a snapshot or query sees
            // the transfer either in flight or finished with its completion queued.
            shared.release(self.id, self.direction, &mapping);
            shared.push_reply(inner, dma_complete(self.id, &mapping));
            n
        })
    }
}

impl std::fmt::Debug for DmaEndpointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaEndpointHandle")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

fn dma_complete(endpoint: u8, mapping: &DmaMapping) -> SioMessage {
    SioMessage {
        endpoint,
        tag: mapping.tag,
        opcode: op::DMA_COMPLETE,
        param: DMA_COMPLETE_PARAM,
        data: mapping.cursor as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::PARAM_PROTOCOL;

    #[test]
    fn endpoint_lookups_report_typed_errors() {
        let mut state = SioState::new(&SioConfig::default());
        assert_eq!(state.params().get(PARAM_PROTOCOL), Ok(9));

        assert_eq!(state.mapping(5).err(), Some(SioError::NotMapped(5)));
        assert_eq!(state.take_mapping(5).err(), Some(SioError::NotMapped(5)));
        assert_eq!(state.mapping(0xF0).err(), Some(SioError::NoSuchEndpoint(0xF0)));
        assert_eq!(state.endpoint_mut(0xDB).err(), Some(SioError::NoSuchEndpoint(0xDB)));

        state.endpoint_mut(5).unwrap().mapping = DmaMapping::from_parts(3, vec![], vec![], 0);
        assert_eq!(state.idle_endpoint_mut(5).err(), Some(SioError::AlreadyMapped(5)));
        assert_eq!(
            state.endpoint(5).and_then(EndpointState::mapping).map(DmaMapping::tag),
            Some(3)
        );

        let (direction, mapping) = state.take_mapping(5).unwrap();
        assert_eq!((direction, mapping.tag()), (Direction::FromDevice, 3));
        assert!(!state.endpoint(5).unwrap().is_mapped());
        assert!(state.idle_endpoint_mut(5).is_ok());
    }
}
