use iop_io_snapshot::io::state::codec::{Decoder, Encoder};
use iop_io_snapshot::io::state::{
    IoSnapshot, SnapshotError, SnapshotReader, SnapshotResult, SnapshotVersion, SnapshotWriter,
};

use crate::endpoint::{DmaMapping, EndpointState, Segment, CONFIG_LEN, MAX_SEGMENTS};
use crate::frontend::PciCommand;
use crate::params::PARAM_TABLE_LEN;
use crate::{Sio, SioState};

const TAG_PARAMS: u16 = 1;
const TAG_ENDPOINTS: u16 = 2;
const TAG_MAILBOX: u16 = 3;
const TAG_FRONTEND_STARTED: u16 = 4;
const TAG_FRONTEND_COMMAND: u16 = 5;

fn encode_params(state: &SioState) -> Vec<u8> {
    let values = state.params.as_slice();
    values
        .iter()
        .fold(Encoder::new().u32(values.len() as u32), |e, v| e.u32(*v))
        .finish()
}

fn decode_params(bytes: &[u8]) -> SnapshotResult<[u32; PARAM_TABLE_LEN]> {
    let mut d = Decoder::new(bytes);
    let count = d.u32()? as usize;
    if count > PARAM_TABLE_LEN {
        return Err(SnapshotError::InvalidFieldEncoding("sio param count"));
    }
    let mut values = [0u32; PARAM_TABLE_LEN];
    for v in values.iter_mut().take(count) {
        *v = d.u32()?;
    }
    d.finish()?;
    Ok(values)
}

fn encode_endpoints(state: &SioState) -> Vec<u8> {
    let live: Vec<&EndpointState> = state
        .endpoints
        .iter()
        .filter(|ep| ep.is_mapped() || ep.config != [0; CONFIG_LEN])
        .collect();

    let mut e = Encoder::new().u32(live.len() as u32);
    for ep in live {
        e = e.u8(ep.id).bytes(&ep.config).bool(ep.is_mapped());
        if let Some(m) = &ep.mapping {
            e = m
                .segments
                .iter()
                .fold(
                    e.u8(m.tag).u64(m.cursor).u32(m.segments.len() as u32),
                    |e, s| e.u64(s.base).u64(s.len),
                )
                .vec_bytes(&m.buffers);
        }
    }
    e.finish()
}

fn decode_endpoints(bytes: &[u8], state: &mut SioState) -> SnapshotResult<()> {
    let mut d = Decoder::new(bytes);
    let count = d.u32()?;
    for _ in 0..count {
        let id = d.u8()?;
        let mut config = [0u8; CONFIG_LEN];
        config.copy_from_slice(d.bytes(CONFIG_LEN)?);
        let mapped = d.bool()?;

        let mapping = if mapped {
            let tag = d.u8()?;
            let cursor = d.u64()?;
            let seg_count = d.u32()?;
            if seg_count > MAX_SEGMENTS {
                return Err(SnapshotError::InvalidFieldEncoding("sio segment count"));
            }
            let mut segments = Vec::with_capacity(seg_count as usize);
            for _ in 0..seg_count {
                segments.push(Segment {
                    base: d.u64()?,
                    len: d.u64()?,
                });
            }
            if d.u32()? != seg_count {
                return Err(SnapshotError::InvalidFieldEncoding("sio buffer count"));
            }
            let mut buffers = Vec::with_capacity(seg_count as usize);
            for _ in 0..seg_count {
                buffers.push(d.vec_u8()?);
            }
            Some(
                DmaMapping::from_parts(tag, segments, buffers, cursor)
                    .ok_or(SnapshotError::InvalidFieldEncoding("sio dma mapping"))?,
            )
        } else {
            None
        };

        let ep = state
            .endpoint_mut(id)
            .map_err(|_| SnapshotError::InvalidFieldEncoding("sio endpoint id"))?;
        ep.config = config;
        ep.mapping = mapping;
    }
    d.finish()
}

impl IoSnapshot for Sio {
    const DEVICE_ID: [u8; 4] = *b"ASIO";
    const DEVICE_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

    fn save_state(&self) -> Vec<u8> {
        let mut w = SnapshotWriter::new(Self::DEVICE_ID, Self::DEVICE_VERSION);
        // Device and transport are captured under one lock so a transfer that completes
        // concurrently lands either entirely before or entirely after the snapshot.
        let (params, endpoints, transport) = self.shared.mailbox.with_locked(|inner| {
            (
                encode_params(&inner.device),
                encode_endpoints(&inner.device),
                inner.transport.save_state(),
            )
        });
        w.field_bytes(TAG_PARAMS, params);
        w.field_bytes(TAG_ENDPOINTS, endpoints);
        w.field_bytes(TAG_MAILBOX, transport);
        w.field_bool(TAG_FRONTEND_STARTED, self.frontend.is_started());
        w.field_u16(TAG_FRONTEND_COMMAND, self.frontend.command().bits());
        w.finish()
    }

    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        let r = SnapshotReader::parse(bytes, Self::DEVICE_ID)?;
        r.ensure_device_major(Self::DEVICE_VERSION.major)?;

        let mut state = SioState::new(&self.shared.config);
        if let Some(buf) = r.bytes(TAG_PARAMS) {
            state.params.load(decode_params(buf)?);
        }
        if let Some(buf) = r.bytes(TAG_ENDPOINTS) {
            decode_endpoints(buf, &mut state)?;
        }
        let started = r.bool(TAG_FRONTEND_STARTED)?.unwrap_or(false);
        let command = PciCommand::from_bits_retain(r.u16(TAG_FRONTEND_COMMAND)?.unwrap_or(0));

        let transport = r.bytes(TAG_MAILBOX);
        self.shared.mailbox.with_locked(|inner| {
            // The transport load validates before mutating, so a failure here leaves both
            // halves untouched.
            match transport {
                Some(buf) => inner.transport.load_state(buf)?,
                None => inner.transport.reset(),
            }
            inner.device = state;
            SnapshotResult::Ok(())
        })?;
        self.frontend.restore(command, started);
        Ok(())
    }
}
