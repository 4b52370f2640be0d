use memory::DmaMemory;
use tracing::warn;

use crate::error::{SioError, SioResult};

pub const MAX_SEGMENTS: u32 = 256;
pub const MAX_MAPPING_BYTES: u64 = 64 * 1024 * 1024;
pub const CONFIG_LEN: usize = 12;

/// Transfer direction of an endpoint, fixed by the parity of its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device reads guest memory.
    ToDevice,
    /// Device writes guest memory.
    FromDevice,
}

impl Direction {
    pub fn for_endpoint(id: u8) -> Self {
        if id & 1 == 1 {
            Direction::FromDevice
        } else {
            Direction::ToDevice
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub base: u64,
    pub len: u64,
}

/// Checks a guest-supplied scatter list and returns its total length.
pub fn validate_segments(segments: &[Segment]) -> SioResult<u64> {
    let count = u32::try_from(segments.len()).unwrap_or(u32::MAX);
    if count > MAX_SEGMENTS {
        return Err(SioError::BadSegmentCount {
            count,
            max: MAX_SEGMENTS,
        });
    }
    let mut total = 0u64;
    for seg in segments {
        if seg.base.checked_add(seg.len).is_none() {
            return Err(SioError::SegmentOverflow {
                base: seg.base,
                len: seg.len,
            });
        }
        total = total.saturating_add(seg.len);
        if total > MAX_MAPPING_BYTES {
            return Err(SioError::MappingTooLarge {
                len: total,
                max: MAX_MAPPING_BYTES,
            });
        }
    }
    Ok(total)
}

/// An established scatter-gather mapping backed by one bounce buffer per segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaMapping {
    pub(crate) tag: u8,
    pub(crate) segments: Vec<Segment>,
    pub(crate) buffers: Vec<Vec<u8>>,
    pub(crate) cursor: u64,
    pub(crate) total: u64,
}

impl DmaMapping {
    /// Pins bounce buffers for `segments`. `ToDevice` buffers are filled from guest memory.
    pub(crate) fn map(
        dma: &dyn DmaMemory,
        direction: Direction,
        tag: u8,
        segments: Vec<Segment>,
    ) -> SioResult<Self> {
        let total = validate_segments(&segments)?;
        let mut buffers = Vec::with_capacity(segments.len());
        for seg in &segments {
            // `validate_segments` bounds every length by MAX_MAPPING_BYTES.
            let mut buf = vec![0u8; seg.len as usize];
            if direction == Direction::ToDevice {
                dma.dma_read(seg.base, &mut buf)?;
            }
            buffers.push(buf);
        }
        Ok(Self {
            tag,
            segments,
            buffers,
            cursor: 0,
            total,
        })
    }

    pub(crate) fn from_parts(
        tag: u8,
        segments: Vec<Segment>,
        buffers: Vec<Vec<u8>>,
        cursor: u64,
    ) -> Option<Self> {
        let total = validate_segments(&segments).ok()?;
        let sizes_match = segments.len() == buffers.len()
            && segments
                .iter()
                .zip(&buffers)
                .all(|(s, b)| s.len == b.len() as u64);
        (sizes_match && cursor <= total).then_some(Self {
            tag,
            segments,
            buffers,
            cursor,
            total,
        })
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn remaining(&self) -> u64 {
        self.total - self.cursor
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.total
    }

    /// Copies from the mapping at the cursor into `dst` and advances the cursor.
    pub(crate) fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = walk_buffers(&mut self.buffers, self.cursor, dst.len(), |buf, off, at, len| {
            dst[at..at + len].copy_from_slice(&buf[off..off + len]);
        });
        self.cursor += n as u64;
        n
    }

    /// Copies `src` into the mapping at the cursor and advances the cursor.
    pub(crate) fn write(&mut self, src: &[u8]) -> usize {
        let n = walk_buffers(&mut self.buffers, self.cursor, src.len(), |buf, off, at, len| {
            buf[off..off + len].copy_from_slice(&src[at..at + len]);
        });
        self.cursor += n as u64;
        n
    }

    /// Writes back the transferred prefix of a `FromDevice` mapping. Faults are logged and the
    /// rest of the flush continues.
    pub(crate) fn flush(&self, dma: &dyn DmaMemory, endpoint: u8) {
        let mut left = self.cursor;
        for (seg, buf) in self.segments.iter().zip(&self.buffers) {
            if left == 0 {
                break;
            }
            let access_len = left.min(seg.len) as usize;
            if let Err(err) = dma.dma_write(seg.base, &buf[..access_len]) {
                warn!(endpoint, base = seg.base, %err, "SIO: failed to flush DMA buffer");
            }
            left -= access_len as u64;
        }
    }
}

/// Visits the buffer chunks covering `want` bytes from `pos`. The callback receives the
/// segment buffer, the offset inside it, the offset into the caller's slice and the length.
fn walk_buffers(
    buffers: &mut [Vec<u8>],
    pos: u64,
    want: usize,
    mut f: impl FnMut(&mut Vec<u8>, usize, usize, usize),
) -> usize {
    let mut skip = pos;
    let mut done = 0usize;
    for buf in buffers.iter_mut() {
        if done == want {
            break;
        }
        let len = buf.len() as u64;
        if skip >= len {
            skip -= len;
            continue;
        }
        let off = skip as usize;
        skip = 0;
        let chunk = (buf.len() - off).min(want - done);
        f(buf, off, done, chunk);
        done += chunk;
    }
    done
}

/// Bookkeeping for one DMA endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointState {
    pub(crate) id: u8,
    pub(crate) direction: Direction,
    pub(crate) config: [u8; CONFIG_LEN],
    pub(crate) mapping: Option<DmaMapping>,
}

impl EndpointState {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            direction: Direction::for_endpoint(id),
            config: [0; CONFIG_LEN],
            mapping: None,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn config(&self) -> &[u8; CONFIG_LEN] {
        &self.config
    }

    pub fn mapping(&self) -> Option<&DmaMapping> {
        self.mapping.as_ref()
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }
}
