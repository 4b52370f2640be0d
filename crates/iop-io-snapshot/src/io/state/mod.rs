//! Save/restore of device register state.
//!
//! A snapshot is a fixed header (magic, format version, device id, device version) followed by
//! tagged fields written in ascending tag order, so saving the same state twice yields identical
//! bytes. Readers ignore tags they do not know, which lets a device grow new fields within a
//! major version.

mod version;

pub use version::{
    codec, SnapshotError, SnapshotHeader, SnapshotReader, SnapshotResult, SnapshotVersion,
    SnapshotWriter,
};

/// Implemented by every device whose state survives a save/restore cycle.
///
/// `load_state` either applies the whole snapshot or returns an error with the device unchanged.
pub trait IoSnapshot {
    /// Four-byte tag identifying the device kind in the header.
    const DEVICE_ID: [u8; 4];
    /// Bumped in the major component when old snapshots can no longer be read.
    const DEVICE_VERSION: SnapshotVersion;

    fn save_state(&self) -> Vec<u8>;
    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()>;
}
