mod common;

use common::{msg, Harness};
use iop_io_snapshot::io::state::{IoSnapshot, SnapshotError, SnapshotReader, SnapshotWriter};
use iop_sio::message::{op, DMA_COMPLETE_PARAM};
use iop_sio::{PciCommand, Sio};
use pretty_assertions::assert_eq;

const EP: u8 = 7;

#[test]
fn mid_transfer_mapping_resumes_after_restore() {
    let h = Harness::with_segment_base();
    h.write_mem(0x10000 + 2 * 12, &[0xc0; 12]);
    h.request(msg(EP, 0, op::CONFIG_SHIM, 0, 2)).unwrap();
    h.write_descriptor(100, &[(0x1000, 0x8), (0x2000, 0x8)]);
    h.send(msg(EP, 0x44, op::START_DMA, 0, 100));
    // Leave the ACK queued so it travels with the snapshot.

    let ep = h.sio.endpoint(EP).unwrap();
    ep.write(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap();
    let snap = h.sio.save_state();

    let mut restored = Harness::new();
    restored.sio.load_state(&snap).unwrap();
    assert_eq!(restored.sio.save_state(), snap);
    assert_eq!(restored.sio.param(1), Ok(0x10));

    let ep = restored.sio.endpoint(EP).unwrap();
    assert_eq!(ep.config(), [0xc0; 12]);
    assert_eq!(ep.remaining(), 6);
    assert_eq!(restored.recv(), Some(msg(EP, 0x44, op::ACK, 0, 0)));

    ep.write(&[11, 12, 13, 14, 15, 16]).unwrap();
    assert_eq!(
        restored.recv(),
        Some(msg(EP, 0x44, op::DMA_COMPLETE, DMA_COMPLETE_PARAM, 16))
    );
    assert_eq!(restored.read_mem(0x1000, 8), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(restored.read_mem(0x2000, 8), vec![9, 10, 11, 12, 13, 14, 15, 16]);
}

#[test]
fn started_front_end_is_restarted_on_restore() {
    let mut h = Harness::new();
    h.sio.start();
    let snap = h.sio.save_state();

    let mut restored = Harness::new();
    assert!(!restored.sio.frontend().bus_master_enabled());
    restored.sio.load_state(&snap).unwrap();
    assert!(restored.sio.frontend().is_started());
    assert!(restored
        .sio
        .frontend()
        .command()
        .contains(PciCommand::MEMORY_SPACE | PciCommand::BUS_MASTER));
}

#[test]
fn truncated_snapshot_never_panics() {
    let h = Harness::with_segment_base();
    h.write_descriptor(0, &[(0x1000, 0x20)]);
    h.start_dma(EP, 1, 0).unwrap();
    let snap = h.sio.save_state();

    let mut restored = Harness::new();
    for len in 0..snap.len() {
        // Prefixes ending on a field boundary are valid snapshots with fields missing.
        let _ = restored.sio.load_state(&snap[..len]);
    }
    assert!(restored.sio.load_state(&snap[..snap.len() - 1]).is_err());
    restored.sio.load_state(&snap).unwrap();
    assert!(restored.sio.endpoint(EP).unwrap().is_mapped());
}

#[test]
fn inconsistent_mapping_is_rejected() {
    const TAG_ENDPOINTS: u16 = 2;

    // One record: endpoint 7, zero config, mapped, tag 0, cursor 9 past a 4-byte segment.
    let mut rec = vec![1, 0, 0, 0, EP];
    rec.extend_from_slice(&[0; 12]);
    rec.push(1);
    rec.push(0);
    rec.extend_from_slice(&9u64.to_le_bytes());
    rec.extend_from_slice(&1u32.to_le_bytes());
    rec.extend_from_slice(&0x1000u64.to_le_bytes());
    rec.extend_from_slice(&4u64.to_le_bytes());
    rec.extend_from_slice(&1u32.to_le_bytes());
    rec.extend_from_slice(&4u32.to_le_bytes());
    rec.extend_from_slice(&[0; 4]);

    let mut w = SnapshotWriter::new(Sio::DEVICE_ID, Sio::DEVICE_VERSION);
    w.field_bytes(TAG_ENDPOINTS, rec);

    let mut h = Harness::new();
    assert_eq!(
        h.sio.load_state(&w.finish()),
        Err(SnapshotError::InvalidFieldEncoding("sio dma mapping"))
    );
}

#[test]
fn endpoint_id_beyond_count_is_rejected() {
    const TAG_ENDPOINTS: u16 = 2;

    let mut rec = vec![1, 0, 0, 0, 0xF0];
    rec.extend_from_slice(&[0; 12]);
    rec.push(0);

    let mut w = SnapshotWriter::new(Sio::DEVICE_ID, Sio::DEVICE_VERSION);
    w.field_bytes(TAG_ENDPOINTS, rec);

    let mut h = Harness::new();
    assert_eq!(
        h.sio.load_state(&w.finish()),
        Err(SnapshotError::InvalidFieldEncoding("sio endpoint id"))
    );
}

#[test]
fn snapshot_header_identifies_device() {
    let h = Harness::new();
    let snap = h.sio.save_state();
    let r = SnapshotReader::parse(&snap, *b"ASIO").unwrap();
    assert_eq!(r.header().device_version, Sio::DEVICE_VERSION);
    assert_eq!(r.bool(4).unwrap(), Some(false));
}
