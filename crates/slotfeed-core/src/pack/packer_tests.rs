//! Tests for `packer` module - host staging, transfer and slot tensors.

use super::*;
use crate::config::SlotConfig;
use crate::slot::{PvInstance, SlotRecord, SlotSchema, SlotType};

fn schema() -> SlotSchema {
    SlotSchema::from_config(&[
        SlotConfig::ragged("click", SlotType::Uint64),
        SlotConfig::ragged("skip", SlotType::Uint64).unused(),
        SlotConfig::ragged("ctr", SlotType::Float),
        SlotConfig::ragged("title", SlotType::Uint64),
    ])
    .expect("schema")
}

fn record(ins_id: &str, click: &[u64], skip: &[u64], title: &[u64], ctr: &[f32]) -> SlotRecord {
    let mut r = SlotRecord {
        ins_id: ins_id.to_string(),
        ..SlotRecord::default()
    };
    r.uint64_feasigns
        .add_slot_feasigns(&[click.to_vec(), skip.to_vec(), title.to_vec()]);
    r.float_feasigns.add_slot_feasigns(&[ctr.to_vec()]);
    r
}

fn click_batch() -> Vec<SlotRecord> {
    vec![
        record("a", &[1], &[50], &[7, 8], &[0.5]),
        record("b", &[], &[51], &[], &[]),
        record("c", &[1, 1], &[52], &[9], &[0.25, 0.75]),
    ]
}

#[test]
fn test_click_slot_packs_into_one_buffer() {
    // Arrange
    let schema = schema();
    let mut packer = BatchPacker::new(HostDevice::new(0), &schema);

    // Act
    let n = packer.pack_instance(&click_batch()).expect("pack");

    // Assert
    assert_eq!(n, 3);
    let click = packer.batch().slot("click").expect("click");
    assert_eq!(click.data.as_uint64(), Some(&[1u64, 1, 1][..]));
    assert_eq!(click.offsets, vec![0, 1, 1, 3]);
    assert_eq!(click.dims, vec![3, 1]);
}

#[test]
fn test_every_used_slot_gets_a_tensor() {
    let schema = schema();
    let mut packer = BatchPacker::new(HostDevice::new(0), &schema);

    packer.pack_instance(&click_batch()).expect("pack");
    let batch = packer.batch();

    let names: Vec<&str> = batch.slots().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["click", "ctr", "title"]);
    let title = batch.slot("title").expect("title");
    assert_eq!(title.data.as_uint64(), Some(&[7u64, 8, 9][..]));
    assert_eq!(title.offsets, vec![0, 2, 2, 3]);
    let ctr = batch.slot("ctr").expect("ctr");
    assert_eq!(ctr.data.as_float(), Some(&[0.5f32, 0.25, 0.75][..]));
    assert_eq!(ctr.record_span(2), 1..3);
    assert!(batch.slot("skip").is_err());
    assert_eq!(batch.ins_ids(), &["a", "b", "c"]);
}

#[test]
fn test_host_staging_layout() {
    let schema = schema();
    let mut packer = BatchPacker::new(HostDevice::new(0), &schema);

    packer.pack_instance(&click_batch()).expect("pack");
    let cpu = packer.cpu_value();

    // Two used uint64 slots: click and title (skip is unused).
    assert_eq!(cpu.uint64_lens, vec![0, 3, 3, 6]);
    assert_eq!(cpu.uint64_offset, vec![0, 1, 3, 0, 0, 0, 0, 2, 3]);
    assert_eq!(cpu.uint64_keys, vec![1, 7, 8, 1, 1, 9]);
    assert_eq!(cpu.float_lens, vec![0, 1, 1, 3]);
    assert!(cpu.ad_offset.is_empty());
}

#[test]
fn test_one_upload_per_buffer() {
    let schema = schema();
    let mut packer = BatchPacker::new(HostDevice::new(0), &schema);

    packer.pack_instance(&click_batch()).expect("pack");

    assert_eq!(packer.device().transfers(), 6);
    assert_eq!(packer.device().syncs(), 1);
}

#[test]
fn test_empty_slot_yields_empty_buffer_with_zero_offsets() {
    let schema = schema();
    let mut packer = BatchPacker::new(HostDevice::new(0), &schema);
    let records = vec![
        record("x", &[], &[], &[1], &[]),
        record("y", &[], &[], &[2], &[]),
    ];

    packer.pack_instance(&records).expect("pack");

    let click = packer.batch().slot("click").expect("click");
    assert!(click.data.is_empty());
    assert_eq!(click.offsets, vec![0, 0, 0]);
    assert_eq!(click.dims, vec![0, 1]);
}

#[test]
fn test_zero_records_is_exhaustion() {
    let schema = schema();
    let mut packer = BatchPacker::new(HostDevice::new(0), &schema);
    packer.pack_instance(&click_batch()).expect("pack");

    let n = packer.pack_instance(&[]).expect("pack");

    assert_eq!(n, 0);
    assert_eq!(packer.batch().ins_num(), 0);
    assert!(packer.batch().slots().iter().all(|t| t.data.is_empty()));
}

#[test]
fn test_device_buffers_reused_across_batches() {
    let schema = schema();
    let mut packer = BatchPacker::new(HostDevice::new(0), &schema);
    packer.pack_instance(&click_batch()).expect("pack");
    let grown = packer.value().uint64_keys.grow_count();

    packer.pack_instance(&click_batch()[..1]).expect("pack");

    assert_eq!(packer.value().uint64_keys.grow_count(), grown);
    assert_eq!(packer.value().uint64_keys.len(), 3);
}

#[test]
fn test_records_missing_trailing_slots_pack_as_empty() {
    let schema = schema();
    let mut packer = BatchPacker::new(HostDevice::new(0), &schema);
    let mut short = SlotRecord::default();
    short.uint64_feasigns.add_values(&[4]);

    packer.pack_instance(&[short]).expect("pack");

    let batch = packer.batch();
    assert_eq!(batch.slot("click").expect("click").data.as_uint64(), Some(&[4u64][..]));
    assert!(batch.slot("title").expect("title").data.is_empty());
    assert!(batch.slot("ctr").expect("ctr").data.is_empty());
}

#[test]
fn test_dense_slot_resolves_inductive_dimension() {
    // Arrange
    let schema = SlotSchema::from_config(&[SlotConfig::dense(
        "embed",
        SlotType::Float,
        vec![-1, 2],
    )])
    .expect("schema");
    let mut packer = BatchPacker::new(HostDevice::new(0), &schema);
    let records: Vec<SlotRecord> = (0..3)
        .map(|i| {
            let mut r = SlotRecord::default();
            r.float_feasigns.add_values(&[i as f32, i as f32 + 0.5]);
            r
        })
        .collect();

    // Act
    packer.pack_instance(&records).expect("pack");

    // Assert
    let embed = packer.batch().slot("embed").expect("embed");
    assert_eq!(embed.dims, vec![3, 2]);
    assert_eq!(embed.data.len(), 6);
}

#[test]
fn test_pv_batch_carries_rank_and_ad_offsets() {
    // Arrange
    let schema = schema();
    let mut packer = BatchPacker::new(HostDevice::new(0), &schema);
    let mut first = PvInstance::new();
    let mut ad = record("p0", &[1], &[], &[], &[]);
    ad.rank = 1;
    ad.cmatch = 222;
    first.merge_instance(ad);
    let mut ad = record("p1", &[2], &[], &[], &[]);
    ad.rank = 2;
    ad.cmatch = 222;
    first.merge_instance(ad);
    let mut second = PvInstance::new();
    second.merge_instance(record("q0", &[3], &[], &[], &[]));

    // Act
    let n = packer.pack_pv_instance(&[first, second]).expect("pack");

    // Assert
    let batch = packer.batch();
    assert_eq!(n, 3);
    assert_eq!(batch.ins_num(), 3);
    assert_eq!(batch.pv_num(), 2);
    assert_eq!(batch.ad_offset(), &[0, 2, 3]);
    assert_eq!(batch.ins_ids(), &["p0", "p1", "q0"]);
    assert_eq!(batch.rank_offset().len(), 3 * batch.rank_offset_cols());
    assert_eq!(&batch.rank_offset()[..5], &[1, 1, 0, 2, 1]);
    assert!(batch.rank_offset()[2 * RANK_OFFSET_COLS..].iter().all(|&v| v == -1));
    let click = batch.slot("click").expect("click");
    assert_eq!(click.data.as_uint64(), Some(&[1u64, 2, 3][..]));
}

#[test]
fn test_plain_pack_after_pv_pack_clears_pv_metadata() {
    let schema = schema();
    let mut packer = BatchPacker::new(HostDevice::new(0), &schema);
    let mut pv = PvInstance::new();
    pv.merge_instance(record("p", &[1], &[], &[], &[]));
    packer.pack_pv_instance(&[pv]).expect("pack");

    packer.pack_instance(&click_batch()).expect("pack");

    assert_eq!(packer.batch().pv_num(), 0);
    assert!(packer.batch().rank_offset().is_empty());
    assert!(packer.batch().ad_offset().is_empty());
}

#[test]
fn test_extension_areas_pack_row_major() {
    // Arrange
    let schema = schema();
    let mut packer = BatchPacker::new(HostDevice::new(0), &schema);
    let mut records = click_batch();
    for (i, r) in records.iter_mut().enumerate() {
        r.extension = vec![i as f32, 10.0 + i as f32];
    }

    // Act
    packer.pack_instance(&records).expect("pack");

    // Assert
    let batch = packer.batch();
    assert_eq!(batch.extension_dim(), 2);
    assert_eq!(batch.extension(), &[0.0, 10.0, 1.0, 11.0, 2.0, 12.0]);
}

#[test]
fn test_records_without_extension_pack_none() {
    let schema = schema();
    let mut packer = BatchPacker::new(HostDevice::new(0), &schema);
    let mut records = click_batch();
    records[0].extension = vec![1.0];
    packer.pack_instance(&records).expect("pack");

    packer.pack_instance(&click_batch()).expect("pack");

    assert!(packer.batch().extension().is_empty());
    assert_eq!(packer.batch().extension_dim(), 0);
}
