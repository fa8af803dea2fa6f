//! Batch packer: records to per-slot device tensors.

use std::time::{Duration, Instant};

use super::device::{Device, DeviceTensor};
use super::host::BatchCpuValue;
use super::rank::{fill_rank_offset, RANK_OFFSET_COLS};
use crate::error::{Error, Result};
use crate::slot::{PvInstance, SlotRecord, SlotSchema, SlotType, UsedSlotInfo};

/// Device copies of the staged host buffers.
#[derive(Debug, Clone, Default)]
pub struct BatchDeviceValue {
    /// See [`BatchCpuValue::uint64_lens`].
    pub uint64_lens: DeviceTensor<u32>,
    /// See [`BatchCpuValue::uint64_keys`].
    pub uint64_keys: DeviceTensor<u64>,
    /// See [`BatchCpuValue::uint64_offset`].
    pub uint64_offset: DeviceTensor<u32>,
    /// See [`BatchCpuValue::float_lens`].
    pub float_lens: DeviceTensor<u32>,
    /// See [`BatchCpuValue::float_keys`].
    pub float_keys: DeviceTensor<f32>,
    /// See [`BatchCpuValue::float_offset`].
    pub float_offset: DeviceTensor<u32>,
    /// See [`BatchCpuValue::rank`].
    pub rank: DeviceTensor<i32>,
    /// See [`BatchCpuValue::cmatch`].
    pub cmatch: DeviceTensor<i32>,
    /// See [`BatchCpuValue::ad_offset`].
    pub ad_offset: DeviceTensor<i32>,
    /// See [`BatchCpuValue::extension`].
    pub extension: DeviceTensor<f32>,
}

/// Values of one slot tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotData {
    /// Integer feature ids.
    Uint64(Vec<u64>),
    /// Float values.
    Float(Vec<f32>),
}

impl SlotData {
    fn empty(slot_type: SlotType) -> Self {
        match slot_type {
            SlotType::Uint64 => Self::Uint64(Vec::new()),
            SlotType::Float => Self::Float(Vec::new()),
        }
    }

    /// Integer values, `None` for a float slot.
    #[must_use]
    pub fn as_uint64(&self) -> Option<&[u64]> {
        match self {
            Self::Uint64(v) => Some(v),
            Self::Float(_) => None,
        }
    }

    /// Float values, `None` for an integer slot.
    #[must_use]
    pub fn as_float(&self) -> Option<&[f32]> {
        match self {
            Self::Float(v) => Some(v),
            Self::Uint64(_) => None,
        }
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Uint64(v) => v.len(),
            Self::Float(v) => v.len(),
        }
    }

    /// True when the slot holds no value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output tensor of one used slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotTensor {
    /// Slot name.
    pub name: String,
    /// Values of every record, record-major.
    pub data: SlotData,
    /// `ins_num + 1` offsets; record `r` spans `offsets[r]..offsets[r + 1]`.
    pub offsets: Vec<u32>,
    /// Tensor shape: `[total, 1]` for ragged slots, the declared shape with
    /// the inductive dimension resolved for dense slots.
    pub dims: Vec<usize>,
}

impl SlotTensor {
    fn new(info: &UsedSlotInfo) -> Self {
        Self {
            name: info.name.clone(),
            data: SlotData::empty(info.slot_type),
            offsets: Vec::new(),
            dims: Vec::new(),
        }
    }

    /// Values of record `r`.
    #[must_use]
    pub fn record_span(&self, r: usize) -> std::ops::Range<usize> {
        self.offsets[r] as usize..self.offsets[r + 1] as usize
    }
}

/// Result of the last pack.
#[derive(Debug, Clone, Default)]
pub struct PackedBatch {
    ins_num: usize,
    pv_num: usize,
    slots: Vec<SlotTensor>,
    rank_offset: Vec<i32>,
    ad_offset: Vec<i32>,
    extension: Vec<f32>,
    extension_dim: usize,
    ins_ids: Vec<String>,
}

impl PackedBatch {
    /// Records in the batch.
    #[must_use]
    pub fn ins_num(&self) -> usize {
        self.ins_num
    }

    /// Page views in the batch (0 for plain batches).
    #[must_use]
    pub fn pv_num(&self) -> usize {
        self.pv_num
    }

    /// Tensor of a used slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SlotNotFound`] for unknown or unused slots.
    pub fn slot(&self, name: &str) -> Result<&SlotTensor> {
        self.slots
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::SlotNotFound(name.to_string()))
    }

    /// Tensors of every used slot, in used order.
    #[must_use]
    pub fn slots(&self) -> &[SlotTensor] {
        &self.slots
    }

    /// Row-major `ins_num x RANK_OFFSET_COLS` matrix; empty for plain batches.
    #[must_use]
    pub fn rank_offset(&self) -> &[i32] {
        &self.rank_offset
    }

    /// Columns of [`rank_offset`](Self::rank_offset).
    #[must_use]
    pub const fn rank_offset_cols(&self) -> usize {
        RANK_OFFSET_COLS
    }

    /// First ad of every page view followed by `ins_num`; empty for plain
    /// batches.
    #[must_use]
    pub fn ad_offset(&self) -> &[i32] {
        &self.ad_offset
    }

    /// Row-major `ins_num x extension_dim` record extension values; empty
    /// when records carry no extension area.
    #[must_use]
    pub fn extension(&self) -> &[f32] {
        &self.extension
    }

    /// Columns of [`extension`](Self::extension).
    #[must_use]
    pub fn extension_dim(&self) -> usize {
        self.extension_dim
    }

    /// Instance ids in batch order.
    #[must_use]
    pub fn ins_ids(&self) -> &[String] {
        &self.ins_ids
    }
}

/// Packs record batches for one device.
///
/// Owned by exactly one consumer thread; see [`super::PackerPool`].
pub struct BatchPacker<D: Device> {
    device: D,
    used_slots: Vec<UsedSlotInfo>,
    uint64_slots: Vec<usize>,
    float_slots: Vec<usize>,
    buf: BatchCpuValue,
    value: BatchDeviceValue,
    batch: PackedBatch,
    pack_time: Duration,
    trans_time: Duration,
}

impl<D: Device> BatchPacker<D> {
    /// Creates a packer for the used slots of `schema`.
    #[must_use]
    pub fn new(device: D, schema: &SlotSchema) -> Self {
        let used_slots = schema.used_slots().to_vec();
        let uint64_slots = used_slots
            .iter()
            .filter(|s| s.slot_type == SlotType::Uint64)
            .map(|s| s.slot_value_idx)
            .collect();
        let float_slots = used_slots
            .iter()
            .filter(|s| s.slot_type == SlotType::Float)
            .map(|s| s.slot_value_idx)
            .collect();
        let batch = PackedBatch {
            slots: used_slots.iter().map(SlotTensor::new).collect(),
            ..PackedBatch::default()
        };
        Self {
            device,
            used_slots,
            uint64_slots,
            float_slots,
            buf: BatchCpuValue::default(),
            value: BatchDeviceValue::default(),
            batch,
            pack_time: Duration::ZERO,
            trans_time: Duration::ZERO,
        }
    }

    /// Packs a plain batch. Returns the number of records; 0 means the
    /// source is exhausted and leaves an empty batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if a transfer fails; the previous batch is
    /// then no longer valid.
    pub fn pack_instance(&mut self, records: &[SlotRecord]) -> Result<usize> {
        let start = Instant::now();
        self.buf.clear();
        self.batch.pv_num = 0;
        self.batch.rank_offset.clear();
        self.batch.ad_offset.clear();
        self.buf.stage(records, &self.uint64_slots, &self.float_slots);
        self.pack_time += start.elapsed();

        self.finish(records)
    }

    /// Packs a page-view batch: the ads of every page view, in order, plus
    /// rank and ad offsets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if a transfer fails.
    pub fn pack_pv_instance(&mut self, pvs: &[PvInstance]) -> Result<usize> {
        let start = Instant::now();
        let ads: usize = pvs.iter().map(PvInstance::len).sum();
        self.buf.clear();
        self.buf.stage(
            pvs.iter().flat_map(|pv| pv.ads.iter()),
            &self.uint64_slots,
            &self.float_slots,
        );
        self.buf.stage_pv(pvs);
        self.batch.pv_num = pvs.len();
        self.pack_time += start.elapsed();

        let ins_ids = pvs
            .iter()
            .flat_map(|pv| pv.ads.iter().map(|r| r.ins_id.as_str()));
        self.finish_staged(ads, ins_ids)?;

        let start = Instant::now();
        fill_rank_offset(
            self.value.rank.as_slice(),
            self.value.cmatch.as_slice(),
            self.value.ad_offset.as_slice(),
            &mut self.batch.rank_offset,
        );
        self.batch.ad_offset.clear();
        self.batch
            .ad_offset
            .extend_from_slice(self.value.ad_offset.as_slice());
        self.pack_time += start.elapsed();
        Ok(ads)
    }

    fn finish(&mut self, records: &[SlotRecord]) -> Result<usize> {
        let ins_ids = records.iter().map(|r| r.ins_id.as_str());
        self.finish_staged(records.len(), ins_ids)?;
        Ok(records.len())
    }

    fn finish_staged<'a>(
        &mut self,
        ins_num: usize,
        ins_ids: impl Iterator<Item = &'a str>,
    ) -> Result<()> {
        self.transfer()?;

        let start = Instant::now();
        self.batch.ins_num = ins_num;
        self.batch.ins_ids.clear();
        self.batch.ins_ids.extend(ins_ids.map(str::to_string));
        self.batch.extension.clear();
        self.batch.extension_dim = 0;
        if !self.buf.extension.is_empty() && ins_num > 0 {
            self.batch
                .extension
                .extend_from_slice(self.value.extension.as_slice());
            self.batch.extension_dim = self.buf.extension.len() / ins_num;
        }
        self.build_slot_tensors(ins_num);
        self.pack_time += start.elapsed();
        Ok(())
    }

    fn transfer(&mut self) -> Result<()> {
        let start = Instant::now();
        let device = &mut self.device;
        let buf = &self.buf;
        let value = &mut self.value;

        device.upload(&buf.uint64_lens, &mut value.uint64_lens)?;
        device.upload(&buf.uint64_keys, &mut value.uint64_keys)?;
        device.upload(&buf.uint64_offset, &mut value.uint64_offset)?;
        device.upload(&buf.float_lens, &mut value.float_lens)?;
        device.upload(&buf.float_keys, &mut value.float_keys)?;
        device.upload(&buf.float_offset, &mut value.float_offset)?;
        if !buf.ad_offset.is_empty() {
            device.upload(&buf.rank, &mut value.rank)?;
            device.upload(&buf.cmatch, &mut value.cmatch)?;
            device.upload(&buf.ad_offset, &mut value.ad_offset)?;
        }
        if !buf.extension.is_empty() {
            device.upload(&buf.extension, &mut value.extension)?;
        }
        device.synchronize()?;

        self.trans_time += start.elapsed();
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn build_slot_tensors(&mut self, ins_num: usize) {
        let uint64_cols = self.uint64_slots.len() + 1;
        let float_cols = self.float_slots.len() + 1;
        let (mut uint64_k, mut float_k) = (0usize, 0usize);

        for (info, tensor) in self.used_slots.iter().zip(self.batch.slots.iter_mut()) {
            tensor.offsets.clear();
            tensor.offsets.push(0);
            match (&mut tensor.data, info.slot_type) {
                (SlotData::Uint64(out), SlotType::Uint64) => {
                    out.clear();
                    gather_slot(
                        self.value.uint64_keys.as_slice(),
                        self.value.uint64_lens.as_slice(),
                        self.value.uint64_offset.as_slice(),
                        uint64_cols,
                        uint64_k,
                        ins_num,
                        out,
                        &mut tensor.offsets,
                    );
                    uint64_k += 1;
                }
                (SlotData::Float(out), SlotType::Float) => {
                    out.clear();
                    gather_slot(
                        self.value.float_keys.as_slice(),
                        self.value.float_lens.as_slice(),
                        self.value.float_offset.as_slice(),
                        float_cols,
                        float_k,
                        ins_num,
                        out,
                        &mut tensor.offsets,
                    );
                    float_k += 1;
                }
                _ => unreachable!("slot tensor type follows the schema"),
            }

            let total = tensor.data.len();
            tensor.dims.clear();
            if info.dense {
                tensor.dims.extend(info.local_shape.iter().enumerate().map(|(i, &d)| {
                    if Some(i) == info.inductive_shape_index {
                        total / info.total_dims_without_inductive.max(1)
                    } else {
                        d as usize
                    }
                }));
            } else {
                tensor.dims.extend([total, 1]);
            }
        }
    }

    /// The last packed batch.
    #[must_use]
    pub fn batch(&self) -> &PackedBatch {
        &self.batch
    }

    /// Staged host buffers of the last batch.
    #[must_use]
    pub fn cpu_value(&self) -> &BatchCpuValue {
        &self.buf
    }

    /// Device buffers of the last batch.
    #[must_use]
    pub fn value(&self) -> &BatchDeviceValue {
        &self.value
    }

    /// The owned device.
    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Total time spent staging and building tensors.
    #[must_use]
    pub fn pack_time(&self) -> Duration {
        self.pack_time
    }

    /// Total time spent in device transfers.
    #[must_use]
    pub fn trans_time(&self) -> Duration {
        self.trans_time
    }

    /// Clears the last batch and the timers for reuse by a new consumer.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.batch.ins_num = 0;
        self.batch.pv_num = 0;
        self.batch.ins_ids.clear();
        self.batch.rank_offset.clear();
        self.batch.ad_offset.clear();
        self.batch.extension.clear();
        self.batch.extension_dim = 0;
        for tensor in &mut self.batch.slots {
            tensor.offsets.clear();
            tensor.dims.clear();
            match &mut tensor.data {
                SlotData::Uint64(v) => v.clear(),
                SlotData::Float(v) => v.clear(),
            }
        }
        self.pack_time = Duration::ZERO;
        self.trans_time = Duration::ZERO;
    }
}

impl<D: Device> Drop for BatchPacker<D> {
    fn drop(&mut self) {
        tracing::debug!(
            device = self.device.id(),
            pack_ms = self.pack_time.as_millis() as u64,
            trans_ms = self.trans_time.as_millis() as u64,
            "Batch packer released"
        );
    }
}

impl<D: Device + std::fmt::Debug> std::fmt::Debug for BatchPacker<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchPacker")
            .field("device", &self.device)
            .field("ins_num", &self.batch.ins_num)
            .field("pv_num", &self.batch.pv_num)
            .finish_non_exhaustive()
    }
}

/// Copies slot `k` of every record out of the record-major device buffer.
#[allow(clippy::too_many_arguments, clippy::cast_possible_truncation)]
fn gather_slot<T: Copy>(
    keys: &[T],
    lens: &[u32],
    offset: &[u32],
    cols: usize,
    k: usize,
    ins_num: usize,
    out: &mut Vec<T>,
    offsets: &mut Vec<u32>,
) {
    for r in 0..ins_num {
        let base = lens[r] as usize;
        let row = r * cols;
        let start = base + offset[row + k] as usize;
        let end = base + offset[row + k + 1] as usize;
        out.extend_from_slice(&keys[start..end]);
        offsets.push(out.len() as u32);
    }
}
