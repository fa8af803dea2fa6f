//! Batch packer.
//!
//! Turns a batch of records into per-slot contiguous value buffers with
//! per-record offsets, staged in host memory and copied to a compute device:
//!
//! 1. Each record's used slots are staged record-major in
//!    [`BatchCpuValue`], with per-record totals and per-slot offsets.
//! 2. One upload per staged buffer moves the batch to the [`Device`].
//! 3. Per-slot [`SlotTensor`]s are gathered from the device buffers, reusing
//!    their capacity across batches.
//!
//! Page-view batches additionally carry ranks, match types, ad offsets and the
//! rank-offset matrix.

mod device;
#[cfg(test)]
mod device_tests;
mod host;
mod packer;
#[cfg(test)]
mod packer_tests;
mod pool;
mod rank;

pub use device::{Device, DeviceTensor, HostDevice};
pub use host::BatchCpuValue;
pub use packer::{BatchDeviceValue, BatchPacker, PackedBatch, SlotData, SlotTensor};
pub use pool::{PackerPool, MAX_DEVICES};
pub use rank::{fill_rank_offset, MAX_RANK, RANK_OFFSET_COLS};
