//! Host staging buffers.

use crate::slot::{PvInstance, SlotRecord};

/// Host-side staging of one batch.
///
/// Layout, for `num` records and `U` used uint64 slots:
///
/// - `uint64_lens`: `num + 1` prefix sums of each record's used uint64 values.
/// - `uint64_offset`: `num * (U + 1)` entries, row `r` holds the cumulative
///   start of each used slot inside record `r`'s values.
/// - `uint64_keys`: every record's used uint64 values, record-major.
///
/// The float fields mirror this for used float slots. `rank`, `cmatch` and
/// `ad_offset` are filled for page-view batches only. `extension` holds each
/// record's extension area, record-major, when records carry one.
#[derive(Debug, Clone, Default)]
pub struct BatchCpuValue {
    /// Prefix sums of per-record uint64 totals.
    pub uint64_lens: Vec<u32>,
    /// Concatenated uint64 values.
    pub uint64_keys: Vec<u64>,
    /// Per-record per-slot uint64 offsets.
    pub uint64_offset: Vec<u32>,
    /// Prefix sums of per-record float totals.
    pub float_lens: Vec<u32>,
    /// Concatenated float values.
    pub float_keys: Vec<f32>,
    /// Per-record per-slot float offsets.
    pub float_offset: Vec<u32>,
    /// Rank of every ad.
    pub rank: Vec<i32>,
    /// Match type of every ad.
    pub cmatch: Vec<i32>,
    /// First ad index of every page view, plus the total.
    pub ad_offset: Vec<i32>,
    /// Concatenated record extension areas.
    pub extension: Vec<f32>,
}

impl BatchCpuValue {
    /// Empties every buffer, keeping capacity.
    pub fn clear(&mut self) {
        self.uint64_lens.clear();
        self.uint64_keys.clear();
        self.uint64_offset.clear();
        self.float_lens.clear();
        self.float_keys.clear();
        self.float_offset.clear();
        self.rank.clear();
        self.cmatch.clear();
        self.ad_offset.clear();
        self.extension.clear();
    }

    /// Stages the used slots of `records`.
    ///
    /// `uint64_slots` and `float_slots` list, in used order, each used slot's
    /// index inside the record's typed values.
    pub fn stage<'a, I>(&mut self, records: I, uint64_slots: &[usize], float_slots: &[usize])
    where
        I: IntoIterator<Item = &'a SlotRecord>,
    {
        self.uint64_lens.push(0);
        self.float_lens.push(0);
        for record in records {
            stage_record(
                &record.uint64_feasigns,
                uint64_slots,
                &mut self.uint64_keys,
                &mut self.uint64_offset,
                &mut self.uint64_lens,
            );
            stage_record(
                &record.float_feasigns,
                float_slots,
                &mut self.float_keys,
                &mut self.float_offset,
                &mut self.float_lens,
            );
            self.extension.extend_from_slice(&record.extension);
        }
    }

    /// Stages page-view metadata for the flattened ads of `pvs`.
    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    pub fn stage_pv(&mut self, pvs: &[PvInstance]) {
        let mut index = 0i32;
        for pv in pvs {
            self.ad_offset.push(index);
            for ad in &pv.ads {
                self.rank.push(ad.rank as i32);
                self.cmatch.push(ad.cmatch as i32);
            }
            index += pv.ads.len() as i32;
        }
        self.ad_offset.push(index);
    }
}

#[allow(clippy::cast_possible_truncation)]
fn stage_record<T: Copy>(
    values: &crate::slot::SlotValues<T>,
    slots: &[usize],
    keys: &mut Vec<T>,
    offset: &mut Vec<u32>,
    lens: &mut Vec<u32>,
) {
    let mut within = 0u32;
    offset.push(0);
    for &slot in slots {
        if slot < values.slot_count() {
            let span = values.slot(slot);
            keys.extend_from_slice(span);
            within += span.len() as u32;
        }
        offset.push(within);
    }
    let last = lens.last().copied().unwrap_or(0);
    lens.push(last + within);
}
