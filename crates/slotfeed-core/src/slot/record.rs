//! The slot-structured training record.

use super::SlotValues;

/// Reservoir bookkeeping attached to a record while it is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AucRunnerInfo {
    /// Position among the records its reader kept.
    pub record_id: usize,
    /// Reader thread that produced the record.
    pub pool_id: usize,
    /// Reservoir candidate drawn for the record.
    pub replaced_id: usize,
}

/// One training sample.
///
/// Feature values are stored per type in ragged [`SlotValues`]; the span of
/// slot `i` in `uint64_feasigns` holds the values of the `i`-th declared uint64
/// slot, so every value belongs to exactly one slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotRecord {
    /// Instance id (may be empty).
    pub ins_id: String,
    /// Raw line content, kept only when configured.
    pub content: String,
    /// Page-view grouping key decoded from the log key.
    pub search_id: u64,
    /// Ad position inside the page view.
    pub rank: u32,
    /// Match type of the ad.
    pub cmatch: u32,
    /// Integer feature ids per uint64 slot.
    pub uint64_feasigns: SlotValues<u64>,
    /// Float values per float slot.
    pub float_feasigns: SlotValues<f32>,
    /// Per-record float extension area of the configured width.
    pub extension: Vec<f32>,
    /// Candidate drawn from the reservoir, if any.
    pub auc_runner: Option<AucRunnerInfo>,
}

impl SlotRecord {
    /// Creates an empty record with an extension area of `extend_dim` floats.
    #[must_use]
    pub fn with_extension(extend_dim: usize) -> Self {
        Self {
            extension: vec![0.0; extend_dim],
            ..Self::default()
        }
    }

    /// Clears ids and feature values for reuse.
    ///
    /// The extension keeps its width and is zeroed.
    pub fn reset(&mut self, shrink: bool) {
        self.ins_id.clear();
        self.content.clear();
        self.search_id = 0;
        self.rank = 0;
        self.cmatch = 0;
        self.uint64_feasigns.clear(shrink);
        self.float_feasigns.clear(shrink);
        self.extension.iter_mut().for_each(|v| *v = 0.0);
        self.auc_runner = None;
        if shrink {
            self.ins_id.shrink_to_fit();
            self.content.shrink_to_fit();
        }
    }

    /// Total number of feature values across both types.
    #[must_use]
    pub fn feasign_count(&self) -> usize {
        self.uint64_feasigns.total_len() + self.float_feasigns.total_len()
    }

    /// Flattens the record into slot-tagged single values.
    ///
    /// Uint64 values come first, tagged with their uint64 slot index, then
    /// float values tagged with their float slot index.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn feature_items(&self) -> Vec<FeatureItem> {
        let mut items = Vec::with_capacity(self.feasign_count());
        for slot in 0..self.uint64_feasigns.slot_count() {
            items.extend(
                self.uint64_feasigns
                    .slot(slot)
                    .iter()
                    .map(|&v| FeatureItem::new(Feasign::Uint64(v), slot as u16)),
            );
        }
        for slot in 0..self.float_feasigns.slot_count() {
            items.extend(
                self.float_feasigns
                    .slot(slot)
                    .iter()
                    .map(|&v| FeatureItem::new(Feasign::Float(v), slot as u16)),
            );
        }
        items
    }
}

/// A single feature value of either type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Feasign {
    /// Integer feature id.
    Uint64(u64),
    /// Float value.
    Float(f32),
}

/// A feature value tagged with its slot index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureItem {
    /// The value.
    pub sign: Feasign,
    /// Slot index within the value's type.
    pub slot: u16,
}

impl FeatureItem {
    /// Creates a tagged value.
    #[must_use]
    pub const fn new(sign: Feasign, slot: u16) -> Self {
        Self { sign, slot }
    }
}
