//! Page-view grouping.

use rustc_hash::FxHashMap;

use super::SlotRecord;

/// Records that share one search context, kept in arrival order.
#[derive(Debug, Clone, Default)]
pub struct PvInstance {
    /// Ads of the page view.
    pub ads: Vec<SlotRecord>,
}

impl PvInstance {
    /// Creates an empty page view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A page view holding only `record`.
    #[must_use]
    pub fn single(record: SlotRecord) -> Self {
        Self { ads: vec![record] }
    }

    /// Appends an ad to the page view.
    pub fn merge_instance(&mut self, record: SlotRecord) {
        self.ads.push(record);
    }

    /// Search id shared by the ads, 0 for an empty page view.
    #[must_use]
    pub fn search_id(&self) -> u64 {
        self.ads.first().map_or(0, |r| r.search_id)
    }

    /// Number of ads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ads.len()
    }

    /// True when the page view has no ads.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ads.is_empty()
    }

    /// Dissolves the page view back into records.
    #[must_use]
    pub fn into_records(self) -> Vec<SlotRecord> {
        self.ads
    }
}

/// Groups records by `search_id`, keeping first-seen group order and the
/// arrival order of ads inside each group.
#[must_use]
pub fn merge_by_search_id(records: Vec<SlotRecord>) -> Vec<PvInstance> {
    let mut groups: Vec<PvInstance> = Vec::new();
    let mut index: FxHashMap<u64, usize> = FxHashMap::default();

    for record in records {
        let slot = *index.entry(record.search_id).or_insert_with(|| {
            groups.push(PvInstance::new());
            groups.len() - 1
        });
        groups[slot].merge_instance(record);
    }
    groups
}
