//! Reservoir candidate cache.
//!
//! Keeps a uniform sample of at most `capacity` records seen in a pass
//! (Algorithm R) and hands out random members of the sample so callers can
//! swap feature values between records. Replacements made during a pass are
//! appended past the end of the list and linked through `shadow_index`; the
//! home entries are only overwritten by [`RecordCandidateList::reinit_pass`],
//! so indices handed out earlier in the pass stay valid.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::slot::SlotRecord;

/// Projection of a record onto the replaceable uint64 slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordCandidate {
    /// Instance id of the source record.
    pub ins_id: String,
    /// Slot value index to that slot's values.
    pub feas: FxHashMap<u16, Vec<u64>>,
    /// Index of the entry currently standing in for this one.
    pub shadow_index: usize,
}

impl RecordCandidate {
    /// Copies the listed uint64 slots of `record`.
    #[must_use]
    pub fn from_record(record: &SlotRecord, slots: &FxHashSet<u16>) -> Self {
        let values = &record.uint64_feasigns;
        let feas = slots
            .iter()
            .filter(|&&slot| usize::from(slot) < values.slot_count())
            .map(|&slot| (slot, values.slot(usize::from(slot)).to_vec()))
            .collect();
        Self {
            ins_id: record.ins_id.clone(),
            feas,
            shadow_index: 0,
        }
    }
}

struct Inner {
    capacity: usize,
    full: bool,
    cur_size: usize,
    total_seen: usize,
    list: Vec<RecordCandidate>,
    slots: FxHashSet<u16>,
    rng: StdRng,
}

/// Reservoir of [`RecordCandidate`]s shared by reader threads.
pub struct RecordCandidateList {
    inner: Mutex<Inner>,
}

impl Default for RecordCandidateList {
    fn default() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl RecordCandidateList {
    /// Creates an empty reservoir with capacity 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a reservoir with a fixed RNG seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity: 0,
                full: false,
                cur_size: 0,
                total_seen: 0,
                list: Vec::new(),
                slots: FxHashSet::default(),
                rng,
            }),
        }
    }

    /// Sets the capacity and empties the reservoir.
    pub fn resize(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.capacity = capacity;
        inner.list = Vec::with_capacity(capacity);
        reinit(&mut inner);
    }

    /// Empties the reservoir, keeping capacity and slot selection.
    pub fn reinit(&self) {
        reinit(&mut self.inner.lock());
    }

    /// Selects the uint64 slot indices projected into candidates.
    pub fn set_slots_to_replace(&self, slots: FxHashSet<u16>) {
        self.inner.lock().slots = slots;
    }

    /// Offers `record` to the reservoir and returns the index of a random
    /// resident candidate.
    ///
    /// Returns `None` when the capacity is 0.
    pub fn add_and_get(&self, record: &SlotRecord) -> Option<usize> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.capacity == 0 {
            return None;
        }
        inner.total_seen += 1;

        if !inner.full {
            let mut candidate = RecordCandidate::from_record(record, &inner.slots);
            candidate.shadow_index = inner.cur_size;
            inner.list.push(candidate);
            inner.cur_size += 1;
            inner.full = inner.cur_size == inner.capacity;
        } else {
            let j = inner.rng.gen_range(0..inner.total_seen);
            if j < inner.capacity {
                let mut candidate = RecordCandidate::from_record(record, &inner.slots);
                candidate.shadow_index = inner.list.len();
                inner.list.push(candidate);
                let shadow = inner.list.len() - 1;
                inner.list[j].shadow_index = shadow;
            }
        }

        let u = inner.rng.gen_range(0..inner.cur_size);
        Some(inner.list[u].shadow_index)
    }

    /// Clones the candidate stored at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<RecordCandidate> {
        self.inner.lock().list.get(index).cloned()
    }

    /// Runs `f` on the candidate at `index` without cloning it.
    pub fn with_candidate<R>(
        &self,
        index: usize,
        f: impl FnOnce(&RecordCandidate) -> R,
    ) -> Option<R> {
        self.inner.lock().list.get(index).map(f)
    }

    /// Folds this pass's replacements into their home entries.
    pub fn reinit_pass(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        for i in 0..inner.cur_size {
            let shadow = inner.list[i].shadow_index;
            if shadow != i {
                let replacement = std::mem::take(&mut inner.list[shadow]);
                inner.list[i] = RecordCandidate {
                    shadow_index: i,
                    ..replacement
                };
            }
        }
        let capacity = inner.capacity;
        inner.list.truncate(capacity);
    }

    /// Instance ids currently in the sample, shadows resolved.
    #[must_use]
    pub fn resident_ids(&self) -> Vec<String> {
        let inner = self.inner.lock();
        inner.list[..inner.cur_size]
            .iter()
            .map(|c| inner.list[c.shadow_index].ins_id.clone())
            .collect()
    }

    /// Number of resident candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().cur_size
    }

    /// True when nothing was sampled yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records offered since the last reinit.
    #[must_use]
    pub fn total_seen(&self) -> usize {
        self.inner.lock().total_seen
    }

    /// Maximum number of resident candidates.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }
}

impl std::fmt::Debug for RecordCandidateList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RecordCandidateList")
            .field("capacity", &inner.capacity)
            .field("cur_size", &inner.cur_size)
            .field("total_seen", &inner.total_seen)
            .finish_non_exhaustive()
    }
}

fn reinit(inner: &mut Inner) {
    inner.full = false;
    inner.cur_size = 0;
    inner.total_seen = 0;
    inner.list.clear();
}

/// Swaps candidate values into a record and restores them afterwards.
#[derive(Debug, Default)]
pub struct FeasignReplacer {
    saved: Vec<(u16, Vec<u64>)>,
    deleted: u64,
    added: u64,
}

impl FeasignReplacer {
    /// Creates a replacer with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the record's replaceable slots with the candidate's values.
    ///
    /// Slots the record does not carry are skipped. Call
    /// [`replace_back`](Self::replace_back) before replacing again.
    pub fn replace(&mut self, record: &mut SlotRecord, candidate: &RecordCandidate) {
        let mut slots: Vec<u16> = candidate.feas.keys().copied().collect();
        slots.sort_unstable();

        for slot in slots {
            let idx = usize::from(slot);
            if idx >= record.uint64_feasigns.slot_count() {
                continue;
            }
            let values = &candidate.feas[&slot];
            let old = record.uint64_feasigns.replace_slot(idx, values);
            self.deleted += old.len() as u64;
            self.added += values.len() as u64;
            self.saved.push((slot, old));
        }
    }

    /// Restores the values displaced by the last [`replace`](Self::replace).
    pub fn replace_back(&mut self, record: &mut SlotRecord) {
        for (slot, old) in self.saved.drain(..).rev() {
            record.uint64_feasigns.replace_slot(usize::from(slot), &old);
        }
    }

    /// Feasigns removed from records so far.
    #[must_use]
    pub fn deleted(&self) -> u64 {
        self.deleted
    }

    /// Feasigns inserted into records so far.
    #[must_use]
    pub fn added(&self) -> u64 {
        self.added
    }
}
