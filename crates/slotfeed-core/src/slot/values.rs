//! Ragged typed storage: one flat value array indexed by per-slot offsets.

/// Values of many slots stored contiguously.
///
/// `offsets` has `slot_count + 1` entries once the first slot is added;
/// `offsets[i]..offsets[i + 1]` bounds slot `i` in `values`.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotValues<T> {
    values: Vec<T>,
    offsets: Vec<u32>,
}

impl<T> Default for SlotValues<T> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            offsets: Vec::new(),
        }
    }
}

impl<T: Copy> SlotValues<T> {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a container from raw parts.
    ///
    /// Callers reading untrusted input should follow up with
    /// [`check_invariants`](Self::check_invariants).
    #[must_use]
    pub fn from_parts(values: Vec<T>, offsets: Vec<u32>) -> Self {
        Self { values, offsets }
    }

    /// Appends one slot holding `values`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn add_values(&mut self, values: &[T]) {
        if self.offsets.is_empty() {
            self.offsets.push(0);
        }
        self.values.extend_from_slice(values);
        self.offsets.push(self.values.len() as u32);
    }

    /// Replaces the content with one slot per entry of `slot_feasigns`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn add_slot_feasigns(&mut self, slot_feasigns: &[Vec<T>]) {
        let total: usize = slot_feasigns.iter().map(Vec::len).sum();
        self.values.clear();
        self.values.reserve(total);
        self.offsets.clear();
        self.offsets.reserve(slot_feasigns.len() + 1);
        for slot in slot_feasigns {
            self.offsets.push(self.values.len() as u32);
            self.values.extend_from_slice(slot);
        }
        self.offsets.push(self.values.len() as u32);
    }

    /// Values of slot `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= slot_count()`.
    #[inline]
    #[must_use]
    pub fn slot(&self, idx: usize) -> &[T] {
        let start = self.offsets[idx] as usize;
        let end = self.offsets[idx + 1] as usize;
        &self.values[start..end]
    }

    /// Number of values in slot `idx`, or 0 when the slot was never filled.
    #[inline]
    #[must_use]
    pub fn slot_len(&self, idx: usize) -> usize {
        if idx + 1 >= self.offsets.len() {
            return 0;
        }
        (self.offsets[idx + 1] - self.offsets[idx]) as usize
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Total number of values across all slots.
    #[inline]
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.values.len()
    }

    /// Flat value array.
    #[inline]
    #[must_use]
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Offset array (`slot_count + 1` entries, or empty).
    #[inline]
    #[must_use]
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// Replaces the values of slot `idx`, returning the displaced ones.
    ///
    /// Offsets of every later slot shift by the size difference.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= slot_count()`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn replace_slot(&mut self, idx: usize, values: &[T]) -> Vec<T> {
        let start = self.offsets[idx] as usize;
        let end = self.offsets[idx + 1] as usize;
        let old: Vec<T> = self
            .values
            .splice(start..end, values.iter().copied())
            .collect();

        let diff = values.len() as i64 - old.len() as i64;
        if diff != 0 {
            for offset in &mut self.offsets[idx + 1..] {
                *offset = (i64::from(*offset) + diff) as u32;
            }
        }
        old
    }

    /// Clears every slot. With `shrink`, the backing capacity is released too.
    pub fn clear(&mut self, shrink: bool) {
        self.values.clear();
        self.offsets.clear();
        if shrink {
            self.values.shrink_to_fit();
            self.offsets.shrink_to_fit();
        }
    }

    /// Checks that offsets start at 0, never decrease, and end at `values.len()`.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated rule.
    pub fn check_invariants(&self) -> Result<(), String> {
        let Some((&first, rest)) = self.offsets.split_first() else {
            return if self.values.is_empty() {
                Ok(())
            } else {
                Err(format!("{} values without offsets", self.values.len()))
            };
        };
        if first != 0 {
            return Err(format!("first offset is {first}, expected 0"));
        }
        let mut prev = first;
        for &offset in rest {
            if offset < prev {
                return Err(format!("offset {offset} decreases after {prev}"));
            }
            prev = offset;
        }
        if prev as usize != self.values.len() {
            return Err(format!(
                "last offset {prev} does not match value count {}",
                self.values.len()
            ));
        }
        Ok(())
    }
}
