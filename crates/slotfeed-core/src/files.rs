//! File list distribution across reader threads.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared list of input files; each file is claimed by exactly one reader.
#[derive(Debug, Default)]
pub struct FileList {
    files: Vec<PathBuf>,
    cursor: Mutex<usize>,
}

impl FileList {
    /// Creates a list with the cursor at the first file.
    #[must_use]
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            cursor: Mutex::new(0),
        }
    }

    /// Claims the next unclaimed file, `None` once the list is exhausted.
    pub fn pick_one(&self) -> Option<&Path> {
        let mut cursor = self.cursor.lock();
        let file = self.files.get(*cursor)?;
        *cursor += 1;
        Some(file.as_path())
    }

    /// Restarts distribution for a new pass.
    pub fn reset(&self) {
        *self.cursor.lock() = 0;
    }

    /// Number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True when the list has no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of files claimed in the current pass.
    #[must_use]
    pub fn claimed(&self) -> usize {
        *self.cursor.lock()
    }

    /// All files, in distribution order.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

/// Shared count of feasigns loaded by all readers.
#[derive(Debug, Default)]
pub struct FeasignCounter(AtomicU64);

impl FeasignCounter {
    /// Creates a zeroed counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` loaded feasigns.
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current total.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Resets to zero, returning the previous total.
    pub fn take(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }
}
