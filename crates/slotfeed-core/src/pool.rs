//! Record object pool.
//!
//! Released records are reset and kept on a free list so their ragged buffers
//! are reused by the next acquire. A background reclaimer frees idle records
//! above the configured ceiling, or every idle record when pooling is
//! disabled, without holding the free-list lock while dropping them.
//!
//! # Thread-Safety
//!
//! The free list is guarded by one `parking_lot::Mutex`; the reclaimer waits
//! on a `Condvar` paired with that mutex. Counters are lock-free atomics.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::slot::SlotRecord;

/// Maximum number of idle records the reclaimer frees per lock acquisition.
pub const RECLAIM_BLOCK: usize = 500_000;

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Records created because the free list was empty.
    pub allocated: u64,
    /// Acquires served from the free list.
    pub reused: u64,
    /// Idle records freed by the reclaimer or by `clear`.
    pub destroyed: u64,
    /// Acquired minus released.
    pub in_flight: i64,
    /// Idle records on the free list.
    pub free: usize,
}

struct PoolShared {
    free: Mutex<Vec<SlotRecord>>,
    wake: Condvar,
    stop: AtomicBool,
    disabled: AtomicBool,
    max_capacity: AtomicUsize,
    allocated: AtomicU64,
    reused: AtomicU64,
    destroyed: AtomicU64,
    in_flight: AtomicI64,
}

impl PoolShared {
    fn ceiling(&self) -> usize {
        if self.disabled.load(Ordering::Relaxed) {
            0
        } else {
            self.max_capacity.load(Ordering::Relaxed)
        }
    }
}

/// Pool of reusable [`SlotRecord`]s.
pub struct RecordPool {
    shared: Arc<PoolShared>,
    reclaimers: Mutex<Vec<JoinHandle<()>>>,
    extend_dim: usize,
    shrink_on_reset: bool,
}

impl RecordPool {
    /// Creates a pool and starts its reclaimer threads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if a reclaimer thread cannot be spawned.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        let shared = Arc::new(PoolShared {
            free: Mutex::new(Vec::new()),
            wake: Condvar::new(),
            stop: AtomicBool::new(false),
            disabled: AtomicBool::new(config.disabled),
            max_capacity: AtomicUsize::new(config.max_capacity),
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            in_flight: AtomicI64::new(0),
        });

        let pool = Self {
            shared,
            reclaimers: Mutex::new(Vec::with_capacity(config.reclaim_threads)),
            extend_dim: config.extend_dim,
            shrink_on_reset: config.shrink_on_reset,
        };

        for i in 0..config.reclaim_threads.max(1) {
            let shared = Arc::clone(&pool.shared);
            let handle = std::thread::Builder::new()
                .name(format!("slotfeed-reclaim-{i}"))
                .spawn(move || reclaim_loop(&shared))
                .map_err(|e| Error::Internal(format!("failed to spawn reclaimer: {e}")))?;
            pool.reclaimers.lock().push(handle);
        }

        Ok(pool)
    }

    /// Acquires `n` records, reusing idle ones first.
    #[must_use]
    pub fn acquire(&self, n: usize) -> Vec<SlotRecord> {
        let mut out = Vec::with_capacity(n);
        self.acquire_into(&mut out, n);
        out
    }

    /// Appends `n` records to `out`, reusing idle ones first.
    pub fn acquire_into(&self, out: &mut Vec<SlotRecord>, n: usize) {
        if n == 0 {
            return;
        }
        let reused = {
            let mut free = self.shared.free.lock();
            let take = n.min(free.len());
            let at = free.len() - take;
            out.extend(free.drain(at..));
            take
        };
        self.shared.in_flight.fetch_add(n as i64, Ordering::Relaxed);
        self.shared.reused.fetch_add(reused as u64, Ordering::Relaxed);

        let fresh = n - reused;
        if fresh > 0 {
            self.shared.allocated.fetch_add(fresh as u64, Ordering::Relaxed);
            out.extend((0..fresh).map(|_| SlotRecord::with_extension(self.extend_dim)));
        }
    }

    /// Acquires a single record.
    #[must_use]
    pub fn acquire_one(&self) -> SlotRecord {
        let reused = self.shared.free.lock().pop();
        self.shared.in_flight.fetch_add(1, Ordering::Relaxed);
        match reused {
            Some(record) => {
                self.shared.reused.fetch_add(1, Ordering::Relaxed);
                record
            }
            None => {
                self.shared.allocated.fetch_add(1, Ordering::Relaxed);
                SlotRecord::with_extension(self.extend_dim)
            }
        }
    }

    /// Resets and returns records to the free list.
    ///
    /// Records are moved in, so a record cannot be released twice.
    pub fn release<I>(&self, records: I)
    where
        I: IntoIterator<Item = SlotRecord>,
    {
        let mut staged: Vec<SlotRecord> = records
            .into_iter()
            .map(|mut record| {
                record.reset(self.shrink_on_reset);
                record
            })
            .collect();
        if staged.is_empty() {
            return;
        }
        let count = staged.len();

        let free_len = {
            let mut free = self.shared.free.lock();
            free.append(&mut staged);
            free.len()
        };
        self.shared.in_flight.fetch_sub(count as i64, Ordering::Relaxed);

        if free_len > self.shared.ceiling() {
            self.shared.wake.notify_one();
        }
    }

    /// Resets and returns one record.
    pub fn release_one(&self, record: SlotRecord) {
        self.release(std::iter::once(record));
    }

    /// Enables or disables pooling. While disabled the reclaimer frees every
    /// idle record.
    pub fn disable(&self, disabled: bool) {
        let _guard = self.shared.free.lock();
        self.shared.disabled.store(disabled, Ordering::Relaxed);
        if disabled {
            self.shared.wake.notify_all();
        }
    }

    /// Changes the idle-record ceiling.
    pub fn set_max_capacity(&self, max_capacity: usize) {
        let _guard = self.shared.free.lock();
        self.shared.max_capacity.store(max_capacity, Ordering::Relaxed);
        self.shared.wake.notify_all();
    }

    /// Current idle-record ceiling.
    #[must_use]
    pub fn max_capacity(&self) -> usize {
        self.shared.max_capacity.load(Ordering::Relaxed)
    }

    /// Frees every idle record.
    pub fn clear(&self) {
        let start = Instant::now();
        let idle = std::mem::take(&mut *self.shared.free.lock());
        let total = idle.len();
        drop(idle);
        self.shared.destroyed.fetch_add(total as u64, Ordering::Relaxed);
        tracing::info!(
            size = total,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Cleared record pool"
        );
    }

    /// Number of idle records.
    #[must_use]
    pub fn free_len(&self) -> usize {
        self.shared.free.lock().len()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.shared.allocated.load(Ordering::Relaxed),
            reused: self.shared.reused.load(Ordering::Relaxed),
            destroyed: self.shared.destroyed.load(Ordering::Relaxed),
            in_flight: self.shared.in_flight.load(Ordering::Relaxed),
            free: self.free_len(),
        }
    }

    /// Logs the in-flight and idle counts.
    pub fn log_info(&self, name: &str) {
        let stats = self.stats();
        tracing::info!(
            pool = name,
            in_flight = stats.in_flight,
            free = stats.free,
            "Record pool info"
        );
    }

    /// Stops and joins the reclaimer threads. Idempotent.
    pub fn shutdown(&self) {
        {
            let _guard = self.shared.free.lock();
            self.shared.stop.store(true, Ordering::Release);
            self.shared.wake.notify_all();
        }
        let handles = std::mem::take(&mut *self.reclaimers.lock());
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("Record pool reclaimer panicked");
            }
        }
    }
}

impl std::fmt::Debug for RecordPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordPool")
            .field("extend_dim", &self.extend_dim)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Drop for RecordPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reclaim_loop(shared: &PoolShared) {
    loop {
        let drained = {
            let mut free = shared.free.lock();
            let excess = loop {
                if shared.stop.load(Ordering::Acquire) {
                    return;
                }
                let excess = free.len().saturating_sub(shared.ceiling());
                if excess > 0 {
                    break excess;
                }
                shared.wake.wait(&mut free);
            };
            let at = free.len() - excess.min(RECLAIM_BLOCK);
            free.split_off(at)
        };

        let n = drained.len();
        drop(drained);
        shared.destroyed.fetch_add(n as u64, Ordering::Relaxed);
        tracing::trace!(freed = n, "Reclaimed idle records");
    }
}
