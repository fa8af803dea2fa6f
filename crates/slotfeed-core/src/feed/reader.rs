//! Reader threads.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crate::archive::ArchiveReader;
use crate::channel::{Channel, ChannelClosed};
use crate::error::{Error, Result};
use crate::files::{FeasignCounter, FileList};
use crate::parser::SlotParser;
use crate::pool::RecordPool;
use crate::reservoir::RecordCandidateList;
use crate::slot::{AucRunnerInfo, SlotRecord};

/// Everything a reader thread needs; cloned into each thread.
#[derive(Clone)]
pub struct ReaderTask {
    /// Files to claim.
    pub files: Arc<FileList>,
    /// Line parser, unused when reading archives.
    pub parser: Arc<dyn SlotParser>,
    /// Source of record memory.
    pub pool: Arc<RecordPool>,
    /// Offered every kept record when present.
    pub reservoir: Option<Arc<RecordCandidateList>>,
    /// Running feasign total.
    pub feasigns: Arc<FeasignCounter>,
    /// Probability of keeping a record.
    pub sample_rate: f32,
    /// Files are binary archives.
    pub load_archive: bool,
    /// Base seed; thread `i` uses `seed + i`.
    pub seed: Option<u64>,
}

impl std::fmt::Debug for ReaderTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderTask")
            .field("files", &self.files.len())
            .field("sample_rate", &self.sample_rate)
            .field("load_archive", &self.load_archive)
            .finish_non_exhaustive()
    }
}

/// Closes the channel when the last reader exits, even on panic.
struct CloseOnLast {
    remaining: Arc<AtomicUsize>,
    channel: Arc<Channel<SlotRecord>>,
}

impl Drop for CloseOnLast {
    fn drop(&mut self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.channel.close();
        }
    }
}

/// A fixed set of named reader threads writing into one channel.
#[derive(Debug)]
pub struct ReaderPool {
    handles: Vec<JoinHandle<Result<usize>>>,
    channel: Arc<Channel<SlotRecord>>,
}

impl ReaderPool {
    /// Spawns `thread_num` readers (at least one). The channel is closed once
    /// every reader has finished.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if a thread cannot be spawned; the channel
    /// is closed so already running readers stop.
    pub fn spawn(
        task: &ReaderTask,
        thread_num: usize,
        channel: Arc<Channel<SlotRecord>>,
    ) -> Result<Self> {
        let thread_num = thread_num.max(1);
        let remaining = Arc::new(AtomicUsize::new(thread_num));
        let mut handles = Vec::with_capacity(thread_num);

        for idx in 0..thread_num {
            let task = task.clone();
            let guard = CloseOnLast {
                remaining: Arc::clone(&remaining),
                channel: Arc::clone(&channel),
            };
            let spawned = std::thread::Builder::new()
                .name(format!("slotfeed-reader-{idx}"))
                .spawn(move || read_files(&task, idx, &guard.channel));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    channel.close();
                    return Err(Error::Internal(format!("failed to spawn reader: {e}")));
                }
            }
        }

        Ok(Self { handles, channel })
    }

    /// Channel the readers write into.
    #[must_use]
    pub fn channel(&self) -> &Arc<Channel<SlotRecord>> {
        &self.channel
    }

    /// True once every reader thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(JoinHandle::is_finished)
    }

    /// Waits for every reader and returns the number of records written.
    ///
    /// # Errors
    ///
    /// Returns the first reader error; a panicked reader is reported as
    /// [`Error::Internal`].
    pub fn join(self) -> Result<usize> {
        let mut total = 0;
        let mut first_err = None;
        for handle in self.handles {
            match handle.join() {
                Ok(Ok(n)) => total += n,
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(_) => {
                    first_err.get_or_insert(Error::Internal("reader thread panicked".to_string()));
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }
}

/// Per-thread reader state.
struct ReaderCursor {
    idx: usize,
    rng: StdRng,
    emitted: usize,
}

fn read_files(task: &ReaderTask, idx: usize, channel: &Channel<SlotRecord>) -> Result<usize> {
    let rng = match task.seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(idx as u64)),
        None => StdRng::from_entropy(),
    };
    let mut cursor = ReaderCursor {
        idx,
        rng,
        emitted: 0,
    };
    let mut total = 0;

    while let Some(path) = task.files.pick_one() {
        let start = Instant::now();
        let loaded = if task.load_archive {
            read_archive(task, path, &mut cursor, channel)
        } else {
            read_text(task, path, &mut cursor, channel)
        };
        match loaded {
            Ok(n) => {
                total += n;
                tracing::debug!(
                    thread = idx,
                    file = %path.display(),
                    records = n,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Loaded file"
                );
            }
            Err(Error::ChannelClosed) => {
                tracing::debug!(thread = idx, "Channel closed, reader stopping");
                break;
            }
            Err(e) => {
                tracing::error!(thread = idx, file = %path.display(), error = %e, "Reader failed");
                return Err(e);
            }
        }
    }

    tracing::debug!(thread = idx, records = total, "Reader finished");
    Ok(total)
}

fn read_text(
    task: &ReaderTask,
    path: &Path,
    cursor: &mut ReaderCursor,
    channel: &Channel<SlotRecord>,
) -> Result<usize> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut kept = 0;
    task.parser
        .parse_file(&mut reader, &task.pool, &mut |record| {
            if emit(task, cursor, channel, record)? {
                kept += 1;
            }
            Ok(())
        })?;
    Ok(kept)
}

fn read_archive(
    task: &ReaderTask,
    path: &Path,
    cursor: &mut ReaderCursor,
    channel: &Channel<SlotRecord>,
) -> Result<usize> {
    let mut kept = 0;
    for record in ArchiveReader::open(path, Arc::clone(&task.pool))? {
        if emit(task, cursor, channel, record?)? {
            kept += 1;
        }
    }
    Ok(kept)
}

/// Samples, counts and pushes one record. Returns whether it was kept.
///
/// With a reservoir, the record is offered to it and remembers the candidate
/// drawn in return.
fn emit(
    task: &ReaderTask,
    cursor: &mut ReaderCursor,
    channel: &Channel<SlotRecord>,
    mut record: SlotRecord,
) -> Result<bool> {
    if task.sample_rate < 1.0 && cursor.rng.gen::<f32>() >= task.sample_rate {
        task.pool.release_one(record);
        return Ok(false);
    }

    task.feasigns.add(record.feasign_count() as u64);
    if let Some(reservoir) = &task.reservoir {
        record.auc_runner = reservoir
            .add_and_get(&record)
            .map(|replaced_id| AucRunnerInfo {
                record_id: cursor.emitted,
                pool_id: cursor.idx,
                replaced_id,
            });
    }
    cursor.emitted += 1;

    channel.push(record).map_err(|ChannelClosed(record)| {
        task.pool.release_one(record);
        Error::ChannelClosed
    })?;
    Ok(true)
}
