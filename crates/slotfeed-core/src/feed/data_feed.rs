//! The per-consumer feed state machine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::reader::{ReaderPool, ReaderTask};
use super::state::FeedState;
use crate::channel::{Channel, ChannelClosed};
use crate::config::{FeedConfig, FeedKind, ReaderConfig};
use crate::context::FeedContext;
use crate::error::{Error, Result};
use crate::files::FileList;
use crate::pack::{BatchPacker, Device, HostDevice, PackedBatch};
use crate::parser::{ParseOptions, SlotParser};
use crate::reservoir::FeasignReplacer;
use crate::slot::{merge_by_search_id, PvInstance, SlotRecord};

/// Pulls batches of records and packs them for one device.
///
/// Calls must follow `init -> set_file_list -> start -> next`; calling an
/// operation before its prerequisite panics. The variant is fixed by
/// [`ReaderConfig::kind`]:
///
/// - [`FeedKind::InMemory`]: [`load_into_memory`](Self::load_into_memory)
///   fills the input channel first; `next` drains it.
/// - [`FeedKind::Streaming`]: `start` spawns readers into a private bounded
///   channel that `next` drains concurrently.
/// - [`FeedKind::PageView`]: loaded records are grouped by search id into the
///   page-view channel; `next` packs groups.
///
/// Consumed records go to the output channel when one is set, otherwise back
/// to the pool.
///
/// With a reservoir and `sampling.replace_slots` configured, every record
/// that drew a candidate while being read is packed with the candidate's
/// values in those slots; the record itself keeps its own values.
pub struct DataFeed<D: Device = HostDevice> {
    ctx: Arc<FeedContext<D>>,
    state: FeedState,
    reader: ReaderConfig,
    thread_id: usize,
    parser: Option<Arc<dyn SlotParser>>,
    files: Option<Arc<FileList>>,
    input: Option<Arc<Channel<SlotRecord>>>,
    output: Option<Arc<Channel<SlotRecord>>>,
    input_pv: Option<Arc<Channel<PvInstance>>>,
    streaming: Option<ReaderPool>,
    packer: Option<BatchPacker<D>>,
    records: Vec<SlotRecord>,
    pvs: Vec<PvInstance>,
    cur_batch_size: usize,
    replace_feasigns: bool,
    replacers: Vec<FeasignReplacer>,
}

impl<D: Device> DataFeed<D> {
    /// Creates an uninitialized feed bound to `ctx`.
    #[must_use]
    pub fn new(ctx: Arc<FeedContext<D>>) -> Self {
        let reader = ctx.config().reader.clone();
        let replace_feasigns =
            ctx.reservoir().is_some() && !ctx.config().sampling.replace_slots.is_empty();
        Self {
            ctx,
            state: FeedState::Uninitialized,
            reader,
            thread_id: 0,
            parser: None,
            files: None,
            input: None,
            output: None,
            input_pv: None,
            streaming: None,
            packer: None,
            records: Vec::new(),
            pvs: Vec::new(),
            cur_batch_size: 0,
            replace_feasigns,
            replacers: Vec::new(),
        }
    }

    /// Binds the reader settings of `config` and loads the configured parser.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParserLoad`] if the parser cannot be loaded.
    ///
    /// # Panics
    ///
    /// Panics if called twice.
    pub fn init(&mut self, config: &FeedConfig) -> Result<()> {
        assert_eq!(
            self.state,
            FeedState::Uninitialized,
            "DataFeed::init called twice"
        );
        let options = ParseOptions::from(&config.reader);
        let parser = self.ctx.registry().load(
            &config.reader.parser,
            self.ctx.schema().all_slots(),
            options,
        )?;

        self.reader = config.reader.clone();
        self.parser = Some(parser);
        self.state = FeedState::Initialized;
        tracing::debug!(
            thread_id = self.thread_id,
            kind = ?self.reader.kind,
            batch_size = self.reader.batch_size,
            "DataFeed initialized"
        );
        Ok(())
    }

    /// Assigns the files read by the next pass.
    ///
    /// # Panics
    ///
    /// Panics before `init` or while the feed is running.
    pub fn set_file_list(&mut self, files: Vec<PathBuf>) {
        self.state.require(FeedState::Initialized, "set_file_list");
        assert!(
            !self.state.is_running(),
            "DataFeed::set_file_list called while running; call finish first"
        );
        tracing::debug!(thread_id = self.thread_id, files = files.len(), "File list set");
        self.files = Some(Arc::new(FileList::new(files)));
        self.state = FeedState::FileListSet;
    }

    /// Channel holding loaded records (in-memory and page-view feeds).
    pub fn set_input_channel(&mut self, channel: Arc<Channel<SlotRecord>>) {
        self.input = Some(channel);
    }

    /// Channel receiving consumed records.
    ///
    /// Records are appended past the channel's capacity, so `next` never
    /// waits for the output to be drained.
    pub fn set_output_channel(&mut self, channel: Arc<Channel<SlotRecord>>) {
        self.output = Some(channel);
    }

    /// Channel holding page views (page-view feeds).
    pub fn set_input_pv_channel(&mut self, channel: Arc<Channel<PvInstance>>) {
        self.input_pv = Some(channel);
    }

    /// Selects the device this feed packs for.
    ///
    /// # Panics
    ///
    /// Panics while the feed is running.
    pub fn set_thread_id(&mut self, thread_id: usize) {
        assert!(
            !self.state.is_running(),
            "DataFeed::set_thread_id called while running"
        );
        self.thread_id = thread_id;
    }

    /// Changes the probability of keeping a parsed record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] unless `rate` is in `(0, 1]`.
    pub fn set_sample_rate(&mut self, rate: f32) -> Result<()> {
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(Error::Config(format!(
                "sample rate {rate} is out of range (0, 1]"
            )));
        }
        self.reader.sample_rate = rate;
        Ok(())
    }

    /// Reads binary archives instead of text files.
    pub fn set_load_archive(&mut self, load_archive: bool) {
        self.reader.load_archive = load_archive;
    }

    /// Reads every file into the input channel and returns the number of
    /// records kept. Page-view feeds then group the records into the
    /// page-view channel.
    ///
    /// The input channel is unbounded for the duration of the load and closed
    /// when it completes.
    ///
    /// # Errors
    ///
    /// Returns the first reader error.
    ///
    /// # Panics
    ///
    /// Panics before `set_file_list`, for streaming feeds, or when a required
    /// channel is missing.
    pub fn load_into_memory(&mut self) -> Result<usize> {
        self.state.require(FeedState::FileListSet, "load_into_memory");
        assert!(
            self.reader.kind != FeedKind::Streaming,
            "DataFeed::load_into_memory is not available for streaming feeds"
        );
        let Some(input) = self.input.clone() else {
            panic!("DataFeed::load_into_memory requires an input channel");
        };

        let start = Instant::now();
        let feasigns_before = self.ctx.feasigns().get();
        if let Some(files) = &self.files {
            files.reset();
        }
        if let Some(reservoir) = self.ctx.reservoir() {
            reservoir.reinit_pass();
        }
        let capacity = input.capacity();
        input.open();
        input.set_capacity(usize::MAX);
        let loaded = ReaderPool::spawn(
            &self.reader_task(),
            self.reader.thread_num,
            Arc::clone(&input),
        )
        .and_then(ReaderPool::join);
        input.set_capacity(capacity);
        let loaded = loaded?;

        tracing::info!(
            records = loaded,
            feasigns = self.ctx.feasigns().get().saturating_sub(feasigns_before),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded into memory"
        );

        if self.reader.kind == FeedKind::PageView {
            self.merge_page_views(&input);
        }
        Ok(loaded)
    }

    fn merge_page_views(&self, input: &Channel<SlotRecord>) {
        let Some(pv_channel) = self.input_pv.as_ref() else {
            panic!("page-view feeds require an input page-view channel");
        };
        let mut records = Vec::with_capacity(input.len());
        input.read_all(&mut records);
        let pvs = if self.reader.enable_pv_merge {
            merge_by_search_id(records)
        } else {
            records.into_iter().map(PvInstance::single).collect()
        };

        let count = pvs.len();
        let capacity = pv_channel.capacity();
        pv_channel.open();
        pv_channel.set_capacity(capacity.max(count));
        pv_channel.write_all(pvs);
        pv_channel.set_capacity(capacity);
        pv_channel.close();
        tracing::info!(
            page_views = count,
            merged = self.reader.enable_pv_merge,
            "Built page views"
        );
    }

    /// Checks out this feed's packer and, for streaming feeds, starts the
    /// readers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the device's packer is already in use, or
    /// [`Error::Internal`] if reader threads cannot be spawned.
    ///
    /// # Panics
    ///
    /// Panics before `set_file_list`, if already started, or when the channel
    /// the variant reads from is missing.
    pub fn start(&mut self) -> Result<()> {
        self.state.require(FeedState::FileListSet, "start");
        assert!(!self.state.is_running(), "DataFeed::start called twice");
        match self.reader.kind {
            FeedKind::InMemory => assert!(
                self.input.is_some(),
                "in-memory feeds require an input channel"
            ),
            FeedKind::PageView => assert!(
                self.input_pv.is_some(),
                "page-view feeds require an input page-view channel"
            ),
            FeedKind::Streaming => {}
        }

        let ctx = Arc::clone(&self.ctx);
        let packer = ctx
            .packers()
            .checkout(self.thread_id, |id| ctx.make_device(id))?;

        if self.reader.kind == FeedKind::Streaming {
            if let Some(files) = &self.files {
                files.reset();
            }
            if let Some(reservoir) = self.ctx.reservoir() {
                reservoir.reinit_pass();
            }
            let channel = Channel::shared(self.reader.queue_capacity);
            match ReaderPool::spawn(&self.reader_task(), self.reader.thread_num, channel) {
                Ok(readers) => self.streaming = Some(readers),
                Err(e) => {
                    self.ctx.packers().checkin(packer);
                    return Err(e);
                }
            }
        }

        self.packer = Some(packer);
        self.state = FeedState::Started;
        tracing::debug!(thread_id = self.thread_id, kind = ?self.reader.kind, "DataFeed started");
        Ok(())
    }

    /// Pulls and packs the next batch. Returns the number of records packed,
    /// `0` once the pass is exhausted.
    ///
    /// Records of the previous batch are handed to the output channel or the
    /// pool first.
    ///
    /// # Errors
    ///
    /// Returns device errors from packing and, for streaming feeds, reader
    /// errors once the stream ends.
    ///
    /// # Panics
    ///
    /// Panics before `start`.
    pub fn next(&mut self) -> Result<usize> {
        self.state.require(FeedState::Started, "next");
        self.recycle_batch();
        self.cur_batch_size = 0;
        if self.state == FeedState::EndOfEpoch {
            return Ok(0);
        }

        let popped = match self.reader.kind {
            FeedKind::InMemory => self
                .input
                .as_ref()
                .map_or(0, |c| c.pop_batch(self.reader.batch_size, &mut self.records)),
            FeedKind::Streaming => self.streaming.as_ref().map_or(0, |r| {
                r.channel()
                    .pop_batch(self.reader.batch_size, &mut self.records)
            }),
            FeedKind::PageView => self
                .input_pv
                .as_ref()
                .map_or(0, |c| c.pop_batch(self.reader.pv_batch_size, &mut self.pvs)),
        };

        if popped == 0 {
            self.state = FeedState::EndOfEpoch;
            if let Some(readers) = self.streaming.take() {
                readers.join()?;
            }
            tracing::debug!(thread_id = self.thread_id, "End of epoch");
            return Ok(0);
        }

        let replaced = self.replace_candidates();
        let Some(packer) = self.packer.as_mut() else {
            panic!("DataFeed::next called without a packer");
        };
        let packed = if self.reader.kind == FeedKind::PageView {
            packer.pack_pv_instance(&self.pvs)
        } else {
            packer.pack_instance(&self.records)
        };
        if replaced > 0 {
            self.restore_candidates();
        }
        let packed = packed?;
        self.cur_batch_size = packed;
        Ok(packed)
    }

    /// Swaps the drawn candidate's values into every record of the batch.
    /// Returns the number of records changed.
    fn replace_candidates(&mut self) -> usize {
        if !self.replace_feasigns {
            return 0;
        }
        let Some(reservoir) = self.ctx.reservoir() else {
            return 0;
        };
        let records = self
            .records
            .iter_mut()
            .chain(self.pvs.iter_mut().flat_map(|pv| pv.ads.iter_mut()));
        let mut replaced = 0;
        for (i, record) in records.enumerate() {
            if self.replacers.len() <= i {
                self.replacers.push(FeasignReplacer::new());
            }
            let Some(info) = record.auc_runner else {
                continue;
            };
            let replacer = &mut self.replacers[i];
            if reservoir
                .with_candidate(info.replaced_id, |candidate| {
                    replacer.replace(record, candidate);
                })
                .is_some()
            {
                replaced += 1;
            }
        }
        replaced
    }

    fn restore_candidates(&mut self) {
        let records = self
            .records
            .iter_mut()
            .chain(self.pvs.iter_mut().flat_map(|pv| pv.ads.iter_mut()));
        for (record, replacer) in records.zip(self.replacers.iter_mut()) {
            replacer.replace_back(record);
        }
    }

    /// Writes row-major `values` into the extension area of the current
    /// batch's records, one row per record in batch order. The values stay
    /// with the records and are packed with them in later passes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when records have no extension area or
    /// `values` does not hold one row per record.
    ///
    /// # Panics
    ///
    /// Panics before `start`.
    pub fn store_extension(&mut self, values: &[f32]) -> Result<()> {
        self.state.require(FeedState::Started, "store_extension");
        let width = self.ctx.config().pool.extend_dim;
        if width == 0 || values.len() != self.cur_batch_size * width {
            return Err(Error::Config(format!(
                "expected {} extension values ({} records x {width}), got {}",
                self.cur_batch_size * width,
                self.cur_batch_size,
                values.len()
            )));
        }
        let records = self
            .records
            .iter_mut()
            .chain(self.pvs.iter_mut().flat_map(|pv| pv.ads.iter_mut()));
        for (record, row) in records.zip(values.chunks_exact(width)) {
            record.extension.clear();
            record.extension.extend_from_slice(row);
        }
        Ok(())
    }

    /// The packed current batch, `None` before the first batch or after the
    /// pass ends.
    ///
    /// # Panics
    ///
    /// Panics before `start`.
    #[must_use]
    pub fn assign_output(&self) -> Option<&PackedBatch> {
        self.state.require(FeedState::Started, "assign_output");
        if self.cur_batch_size == 0 {
            return None;
        }
        self.packer.as_ref().map(BatchPacker::batch)
    }

    /// Instance ids of the current batch, in packing order.
    #[must_use]
    pub fn ins_ids(&self) -> &[String] {
        match self.packer.as_ref() {
            Some(packer) if self.cur_batch_size > 0 => packer.batch().ins_ids(),
            _ => &[],
        }
    }

    /// Records in the current batch.
    #[must_use]
    pub fn cur_batch_size(&self) -> usize {
        self.cur_batch_size
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> FeedState {
        self.state
    }

    /// Device ordinal.
    #[must_use]
    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    /// Active reader settings.
    #[must_use]
    pub fn reader_config(&self) -> &ReaderConfig {
        &self.reader
    }

    /// Feasigns removed from and inserted into batches by candidate
    /// replacement so far.
    #[must_use]
    pub fn replaced_feasigns(&self) -> (u64, u64) {
        self.replacers
            .iter()
            .fold((0, 0), |(d, a), r| (d + r.deleted(), a + r.added()))
    }

    /// Time spent staging and gathering batches on the current packer.
    #[must_use]
    pub fn pack_time(&self) -> Duration {
        self.packer.as_ref().map_or(Duration::ZERO, BatchPacker::pack_time)
    }

    /// Time spent in device transfers on the current packer.
    #[must_use]
    pub fn trans_time(&self) -> Duration {
        self.packer.as_ref().map_or(Duration::ZERO, BatchPacker::trans_time)
    }

    /// Ends the pass: releases in-flight records, stops streaming readers and
    /// returns the packer. The feed can then take a new file list.
    ///
    /// # Errors
    ///
    /// Returns the first streaming reader error.
    pub fn finish(&mut self) -> Result<()> {
        if !self.state.is_running() {
            return Ok(());
        }
        self.recycle_batch();
        self.cur_batch_size = 0;

        let mut result = Ok(());
        if let Some(readers) = self.streaming.take() {
            let channel = Arc::clone(readers.channel());
            channel.close();
            let mut leftover = Vec::new();
            channel.read_all(&mut leftover);
            result = readers.join().map(|_| ());
            channel.read_all(&mut leftover);
            if !leftover.is_empty() {
                tracing::debug!(records = leftover.len(), "Released unread streaming records");
            }
            self.ctx.pool().release(leftover);
        }

        if let Some(packer) = self.packer.take() {
            self.ctx.packers().checkin(packer);
        }
        if self.replace_feasigns {
            let (deleted, added) = self.replaced_feasigns();
            tracing::debug!(
                thread_id = self.thread_id,
                deleted,
                added,
                "Feasign replacement totals"
            );
        }
        self.state = FeedState::FileListSet;
        tracing::debug!(thread_id = self.thread_id, "DataFeed finished");
        result
    }

    fn reader_task(&self) -> ReaderTask {
        let Some(parser) = self.parser.clone() else {
            panic!("DataFeed readers require init");
        };
        ReaderTask {
            files: self
                .files
                .clone()
                .unwrap_or_else(|| Arc::new(FileList::default())),
            parser,
            pool: Arc::clone(self.ctx.pool()),
            reservoir: self.ctx.reservoir().cloned(),
            feasigns: Arc::clone(self.ctx.feasigns()),
            sample_rate: self.reader.sample_rate,
            load_archive: self.reader.load_archive,
            seed: self.ctx.config().sampling.seed,
        }
    }

    fn recycle_batch(&mut self) {
        let mut records = std::mem::take(&mut self.records);
        for pv in self.pvs.drain(..) {
            records.extend(pv.into_records());
        }
        if records.is_empty() {
            self.records = records;
            return;
        }

        match &self.output {
            Some(output) => {
                if let Err(ChannelClosed(rejected)) = output.append(records.drain(..)) {
                    self.ctx.pool().release(rejected);
                }
            }
            None => self.ctx.pool().release(records.drain(..)),
        }
        self.records = records;
    }
}

impl<D: Device> Drop for DataFeed<D> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!(error = %e, "DataFeed finished with an error");
        }
    }
}

impl<D: Device> std::fmt::Debug for DataFeed<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFeed")
            .field("state", &self.state)
            .field("kind", &self.reader.kind)
            .field("thread_id", &self.thread_id)
            .field("cur_batch_size", &self.cur_batch_size)
            .finish_non_exhaustive()
    }
}
