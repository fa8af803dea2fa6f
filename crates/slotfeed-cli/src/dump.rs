//! `archive`, `inspect` and `sample` subcommands.

use anyhow::Context;
use serde_json::{json, Value};
use slotfeed_core::{
    ArchiveReader, ArchiveWriter, Channel, DataFeed, FeedConfig, FeedContext, FeedKind, FileList,
    ParseOptions, ReaderPool, ReaderTask, SlotRecord, SlotType,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Records moved from the channel to the archive per write.
const WRITE_BLOCK: usize = 1024;

/// Printable view of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSummary {
    pub ins_id: String,
    pub search_id: u64,
    pub rank: u32,
    pub cmatch: u32,
    pub uint64_slots: Vec<(String, Vec<u64>)>,
    pub float_slots: Vec<(String, Vec<f32>)>,
}

impl RecordSummary {
    fn new(record: &SlotRecord, ctx: &FeedContext) -> Self {
        let mut summary = Self {
            ins_id: record.ins_id.clone(),
            search_id: record.search_id,
            rank: record.rank,
            cmatch: record.cmatch,
            uint64_slots: Vec::new(),
            float_slots: Vec::new(),
        };
        for info in ctx.schema().all_slots() {
            let idx = info.slot_value_idx;
            match info.slot_type {
                SlotType::Uint64 if idx < record.uint64_feasigns.slot_count() => summary
                    .uint64_slots
                    .push((info.name.clone(), record.uint64_feasigns.slot(idx).to_vec())),
                SlotType::Float if idx < record.float_feasigns.slot_count() => summary
                    .float_slots
                    .push((info.name.clone(), record.float_feasigns.slot(idx).to_vec())),
                _ => {}
            }
        }
        summary
    }

    pub fn to_json(&self) -> Value {
        let uint64: serde_json::Map<String, Value> = self
            .uint64_slots
            .iter()
            .map(|(name, values)| (name.clone(), json!(values)))
            .collect();
        let float: serde_json::Map<String, Value> = self
            .float_slots
            .iter()
            .map(|(name, values)| (name.clone(), json!(values)))
            .collect();
        json!({
            "ins_id": self.ins_id,
            "search_id": self.search_id,
            "rank": self.rank,
            "cmatch": self.cmatch,
            "uint64": uint64,
            "float": float,
        })
    }
}

pub fn format_record(record: &RecordSummary) -> String {
    let mut out = format!(
        "{} search_id={} rank={} cmatch={}",
        record.ins_id, record.search_id, record.rank, record.cmatch
    );
    for (name, values) in &record.uint64_slots {
        out.push_str(&format!(" {}={:?}", name, values));
    }
    for (name, values) in &record.float_slots {
        out.push_str(&format!(" {}={:?}", name, values));
    }
    out
}

/// Parses `files` with the configured parser and writes every record to
/// `output`. Returns the number of records written.
pub fn archive(config: FeedConfig, files: Vec<PathBuf>, output: &Path) -> anyhow::Result<u64> {
    let ctx = FeedContext::new(config)?;
    let reader = &ctx.config().reader;
    let parser = ctx.registry().load(
        &reader.parser,
        ctx.schema().all_slots(),
        ParseOptions::from(reader),
    )?;
    let task = ReaderTask {
        files: Arc::new(FileList::new(files)),
        parser,
        pool: Arc::clone(ctx.pool()),
        reservoir: None,
        feasigns: Arc::clone(ctx.feasigns()),
        sample_rate: reader.sample_rate,
        load_archive: false,
        seed: ctx.config().sampling.seed,
    };

    let writer = ArchiveWriter::create(output)
        .with_context(|| format!("cannot create {}", output.display()))?;
    let channel = Channel::shared(reader.queue_capacity);
    let readers = ReaderPool::spawn(&task, reader.thread_num, Arc::clone(&channel))?;

    let mut block = Vec::with_capacity(WRITE_BLOCK);
    let mut write_result = Ok(());
    while channel.pop_batch(WRITE_BLOCK, &mut block) > 0 {
        if write_result.is_ok() {
            write_result = writer.write_all(&block);
            if write_result.is_err() {
                channel.close();
            }
        }
        ctx.pool().release(block.drain(..));
    }

    readers.join()?;
    write_result?;
    writer.close()?;
    let written = writer.records_written();
    tracing::info!(records = written, output = %output.display(), "Archive written");
    ctx.shutdown();
    Ok(written)
}

/// Reads up to `limit` records of an archive.
pub fn inspect(
    config: FeedConfig,
    file: &Path,
    limit: usize,
) -> anyhow::Result<Vec<RecordSummary>> {
    let ctx = FeedContext::new(config)?;
    let reader = ArchiveReader::open(file, Arc::clone(ctx.pool()))
        .with_context(|| format!("cannot open {}", file.display()))?;

    let mut summaries = Vec::new();
    for record in reader.take(limit) {
        let record = record?;
        summaries.push(RecordSummary::new(&record, &ctx));
        ctx.pool().release_one(record);
    }
    ctx.shutdown();
    Ok(summaries)
}

/// Result of the `sample` subcommand.
#[derive(Debug)]
pub struct Sample {
    pub seen: usize,
    pub resident: Vec<String>,
}

/// Loads `files` and returns the ids held by the reservoir.
pub fn sample(mut config: FeedConfig, files: Vec<PathBuf>) -> anyhow::Result<Sample> {
    anyhow::ensure!(config.sampling.capacity > 0, "sampling.capacity must be > 0");
    config.reader.kind = FeedKind::InMemory;
    let ctx = Arc::new(FeedContext::new(config.clone())?);

    let input = Channel::shared(config.reader.queue_capacity);
    let mut feed = DataFeed::new(Arc::clone(&ctx));
    feed.init(&config)?;
    feed.set_input_channel(Arc::clone(&input));
    feed.set_file_list(files);
    feed.load_into_memory()?;

    let mut records = Vec::new();
    input.read_all(&mut records);
    ctx.pool().release(records);

    let reservoir = ctx.reservoir().context("reservoir is not configured")?;
    reservoir.reinit_pass();
    let sample = Sample {
        seen: reservoir.total_seen(),
        resident: reservoir.resident_ids(),
    };
    drop(feed);
    ctx.shutdown();
    Ok(sample)
}
