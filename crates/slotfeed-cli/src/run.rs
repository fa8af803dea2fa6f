//! `run` subcommand: one feed thread per device.

use anyhow::Context;
use slotfeed_core::{Channel, DataFeed, FeedConfig, FeedContext, FeedKind, PvInstance, SlotRecord};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Batches between two progress log lines.
const PROGRESS_EVERY: usize = 100;

/// What one device thread did.
#[derive(Debug, Clone, Default)]
pub struct DeviceReport {
    pub device: usize,
    pub batches: usize,
    pub records: usize,
    pub pack_time: Duration,
    pub trans_time: Duration,
}

/// Totals of a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub devices: Vec<DeviceReport>,
    pub batches: usize,
    pub records: usize,
    pub feasigns: u64,
    pub elapsed: Duration,
}

enum Progress {
    Batch { device: usize, records: usize },
    Done(DeviceReport),
}

/// Channels shared by every device of an in-memory or page-view run.
#[derive(Clone, Default)]
struct SharedInput {
    records: Option<Arc<Channel<SlotRecord>>>,
    pvs: Option<Arc<Channel<PvInstance>>>,
}

pub fn run(config: FeedConfig, files: Vec<PathBuf>, devices: usize) -> anyhow::Result<RunSummary> {
    let start = Instant::now();
    let devices = devices.max(1);
    let ctx = Arc::new(FeedContext::new(config.clone())?);
    let shared = preload(&ctx, &config, &files)?;

    let (tx, rx) = crossbeam_channel::unbounded();
    let mut handles = Vec::with_capacity(devices);
    for device in 0..devices {
        let ctx = Arc::clone(&ctx);
        let config = config.clone();
        let shared = shared.clone();
        let files = device_files(&config, &files, device, devices);
        let tx = tx.clone();
        let handle = thread::Builder::new()
            .name(format!("slotfeed-device-{device}"))
            .spawn(move || drive_device(&ctx, &config, device, files, &shared, &tx))
            .context("failed to spawn device thread")?;
        handles.push(handle);
    }
    drop(tx);

    let mut summary = RunSummary::default();
    for progress in rx {
        match progress {
            Progress::Batch { device, records } => {
                summary.batches += 1;
                summary.records += records;
                if summary.batches % PROGRESS_EVERY == 0 {
                    tracing::info!(
                        device,
                        batches = summary.batches,
                        records = summary.records,
                        "Progress"
                    );
                }
            }
            Progress::Done(report) => summary.devices.push(report),
        }
    }

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("device thread panicked"))??;
    }

    summary.devices.sort_by_key(|r| r.device);
    summary.feasigns = ctx.feasigns().get();
    summary.elapsed = start.elapsed();
    ctx.shutdown();
    Ok(summary)
}

/// Loads everything up front for in-memory and page-view runs.
fn preload(
    ctx: &Arc<FeedContext>,
    config: &FeedConfig,
    files: &[PathBuf],
) -> anyhow::Result<SharedInput> {
    if config.reader.kind == FeedKind::Streaming {
        return Ok(SharedInput::default());
    }

    let records = Channel::shared(config.reader.queue_capacity);
    let pvs = (config.reader.kind == FeedKind::PageView)
        .then(|| Channel::shared(config.reader.queue_capacity));

    let mut loader = DataFeed::new(Arc::clone(ctx));
    loader.init(config)?;
    loader.set_input_channel(Arc::clone(&records));
    if let Some(pvs) = &pvs {
        loader.set_input_pv_channel(Arc::clone(pvs));
    }
    loader.set_file_list(files.to_vec());
    let loaded = loader.load_into_memory()?;
    tracing::info!(records = loaded, files = files.len(), "Preloaded input");

    Ok(SharedInput {
        records: Some(records),
        pvs,
    })
}

/// Streaming devices split the files round-robin; others share the loaded
/// channel and need no files.
fn device_files(
    config: &FeedConfig,
    files: &[PathBuf],
    device: usize,
    devices: usize,
) -> Vec<PathBuf> {
    if config.reader.kind != FeedKind::Streaming {
        return Vec::new();
    }
    files
        .iter()
        .skip(device)
        .step_by(devices)
        .cloned()
        .collect()
}

fn drive_device(
    ctx: &Arc<FeedContext>,
    config: &FeedConfig,
    device: usize,
    files: Vec<PathBuf>,
    shared: &SharedInput,
    tx: &crossbeam_channel::Sender<Progress>,
) -> anyhow::Result<()> {
    let mut feed = DataFeed::new(Arc::clone(ctx));
    feed.set_thread_id(device);
    feed.init(config)?;
    if let Some(records) = &shared.records {
        feed.set_input_channel(Arc::clone(records));
    }
    if let Some(pvs) = &shared.pvs {
        feed.set_input_pv_channel(Arc::clone(pvs));
    }
    feed.set_file_list(files);
    feed.start()
        .with_context(|| format!("device {device} failed to start"))?;

    let mut report = DeviceReport {
        device,
        ..DeviceReport::default()
    };
    loop {
        let records = feed.next()?;
        if records == 0 {
            break;
        }
        report.batches += 1;
        report.records += records;
        if let Some(batch) = feed.assign_output() {
            tracing::trace!(
                device,
                ins_num = batch.ins_num(),
                pv_num = batch.pv_num(),
                "Packed batch"
            );
        }
        // the receiver lives until every device is done
        let _ = tx.send(Progress::Batch { device, records });
    }

    report.pack_time = feed.pack_time();
    report.trans_time = feed.trans_time();
    feed.finish()?;
    let _ = tx.send(Progress::Done(report));
    Ok(())
}
