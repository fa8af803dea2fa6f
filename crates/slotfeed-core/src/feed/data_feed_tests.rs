//! Tests for `data_feed` module - feed state machine and variants.

use super::*;
use crate::archive::ArchiveWriter;
use crate::channel::Channel;
use crate::channel::RecordChannels;
use crate::config::{FeedConfig, FeedKind, ReaderConfig, SamplingConfig, SlotConfig};
use crate::context::FeedContext;
use crate::error::Error;
use crate::slot::{PvInstance, SlotRecord, SlotType};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

fn config(kind: FeedKind) -> FeedConfig {
    FeedConfig {
        reader: ReaderConfig {
            kind,
            thread_num: 2,
            batch_size: 4,
            pv_batch_size: 8,
            queue_capacity: 3,
            parse_ins_id: true,
            ..ReaderConfig::default()
        },
        slots: vec![
            SlotConfig::ragged("click", SlotType::Uint64),
            SlotConfig::ragged("ctr", SlotType::Float),
        ],
        ..FeedConfig::default()
    }
}

/// Writes `files` files of `lines` records each; ids are `f{file}-{line}`.
fn write_files(dir: &tempfile::TempDir, files: usize, lines: usize) -> Vec<PathBuf> {
    (0..files)
        .map(|f| {
            let mut text = String::new();
            for l in 0..lines {
                writeln!(text, "f{f}-{l} 1 {l} 1 0.5").expect("format");
            }
            let path = dir.path().join(format!("part-{f:03}"));
            std::fs::write(&path, text).expect("write");
            path
        })
        .collect()
}

fn feed(config: &FeedConfig) -> (Arc<FeedContext>, DataFeed) {
    let ctx = Arc::new(FeedContext::new(config.clone()).expect("context"));
    let mut feed = DataFeed::new(Arc::clone(&ctx));
    feed.init(config).expect("init");
    (ctx, feed)
}

/// Runs `next` until exhaustion, collecting batch sizes and ids.
fn drain(feed: &mut DataFeed) -> (Vec<usize>, HashSet<String>) {
    let mut sizes = Vec::new();
    let mut ids = HashSet::new();
    loop {
        let n = feed.next().expect("next");
        if n == 0 {
            break;
        }
        sizes.push(n);
        assert_eq!(feed.cur_batch_size(), n);
        assert_eq!(feed.ins_ids().len(), n);
        ids.extend(feed.ins_ids().iter().cloned());
    }
    (sizes, ids)
}

#[test]
fn test_in_memory_feed_batches_every_record() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_files(&dir, 3, 5);
    let config = config(FeedKind::InMemory);
    let (ctx, mut feed) = feed(&config);
    feed.set_input_channel(Channel::shared(1024));
    feed.set_file_list(files);

    // Act
    let loaded = feed.load_into_memory().expect("load");
    feed.start().expect("start");
    let (sizes, ids) = drain(&mut feed);

    // Assert
    assert_eq!(loaded, 15);
    assert_eq!(sizes, vec![4, 4, 4, 3]);
    assert_eq!(ids.len(), 15);
    assert!(ids.contains("f2-4"));
    assert_eq!(feed.state(), FeedState::EndOfEpoch);
    assert_eq!(ctx.pool().stats().in_flight, 0);
    assert_eq!(ctx.feasigns().get(), 30);
}

#[test]
fn test_load_lifts_channel_bound_while_loading() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_files(&dir, 2, 50);
    let config = config(FeedKind::InMemory);
    let (_ctx, mut feed) = feed(&config);
    let input = Channel::shared(4);
    feed.set_input_channel(Arc::clone(&input));
    feed.set_file_list(files);

    // Act
    let loaded = feed.load_into_memory().expect("load");

    // Assert
    assert_eq!(loaded, 100);
    assert_eq!(input.len(), 100);
    assert_eq!(input.capacity(), 4);
    assert!(input.is_closed());
}

#[test]
fn test_consumed_records_move_to_output_channel() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_files(&dir, 2, 5);
    let config = config(FeedKind::InMemory);
    let (ctx, mut feed) = feed(&config);
    let output = Channel::shared(1024);
    feed.set_input_channel(Channel::shared(1024));
    feed.set_output_channel(Arc::clone(&output));
    feed.set_file_list(files);

    // Act
    feed.load_into_memory().expect("load");
    feed.start().expect("start");
    let (sizes, _) = drain(&mut feed);

    // Assert
    assert_eq!(sizes.iter().sum::<usize>(), 10);
    assert_eq!(output.len(), 10);
    assert_eq!(ctx.pool().stats().in_flight, 10);
}

#[test]
fn test_streaming_feed_reads_concurrently_with_small_queue() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_files(&dir, 4, 25);
    let config = config(FeedKind::Streaming);
    let (ctx, mut feed) = feed(&config);
    feed.set_file_list(files);

    // Act
    feed.start().expect("start");
    let (sizes, ids) = drain(&mut feed);
    feed.finish().expect("finish");

    // Assert
    assert_eq!(sizes.iter().sum::<usize>(), 100);
    assert_eq!(ids.len(), 100);
    assert_eq!(feed.state(), FeedState::FileListSet);
    assert_eq!(ctx.pool().stats().in_flight, 0);
}

#[test]
fn test_streaming_finish_mid_pass_releases_everything() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_files(&dir, 4, 200);
    let config = config(FeedKind::Streaming);
    let (ctx, mut feed) = feed(&config);
    feed.set_file_list(files);
    feed.start().expect("start");

    // Act
    let first = feed.next().expect("next");
    feed.finish().expect("finish");

    // Assert
    assert!(first > 0);
    assert_eq!(ctx.pool().stats().in_flight, 0);
    assert!(!ctx.packers().is_checked_out(0));
}

#[test]
fn test_streaming_feed_can_run_a_second_pass() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_files(&dir, 2, 10);
    let config = config(FeedKind::Streaming);
    let (_ctx, mut feed) = feed(&config);
    feed.set_file_list(files.clone());
    feed.start().expect("start");
    drain(&mut feed);
    feed.finish().expect("finish");

    // Act
    feed.set_file_list(files);
    feed.start().expect("restart");
    let (sizes, _) = drain(&mut feed);

    // Assert
    assert_eq!(sizes.iter().sum::<usize>(), 20);
}

#[test]
fn test_page_view_feed_groups_by_search_id() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let lines = [
        ("a0", "000000000000de01000000000000000a"),
        ("b0", "000000000000de01000000000000000b"),
        ("a1", "000000000000de02000000000000000a"),
        ("a2", "000000000000df03000000000000000a"),
        ("b1", "000000000000de02000000000000000b"),
    ];
    let mut text = String::new();
    for (id, key) in lines {
        writeln!(text, "{id} {key} 1 1 1 0.5").expect("format");
    }
    let path = dir.path().join("pv");
    std::fs::write(&path, text).expect("write");

    let mut config = config(FeedKind::PageView);
    config.reader.thread_num = 1;
    config.reader.parse_logkey = true;
    config.reader.enable_pv_merge = true;
    let (_ctx, mut feed) = feed(&config);
    let pvs: Arc<Channel<PvInstance>> = Channel::shared(16);
    feed.set_input_channel(Channel::shared(16));
    feed.set_input_pv_channel(Arc::clone(&pvs));
    feed.set_file_list(vec![path]);

    // Act
    let loaded = feed.load_into_memory().expect("load");
    assert_eq!(pvs.len(), 2);
    feed.start().expect("start");
    let n = feed.next().expect("next");

    // Assert
    assert_eq!(loaded, 5);
    assert_eq!(n, 5);
    let batch = feed.assign_output().expect("batch");
    assert_eq!(batch.pv_num(), 2);
    assert_eq!(batch.ad_offset(), &[0, 3, 5]);
    assert_eq!(feed.ins_ids(), &["a0", "a1", "a2", "b0", "b1"]);
    assert_eq!(feed.next().expect("next"), 0);
}

#[test]
fn test_malformed_lines_are_skipped() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("mixed");
    std::fs::write(&path, "ok-0 1 5 1 0.5\nbroken 3 1\n\nok-1 1 6 1 0.25\n").expect("write");
    let config = config(FeedKind::InMemory);
    let (ctx, mut feed) = feed(&config);
    feed.set_input_channel(Channel::shared(16));
    feed.set_file_list(vec![path]);

    // Act
    let loaded = feed.load_into_memory().expect("load");

    // Assert
    assert_eq!(loaded, 2);
    assert_eq!(ctx.pool().stats().in_flight, 2);
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(FeedKind::InMemory);
    let (_ctx, mut feed) = feed(&config);
    feed.set_input_channel(Channel::shared(16));
    feed.set_file_list(vec![dir.path().join("absent")]);

    let result = feed.load_into_memory();

    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_sample_rate_drops_records() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_files(&dir, 2, 200);
    let mut config = config(FeedKind::InMemory);
    config.sampling = SamplingConfig {
        seed: Some(7),
        ..SamplingConfig::default()
    };
    let (ctx, mut feed) = feed(&config);
    feed.set_input_channel(Channel::shared(16));
    feed.set_file_list(files);

    // Act
    assert!(feed.set_sample_rate(0.0).is_err());
    assert!(feed.set_sample_rate(1.5).is_err());
    feed.set_sample_rate(0.5).expect("rate");
    let loaded = feed.load_into_memory().expect("load");

    // Assert
    assert!(loaded > 100 && loaded < 300, "kept {loaded} of 400");
    assert_eq!(ctx.pool().stats().in_flight, loaded as i64);
}

#[test]
fn test_load_archive_files() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("part.bin");
    let writer = ArchiveWriter::create(&path).expect("create");
    for i in 0..6u64 {
        let mut record = SlotRecord {
            ins_id: format!("bin-{i}"),
            ..SlotRecord::default()
        };
        record.uint64_feasigns.add_slot_feasigns(&[vec![i]]);
        record.float_feasigns.add_slot_feasigns(&[vec![0.5]]);
        writer.write(&record).expect("write");
    }
    writer.close().expect("close");

    let config = config(FeedKind::InMemory);
    let (_ctx, mut feed) = feed(&config);
    feed.set_input_channel(Channel::shared(16));
    feed.set_load_archive(true);
    feed.set_file_list(vec![path]);

    // Act
    let loaded = feed.load_into_memory().expect("load");
    feed.start().expect("start");
    let (sizes, ids) = drain(&mut feed);

    // Assert
    assert_eq!(loaded, 6);
    assert_eq!(sizes, vec![4, 2]);
    assert!(ids.contains("bin-5"));
}

#[test]
fn test_reservoir_sees_every_loaded_record() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_files(&dir, 3, 10);
    let mut config = config(FeedKind::InMemory);
    config.sampling = SamplingConfig {
        capacity: 5,
        replace_slots: vec!["click".to_string()],
        seed: Some(3),
    };
    let (ctx, mut feed) = feed(&config);
    feed.set_input_channel(Channel::shared(64));
    feed.set_file_list(files);

    // Act
    feed.load_into_memory().expect("load");

    // Assert
    let reservoir = ctx.reservoir().expect("reservoir");
    assert_eq!(reservoir.total_seen(), 30);
    assert_eq!(reservoir.resident_ids().len(), 5);
}

#[test]
fn test_same_device_cannot_start_twice() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_files(&dir, 1, 2);
    let config = config(FeedKind::InMemory);
    let (ctx, mut first) = feed(&config);
    let mut second = DataFeed::new(Arc::clone(&ctx));
    second.init(&config).expect("init");
    for feed in [&mut first, &mut second] {
        feed.set_input_channel(Channel::shared(16));
        feed.set_file_list(files.clone());
    }

    // Act
    first.start().expect("start");
    let result = second.start();

    // Assert
    assert!(matches!(result, Err(Error::Device { device: 0, .. })));
    second.set_thread_id(1);
    second.start().expect("other device");
}

#[test]
fn test_assign_output_is_none_before_first_batch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(FeedKind::InMemory);
    let (_ctx, mut feed) = feed(&config);
    feed.set_input_channel(Channel::shared(16));
    feed.set_file_list(write_files(&dir, 1, 1));
    feed.start().expect("start");

    assert!(feed.assign_output().is_none());
    assert!(feed.ins_ids().is_empty());
}

#[test]
fn test_unknown_parser_fails_init() {
    let mut config = config(FeedKind::InMemory);
    let ctx = Arc::new(FeedContext::new(config.clone()).expect("context"));
    config.reader.parser = "missing".to_string();
    let mut feed = DataFeed::new(ctx);

    let result = feed.init(&config);

    assert!(matches!(result, Err(Error::ParserLoad { .. })));
    assert_eq!(feed.state(), FeedState::Uninitialized);
}

#[test]
#[should_panic(expected = "requires Started")]
fn test_next_before_start_panics() {
    let config = config(FeedKind::InMemory);
    let (_ctx, mut feed) = feed(&config);
    feed.set_file_list(Vec::new());
    let _ = feed.next();
}

#[test]
#[should_panic(expected = "requires Initialized")]
fn test_set_file_list_before_init_panics() {
    let config = config(FeedKind::InMemory);
    let ctx = Arc::new(FeedContext::new(config).expect("context"));
    let mut feed = DataFeed::new(ctx);
    feed.set_file_list(Vec::new());
}

#[test]
#[should_panic(expected = "not available for streaming")]
fn test_load_into_memory_on_streaming_feed_panics() {
    let config = config(FeedKind::Streaming);
    let (_ctx, mut feed) = feed(&config);
    feed.set_file_list(Vec::new());
    let _ = feed.load_into_memory();
}

#[test]
fn test_output_channel_smaller_than_the_pass_does_not_stall() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_files(&dir, 4, 5);
    let config = config(FeedKind::InMemory);
    let (ctx, mut feed) = feed(&config);
    let channels = RecordChannels::new(config.reader.queue_capacity);
    feed.set_input_channel(Arc::clone(&channels.input));
    feed.set_output_channel(Arc::clone(&channels.output));
    feed.set_file_list(files);

    // Act
    feed.load_into_memory().expect("load");
    feed.start().expect("start");
    let (sizes, ids) = drain(&mut feed);
    feed.finish().expect("finish");

    // Assert
    assert_eq!(sizes, vec![4, 4, 4, 4, 4]);
    assert_eq!(ids.len(), 20);
    assert_eq!(channels.output.len(), 20);
    assert_eq!(channels.output.capacity(), 3);
    assert_eq!(ctx.pool().stats().in_flight, 20);
}

#[test]
fn test_rewound_channels_feed_a_second_epoch() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_files(&dir, 4, 5);
    let config = config(FeedKind::InMemory);
    let (_ctx, mut feed) = feed(&config);
    let channels = RecordChannels::new(config.reader.queue_capacity);
    feed.set_input_channel(Arc::clone(&channels.input));
    feed.set_output_channel(Arc::clone(&channels.output));
    feed.set_file_list(files);
    feed.load_into_memory().expect("load");
    feed.start().expect("start");
    let (_, first) = drain(&mut feed);
    feed.finish().expect("finish");

    // Act
    let moved = channels.rewind(Some(1));
    feed.start().expect("restart");
    let (sizes, second) = drain(&mut feed);
    feed.finish().expect("finish");

    // Assert
    assert_eq!(moved, 20);
    assert_eq!(sizes.iter().sum::<usize>(), 20);
    assert_eq!(first, second);
    assert_eq!(channels.output.len(), 20);
}

#[test]
fn test_feeds_with_other_parse_options_keep_their_own_parser() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let with_ids = config(FeedKind::InMemory);
    let (ctx, mut first) = feed(&with_ids);
    first.set_input_channel(Channel::shared(16));
    first.set_file_list(write_files(&dir, 1, 3));

    let mut without_ids = with_ids.clone();
    without_ids.reader.parse_ins_id = false;
    let mut second = DataFeed::new(Arc::clone(&ctx));
    second.init(&without_ids).expect("init");
    let path = dir.path().join("no-ids");
    std::fs::write(&path, "1 7 1 0.5\n1 8 1 0.25\n").expect("write");
    second.set_input_channel(Channel::shared(16));
    second.set_file_list(vec![path]);

    // Act
    let loaded_first = first.load_into_memory().expect("load with ids");
    let loaded_second = second.load_into_memory().expect("load without ids");

    // Assert
    assert_eq!(loaded_first, 3);
    assert_eq!(loaded_second, 2);
}

#[test]
fn test_page_views_without_merge_hold_one_record_each() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_files(&dir, 1, 5);
    let mut config = config(FeedKind::PageView);
    config.reader.thread_num = 1;
    let (_ctx, mut feed) = feed(&config);
    let pvs: Arc<Channel<PvInstance>> = Channel::shared(16);
    feed.set_input_channel(Channel::shared(16));
    feed.set_input_pv_channel(Arc::clone(&pvs));
    feed.set_file_list(files);

    // Act
    feed.load_into_memory().expect("load");
    assert_eq!(pvs.len(), 5);
    feed.start().expect("start");
    let n = feed.next().expect("next");

    // Assert
    assert_eq!(n, 5);
    let batch = feed.assign_output().expect("batch");
    assert_eq!(batch.pv_num(), 5);
    assert_eq!(batch.ad_offset(), &[0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_batches_carry_candidate_feasigns_in_replaced_slots() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let files = write_files(&dir, 1, 12);
    let mut config = config(FeedKind::InMemory);
    config.reader.thread_num = 1;
    config.sampling = SamplingConfig {
        capacity: 2,
        replace_slots: vec!["click".to_string()],
        seed: Some(4),
    };
    let (ctx, mut feed) = feed(&config);
    let output = Channel::shared(64);
    feed.set_input_channel(Channel::shared(64));
    feed.set_output_channel(Arc::clone(&output));
    feed.set_file_list(files);
    feed.load_into_memory().expect("load");
    feed.start().expect("start");

    // Act
    let mut packed_clicks: HashMap<String, u64> = HashMap::new();
    while feed.next().expect("next") > 0 {
        let batch = feed.assign_output().expect("batch");
        let click = batch.slot("click").expect("click");
        let values = click.data.as_uint64().expect("uint64");
        for (r, id) in batch.ins_ids().iter().enumerate() {
            packed_clicks.insert(id.clone(), values[click.record_span(r)][0]);
        }
    }
    let (deleted, added) = feed.replaced_feasigns();
    feed.finish().expect("finish");

    // Assert
    let reservoir = ctx.reservoir().expect("reservoir");
    let mut records = Vec::new();
    output.read_all(&mut records);
    assert_eq!(records.len(), 12);
    assert_eq!(packed_clicks.len(), 12);
    for record in &records {
        let line: u64 = record.ins_id["f0-".len()..].parse().expect("line");
        assert_eq!(record.uint64_feasigns.slot(0), &[line]);
        let info = record.auc_runner.expect("candidate drawn");
        let candidate = reservoir.get(info.replaced_id).expect("candidate");
        assert_eq!(packed_clicks[&record.ins_id], candidate.feas[&0][0]);
    }
    assert_eq!((deleted, added), (12, 12));
}

#[test]
fn test_each_load_folds_the_previous_pass() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config(FeedKind::InMemory);
    config.reader.thread_num = 1;
    config.sampling = SamplingConfig {
        capacity: 2,
        replace_slots: Vec::new(),
        seed: Some(8),
    };
    let (ctx, mut feed) = feed(&config);
    feed.set_input_channel(Channel::shared(64));
    feed.set_file_list(write_files(&dir, 1, 40));
    feed.load_into_memory().expect("load");
    let reservoir = ctx.reservoir().expect("reservoir");
    let replaced_this_pass = reservoir.get(2).is_some();

    // Act
    feed.set_input_channel(Channel::shared(64));
    feed.set_file_list(Vec::new());
    feed.load_into_memory().expect("empty load");

    // Assert
    assert!(replaced_this_pass);
    assert!(reservoir.get(2).is_none());
    assert_eq!(reservoir.resident_ids().len(), 2);
}

#[test]
fn test_store_extension_writes_rows_into_batched_records() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config(FeedKind::InMemory);
    config.reader.thread_num = 1;
    config.pool.extend_dim = 2;
    let (_ctx, mut feed) = feed(&config);
    let output = Channel::shared(16);
    feed.set_input_channel(Channel::shared(16));
    feed.set_output_channel(Arc::clone(&output));
    feed.set_file_list(write_files(&dir, 1, 4));
    feed.load_into_memory().expect("load");
    feed.start().expect("start");
    assert_eq!(feed.next().expect("next"), 4);
    let ids = feed.ins_ids().to_vec();

    // Act
    let short = feed.store_extension(&[1.0; 7]);
    let rows = [0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5];
    feed.store_extension(&rows).expect("store");
    assert_eq!(feed.next().expect("next"), 0);

    // Assert
    assert!(matches!(short, Err(Error::Config(_))));
    let mut records = Vec::new();
    output.read_all(&mut records);
    let by_id: HashMap<&str, &[f32]> = records
        .iter()
        .map(|r| (r.ins_id.as_str(), r.extension.as_slice()))
        .collect();
    for (row, id) in ids.iter().enumerate() {
        let first = row as f32;
        assert_eq!(by_id[id.as_str()], &[first, first + 0.5]);
    }
}

#[test]
fn test_store_extension_without_extension_area_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(FeedKind::InMemory);
    let (_ctx, mut feed) = feed(&config);
    feed.set_input_channel(Channel::shared(16));
    feed.set_file_list(write_files(&dir, 1, 2));
    feed.load_into_memory().expect("load");
    feed.start().expect("start");
    feed.next().expect("next");

    let result = feed.store_extension(&[]);

    assert!(matches!(result, Err(Error::Config(_))));
}
