//! # `slotfeed` Core
//!
//! Slot-structured record ingestion and batch packing for large-scale sparse
//! training.
//!
//! Reader threads claim input files, parse each line into a [`SlotRecord`]
//! drawn from a recycling [`RecordPool`], and push it into a bounded
//! [`Channel`]. A [`DataFeed`] per device pulls batches from the channel and a
//! [`BatchPacker`] lays them out as per-slot contiguous buffers with offset
//! indices, ready for a compute device.
//!
//! ## Features
//!
//! - **Record pool**: recycled records with a background reclaimer
//! - **Bounded channels**: blocking backpressure, explicit end-of-stream
//! - **Reservoir sampling**: uniform sample of the stream for feature swapping
//! - **Batch packing**: ragged and dense slots, page-view rank offsets
//! - **Binary archives**: compact little-endian record dumps
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use slotfeed_core::{Channel, DataFeed, FeedConfig, FeedContext};
//!
//! let config = FeedConfig::load_from_path("slotfeed.toml")?;
//! let ctx = Arc::new(FeedContext::new(config.clone())?);
//!
//! let mut feed = DataFeed::new(Arc::clone(&ctx));
//! feed.init(&config)?;
//! feed.set_input_channel(Channel::shared(config.reader.queue_capacity));
//! feed.set_file_list(vec!["data/part-000".into()]);
//! feed.load_into_memory()?;
//! feed.start()?;
//!
//! while feed.next()? > 0 {
//!     let batch = feed.assign_output().unwrap();
//!     let click = batch.slot("click")?;
//! }
//! feed.finish()?;
//! ctx.shutdown();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// =============================================================================
// NUMERIC CAST LINTS
// =============================================================================
// Offsets are u32 and ranks are i32 by layout; prefer local allows or
// try_from() in new code.
// =============================================================================
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
// =============================================================================
// STYLISTIC LINTS
// =============================================================================
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::derive_partial_eq_without_eq)]
#![allow(clippy::if_not_else)]
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::use_self)]
#![allow(clippy::significant_drop_in_scrutinee)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::single_match_else)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::wildcard_imports)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::manual_assert)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod archive;
pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod feed;
pub mod files;
pub mod pack;
pub mod parser;
pub mod pool;
pub mod reservoir;
pub mod slot;

pub use archive::{ArchiveReader, ArchiveWriter};
pub use channel::{Channel, ChannelClosed, FeedChannels, PvChannels, RecordChannels};
pub use config::{
    ConfigError, FeedConfig, FeedKind, LoggingConfig, PoolConfig, ReaderConfig, SamplingConfig,
    SlotConfig,
};
pub use context::FeedContext;
pub use error::{Error, Result};
pub use feed::{DataFeed, FeedState, ReaderPool, ReaderTask};
pub use files::{FeasignCounter, FileList};
pub use pack::{
    BatchPacker, Device, DeviceTensor, HostDevice, PackedBatch, PackerPool, SlotData, SlotTensor,
};
pub use parser::{MultiSlotTextParser, ParseOptions, ParserRegistry, SlotParser};
pub use pool::{PoolStats, RecordPool};
pub use reservoir::{FeasignReplacer, RecordCandidate, RecordCandidateList};
pub use slot::{
    merge_by_search_id, AllSlotInfo, AucRunnerInfo, Feasign, FeatureItem, PvInstance, SlotRecord,
    SlotSchema, SlotType, SlotValues, UsedSlotInfo,
};
