//! `slotfeed` Configuration Module
//!
//! Provides configuration file support via `slotfeed.toml`, environment
//! variables, and runtime overrides. Everything here is fixed for the
//! lifetime of a run once the [`crate::FeedContext`] is built.
//!
//! # Priority (highest to lowest)
//!
//! 1. Runtime overrides (CLI flags)
//! 2. Environment variables (`SLOTFEED_*`)
//! 3. Configuration file (`slotfeed.toml`)
//! 4. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::slot::SlotType;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration file.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue {
        /// Configuration key that failed validation.
        key: String,
        /// Validation error message.
        message: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Feed variant selected at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Records are loaded into a shared channel first, then batched (default).
    #[default]
    InMemory,
    /// Reader threads run concurrently with batching through a private queue.
    Streaming,
    /// Records are grouped into page views by search id before batching.
    PageView,
}

/// Reader / orchestrator configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Feed variant.
    pub kind: FeedKind,
    /// Number of file-reading threads.
    pub thread_num: usize,
    /// Records per batch.
    pub batch_size: usize,
    /// Page views per batch (page-view feeds only).
    pub pv_batch_size: usize,
    /// Capacity of the bounded record channel.
    pub queue_capacity: usize,
    /// Probability of keeping a parsed record, in `(0, 1]`.
    pub sample_rate: f32,
    /// First token of every line is the instance id.
    pub parse_ins_id: bool,
    /// Next token is a hex log key carrying search id, cmatch and rank.
    pub parse_logkey: bool,
    /// Keep the raw line as record content.
    pub parse_content: bool,
    /// Merge records sharing a search id into page views. When off, every
    /// record is its own page view.
    pub enable_pv_merge: bool,
    /// Registered parser name.
    pub parser: String,
    /// Input files are binary archives instead of text.
    pub load_archive: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            kind: FeedKind::InMemory,
            thread_num: 4,
            batch_size: 512,
            pv_batch_size: 32,
            queue_capacity: 8192,
            sample_rate: 1.0,
            parse_ins_id: false,
            parse_logkey: false,
            parse_content: false,
            enable_pv_merge: false,
            parser: crate::parser::TEXT_PARSER_NAME.to_string(),
            load_archive: false,
        }
    }
}

/// Record pool configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle records kept before the reclaimer frees the excess.
    pub max_capacity: usize,
    /// Number of background reclaimer threads.
    pub reclaim_threads: usize,
    /// Width of the per-record float extension area (0 = none).
    pub extend_dim: usize,
    /// Release ragged buffer capacity when records are reset.
    pub shrink_on_reset: bool,
    /// Start with pooling disabled (every released record is freed).
    pub disabled: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_capacity: 4_000_000,
            reclaim_threads: 1,
            extend_dim: 0,
            shrink_on_reset: false,
            disabled: false,
        }
    }
}

/// Reservoir sampling configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Reservoir capacity (0 = sampling disabled).
    pub capacity: usize,
    /// Names of uint64 slots projected into candidates and swapped into
    /// batched records.
    pub replace_slots: Vec<String>,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One declared slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Slot name, unique across the schema.
    pub name: String,
    /// Value type.
    #[serde(rename = "type")]
    pub slot_type: SlotType,
    /// Whether the model consumes this slot.
    #[serde(default = "default_true")]
    pub used: bool,
    /// Fixed shape instead of ragged.
    #[serde(default)]
    pub dense: bool,
    /// Dense shape; at most one `-1` dimension inferred per batch.
    #[serde(default)]
    pub shape: Vec<i64>,
}

fn default_true() -> bool {
    true
}

impl SlotConfig {
    /// Convenience constructor for a used, ragged slot.
    #[must_use]
    pub fn ragged(name: impl Into<String>, slot_type: SlotType) -> Self {
        Self {
            name: name.into(),
            slot_type,
            used: true,
            dense: false,
            shape: Vec::new(),
        }
    }

    /// Convenience constructor for a used, dense slot.
    #[must_use]
    pub fn dense(name: impl Into<String>, slot_type: SlotType, shape: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            slot_type,
            used: true,
            dense: true,
            shape,
        }
    }

    /// Marks the slot as declared but not consumed.
    #[must_use]
    pub fn unused(mut self) -> Self {
        self.used = false;
        self
    }
}

/// Main `slotfeed` configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FeedConfig {
    /// Reader configuration.
    pub reader: ReaderConfig,
    /// Record pool configuration.
    pub pool: PoolConfig,
    /// Reservoir configuration.
    pub sampling: SamplingConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Declared slots, in line order.
    pub slots: Vec<SlotConfig>,
}

impl FeedConfig {
    /// Loads configuration from default sources.
    ///
    /// Priority: defaults < file < environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("slotfeed.toml")
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SLOTFEED_").split("__"));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Creates a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let reader = &self.reader;
        if reader.thread_num == 0 || reader.thread_num > 256 {
            return Err(invalid(
                "reader.thread_num",
                format!("value {} is out of range [1, 256]", reader.thread_num),
            ));
        }
        if reader.batch_size == 0 {
            return Err(invalid("reader.batch_size", "must be > 0".to_string()));
        }
        if reader.kind == FeedKind::PageView && reader.pv_batch_size == 0 {
            return Err(invalid("reader.pv_batch_size", "must be > 0".to_string()));
        }
        if reader.queue_capacity == 0 {
            return Err(invalid("reader.queue_capacity", "must be > 0".to_string()));
        }
        if !(reader.sample_rate > 0.0 && reader.sample_rate <= 1.0) {
            return Err(invalid(
                "reader.sample_rate",
                format!("value {} is out of range (0, 1]", reader.sample_rate),
            ));
        }

        if self.pool.reclaim_threads == 0 || self.pool.reclaim_threads > 16 {
            return Err(invalid(
                "pool.reclaim_threads",
                format!("value {} is out of range [1, 16]", self.pool.reclaim_threads),
            ));
        }

        if self.slots.is_empty() {
            return Err(invalid("slots", "at least one slot must be declared".to_string()));
        }
        if !self.slots.iter().any(|s| s.used) {
            return Err(invalid("slots", "no slot is marked used".to_string()));
        }
        for name in &self.sampling.replace_slots {
            match self.slots.iter().find(|s| &s.name == name) {
                Some(slot) if slot.slot_type == SlotType::Uint64 => {}
                Some(_) => {
                    return Err(invalid(
                        "sampling.replace_slots",
                        format!("slot '{name}' is not a uint64 slot"),
                    ))
                }
                None => {
                    return Err(invalid(
                        "sampling.replace_slots",
                        format!("slot '{name}' is not declared"),
                    ))
                }
            }
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(invalid(
                "logging.level",
                format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.level, valid_levels
                ),
            ));
        }

        Ok(())
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

fn invalid(key: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    }
}
