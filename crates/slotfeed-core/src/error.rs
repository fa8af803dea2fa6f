//! Error types for `slotfeed`.
//!
//! This module provides a unified error type for all ingestion, sampling and
//! packing operations. Contract violations of the feed state machine are not
//! represented here: they panic, because callers must follow the fixed
//! `init -> set_file_list -> start -> next` sequence.

use thiserror::Error;

/// Result type alias for `slotfeed` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in `slotfeed` operations.
///
/// Error codes follow the pattern `FEED-XXX` for easy grepping in logs.
#[derive(Error, Debug)]
pub enum Error {
    /// Slot schema is inconsistent (FEED-001).
    #[error("[FEED-001] Schema error: {0}")]
    Schema(String),

    /// Unknown slot name (FEED-002).
    #[error("[FEED-002] Slot '{0}' not found")]
    SlotNotFound(String),

    /// Input line could not be parsed (FEED-003).
    ///
    /// Readers skip the offending line and continue.
    #[error("[FEED-003] Parse error at line {line}: {message}")]
    Parse {
        /// 1-based line number inside the current file (0 when unknown).
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// Parser capability could not be loaded (FEED-004).
    #[error("[FEED-004] Failed to load parser '{name}': {reason}")]
    ParserLoad {
        /// Registered parser name.
        name: String,
        /// Why loading failed.
        reason: String,
    },

    /// Binary archive is truncated or corrupt (FEED-005).
    #[error("[FEED-005] Archive error: {0}")]
    Archive(String),

    /// Configuration error (FEED-006).
    #[error("[FEED-006] Configuration error: {0}")]
    Config(String),

    /// Push on a closed channel (FEED-007).
    #[error("[FEED-007] Channel closed")]
    ChannelClosed,

    /// Device transfer failed (FEED-008).
    #[error("[FEED-008] Device {device} error: {message}")]
    Device {
        /// Device ordinal.
        device: usize,
        /// Failure description.
        message: String,
    },

    /// IO error (FEED-009).
    #[error("[FEED-009] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (FEED-010).
    ///
    /// Indicates an unexpected internal error. Please report if encountered.
    #[error("[FEED-010] Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code (e.g., "FEED-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Schema(_) => "FEED-001",
            Self::SlotNotFound(_) => "FEED-002",
            Self::Parse { .. } => "FEED-003",
            Self::ParserLoad { .. } => "FEED-004",
            Self::Archive(_) => "FEED-005",
            Self::Config(_) => "FEED-006",
            Self::ChannelClosed => "FEED-007",
            Self::Device { .. } => "FEED-008",
            Self::Io(_) => "FEED-009",
            Self::Internal(_) => "FEED-010",
        }
    }

    /// Returns true if a reader may skip the failing unit and continue.
    ///
    /// Malformed lines and closed channels are part of normal operation;
    /// everything else aborts the current reader.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::ChannelClosed)
    }

    /// Shorthand for a parse error without line context.
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            line: 0,
            message: message.into(),
        }
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
