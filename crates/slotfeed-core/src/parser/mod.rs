//! Parsing capability.
//!
//! A [`SlotParser`] turns one input line into one [`SlotRecord`]. Parsers are
//! registered by name in a [`ParserRegistry`] together with the ABI version
//! they were built against; loading a parser whose version does not match
//! [`PARSER_ABI_VERSION`] fails with [`Error::ParserLoad`].

mod registry;
mod text;

pub use registry::{ParserFactory, ParserRegistry};
pub use text::{decode_logkey, LogKey, MultiSlotTextParser};

use std::io::BufRead;

use crate::config::ReaderConfig;
use crate::error::{Error, Result};
use crate::pool::RecordPool;
use crate::slot::{AllSlotInfo, SlotRecord};

/// ABI version parsers must report to be loadable.
pub const PARSER_ABI_VERSION: u32 = 1;

/// Registry name of the built-in [`MultiSlotTextParser`].
pub const TEXT_PARSER_NAME: &str = "multi_slot_text";

/// Line-level parsing switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// First token is the instance id.
    pub parse_ins_id: bool,
    /// Next token is a log key carrying search id, cmatch and rank.
    pub parse_logkey: bool,
    /// Keep the raw line as record content.
    pub parse_content: bool,
}

impl From<&ReaderConfig> for ParseOptions {
    fn from(reader: &ReaderConfig) -> Self {
        Self {
            parse_ins_id: reader.parse_ins_id,
            parse_logkey: reader.parse_logkey,
            parse_content: reader.parse_content,
        }
    }
}

/// Parses text lines into records.
pub trait SlotParser: Send + Sync {
    /// ABI version the parser was built against.
    fn abi_version(&self) -> u32;

    /// Binds the parser to the declared slots, in line order.
    ///
    /// # Errors
    ///
    /// Returns an error if the parser cannot handle the schema.
    fn init(&mut self, slots: &[AllSlotInfo]) -> Result<()>;

    /// Parses one line into `record`, which arrives reset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] for a malformed line.
    fn parse_one(&self, line: &str, record: &mut SlotRecord) -> Result<()>;

    /// Parses every line of `reader`, acquiring records from `pool` and
    /// handing each parsed record to `emit`.
    ///
    /// Blank lines are ignored. Malformed lines are logged, their record is
    /// released, and parsing continues. Returns the number of emitted records.
    ///
    /// # Errors
    ///
    /// Returns I/O errors, non-recoverable parse errors, and errors from
    /// `emit`.
    fn parse_file(
        &self,
        reader: &mut dyn BufRead,
        pool: &RecordPool,
        emit: &mut dyn FnMut(SlotRecord) -> Result<()>,
    ) -> Result<usize> {
        let mut buf = String::new();
        let mut line_no = 0usize;
        let mut emitted = 0usize;

        loop {
            buf.clear();
            if reader.read_line(&mut buf)? == 0 {
                break;
            }
            line_no += 1;
            let line = buf.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }

            let mut record = pool.acquire_one();
            match self.parse_one(line, &mut record) {
                Ok(()) => {
                    emit(record)?;
                    emitted += 1;
                }
                Err(Error::Parse { message, .. }) => {
                    tracing::warn!(line = line_no, error = %message, "Skipping malformed line");
                    pool.release_one(record);
                }
                Err(e) => {
                    pool.release_one(record);
                    return Err(e);
                }
            }
        }
        Ok(emitted)
    }
}
