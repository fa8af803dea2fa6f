//! Built-in whitespace-separated multi-slot text format.
//!
//! ```text
//! [ins_id] [logkey] <count> <v1> .. <vcount>  <count> <v1> ..  ...
//! ```
//!
//! One `count`-prefixed group per declared slot, in declaration order. Groups
//! of unused slots are consumed but not stored. A count of 0 yields an empty
//! slot.

use super::{ParseOptions, SlotParser, PARSER_ABI_VERSION};
use crate::error::{Error, Result};
use crate::slot::{AllSlotInfo, SlotRecord, SlotType};

/// Fields packed into a hex log key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogKey {
    /// Page-view grouping key (hex chars 16..32).
    pub search_id: u64,
    /// Match type (hex chars 11..14).
    pub cmatch: u32,
    /// Ad rank (hex chars 14..16).
    pub rank: u32,
}

/// Decodes a log key of at least 32 hex characters.
///
/// # Errors
///
/// Returns [`Error::Parse`] when the key is too short or a field is not hex.
#[allow(clippy::cast_possible_truncation)]
pub fn decode_logkey(key: &str) -> Result<LogKey> {
    let field = |range: std::ops::Range<usize>, name: &str| -> Result<u64> {
        let text = key
            .get(range)
            .ok_or_else(|| Error::parse(format!("log key '{key}' is too short")))?;
        u64::from_str_radix(text, 16)
            .map_err(|_| Error::parse(format!("log key {name} '{text}' is not hex")))
    };

    Ok(LogKey {
        search_id: field(16..32, "search_id")?,
        cmatch: field(11..14, "cmatch")? as u32,
        rank: field(14..16, "rank")? as u32,
    })
}

/// Parser for the multi-slot text format.
#[derive(Debug, Clone, Default)]
pub struct MultiSlotTextParser {
    slots: Vec<AllSlotInfo>,
    options: ParseOptions,
}

impl MultiSlotTextParser {
    /// Creates an unbound parser.
    #[must_use]
    pub fn new(options: ParseOptions) -> Self {
        Self {
            slots: Vec::new(),
            options,
        }
    }
}

impl SlotParser for MultiSlotTextParser {
    fn abi_version(&self) -> u32 {
        PARSER_ABI_VERSION
    }

    fn init(&mut self, slots: &[AllSlotInfo]) -> Result<()> {
        if slots.is_empty() {
            return Err(Error::Schema("text parser needs at least one slot".to_string()));
        }
        self.slots = slots.to_vec();
        Ok(())
    }

    fn parse_one(&self, line: &str, record: &mut SlotRecord) -> Result<()> {
        let mut tokens = line.split_ascii_whitespace();

        if self.options.parse_ins_id {
            let ins_id = tokens.next().ok_or_else(|| Error::parse("missing instance id"))?;
            record.ins_id.push_str(ins_id);
        }
        if self.options.parse_logkey {
            let key = tokens.next().ok_or_else(|| Error::parse("missing log key"))?;
            let decoded = decode_logkey(key)?;
            record.search_id = decoded.search_id;
            record.cmatch = decoded.cmatch;
            record.rank = decoded.rank;
        }
        if self.options.parse_content {
            record.content.push_str(line);
        }

        let mut uint64_scratch: Vec<u64> = Vec::new();
        let mut float_scratch: Vec<f32> = Vec::new();
        for slot in &self.slots {
            let count_token = tokens
                .next()
                .ok_or_else(|| Error::parse(format!("missing count of slot '{}'", slot.name)))?;
            let count: usize = count_token.parse().map_err(|_| {
                Error::parse(format!("bad count '{count_token}' of slot '{}'", slot.name))
            })?;

            let used = slot.used_idx.is_some();
            uint64_scratch.clear();
            float_scratch.clear();
            for _ in 0..count {
                let token = tokens
                    .next()
                    .ok_or_else(|| Error::parse(format!("slot '{}' is truncated", slot.name)))?;
                if !used {
                    continue;
                }
                match slot.slot_type {
                    SlotType::Uint64 => uint64_scratch.push(token.parse().map_err(|_| {
                        Error::parse(format!("bad uint64 '{token}' in slot '{}'", slot.name))
                    })?),
                    SlotType::Float => float_scratch.push(token.parse().map_err(|_| {
                        Error::parse(format!("bad float '{token}' in slot '{}'", slot.name))
                    })?),
                }
            }

            match slot.slot_type {
                SlotType::Uint64 => record.uint64_feasigns.add_values(&uint64_scratch),
                SlotType::Float => record.float_feasigns.add_values(&float_scratch),
            }
        }

        if let Some(extra) = tokens.next() {
            return Err(Error::parse(format!("unexpected trailing token '{extra}'")));
        }
        Ok(())
    }
}
