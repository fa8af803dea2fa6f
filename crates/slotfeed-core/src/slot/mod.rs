//! Slot-structured record data model.
//!
//! A record's features are grouped into named slots. Each slot has one value
//! type and a ragged number of values per record; [`SlotValues`] stores all of
//! a record's slots of one type in a single flat array.

mod pv;
mod record;
mod schema;
#[cfg(test)]
mod schema_tests;
mod values;

pub use pv::{merge_by_search_id, PvInstance};
pub use record::{AucRunnerInfo, Feasign, FeatureItem, SlotRecord};
pub use schema::{AllSlotInfo, SlotSchema, SlotType, UsedSlotInfo};
pub use values::SlotValues;
