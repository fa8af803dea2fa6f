//! Slot schema descriptors.
//!
//! Built once from [`SlotConfig`] at initialization and shared read-only
//! afterwards. Two views exist: every declared slot ([`AllSlotInfo`], in line
//! order) and the subset consumed by the model ([`UsedSlotInfo`]).

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::config::SlotConfig;
use crate::error::{Error, Result};

/// Logical value type of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    /// 64-bit integer feature ids.
    Uint64,
    /// 32-bit float values.
    Float,
}

impl SlotType {
    /// Short name used in logs and CLI output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uint64 => "uint64",
            Self::Float => "float",
        }
    }
}

/// A declared slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllSlotInfo {
    /// Slot name.
    pub name: String,
    /// Value type.
    pub slot_type: SlotType,
    /// Index into the used slots, `None` when the model ignores the slot.
    pub used_idx: Option<usize>,
    /// Index of this slot inside the record's typed `SlotValues`.
    pub slot_value_idx: usize,
}

/// A slot consumed by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedSlotInfo {
    /// Position among used slots.
    pub idx: usize,
    /// Index inside the record's typed `SlotValues`.
    pub slot_value_idx: usize,
    /// Slot name.
    pub name: String,
    /// Value type.
    pub slot_type: SlotType,
    /// Fixed shape instead of ragged.
    pub dense: bool,
    /// Declared dense shape (may contain one `-1`).
    pub local_shape: Vec<i64>,
    /// Product of every known dimension.
    pub total_dims_without_inductive: usize,
    /// Position of the `-1` dimension, if any.
    pub inductive_shape_index: Option<usize>,
}

/// Immutable schema shared by parsers, packers and feeds.
#[derive(Debug, Clone, Default)]
pub struct SlotSchema {
    all: Vec<AllSlotInfo>,
    used: Vec<UsedSlotInfo>,
    by_name: FxHashMap<String, usize>,
    uint64_slot_count: usize,
    float_slot_count: usize,
    used_uint64_count: usize,
    used_float_count: usize,
}

impl SlotSchema {
    /// Builds the schema from declared slots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] on duplicate names, dense slots without a
    /// shape, or more than one inductive dimension.
    pub fn from_config(slots: &[SlotConfig]) -> Result<Self> {
        let mut schema = Self::default();

        for slot in slots {
            if schema.by_name.contains_key(&slot.name) {
                return Err(Error::Schema(format!("duplicate slot '{}'", slot.name)));
            }

            let slot_value_idx = match slot.slot_type {
                SlotType::Uint64 => {
                    schema.uint64_slot_count += 1;
                    schema.uint64_slot_count - 1
                }
                SlotType::Float => {
                    schema.float_slot_count += 1;
                    schema.float_slot_count - 1
                }
            };

            let used_idx = if slot.used {
                let info = used_info(slot, schema.used.len(), slot_value_idx)?;
                match slot.slot_type {
                    SlotType::Uint64 => schema.used_uint64_count += 1,
                    SlotType::Float => schema.used_float_count += 1,
                }
                schema.used.push(info);
                Some(schema.used.len() - 1)
            } else {
                None
            };

            schema.by_name.insert(slot.name.clone(), schema.all.len());
            schema.all.push(AllSlotInfo {
                name: slot.name.clone(),
                slot_type: slot.slot_type,
                used_idx,
                slot_value_idx,
            });
        }

        if schema.used.is_empty() {
            return Err(Error::Schema("no used slot declared".to_string()));
        }
        Ok(schema)
    }

    /// Every declared slot in line order.
    #[must_use]
    pub fn all_slots(&self) -> &[AllSlotInfo] {
        &self.all
    }

    /// Used slots in declaration order.
    #[must_use]
    pub fn used_slots(&self) -> &[UsedSlotInfo] {
        &self.used
    }

    /// Looks up a declared slot by name.
    #[must_use]
    pub fn slot(&self, name: &str) -> Option<&AllSlotInfo> {
        self.by_name.get(name).map(|&i| &self.all[i])
    }

    /// Looks up a used slot by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SlotNotFound`] when the slot is unknown or unused.
    pub fn used_slot(&self, name: &str) -> Result<&UsedSlotInfo> {
        self.slot(name)
            .and_then(|info| info.used_idx)
            .map(|idx| &self.used[idx])
            .ok_or_else(|| Error::SlotNotFound(name.to_string()))
    }

    /// Number of declared uint64 slots (width of a record's uint64 values).
    #[must_use]
    pub fn uint64_slot_count(&self) -> usize {
        self.uint64_slot_count
    }

    /// Number of declared float slots.
    #[must_use]
    pub fn float_slot_count(&self) -> usize {
        self.float_slot_count
    }

    /// Number of used uint64 slots.
    #[must_use]
    pub fn used_uint64_count(&self) -> usize {
        self.used_uint64_count
    }

    /// Number of used float slots.
    #[must_use]
    pub fn used_float_count(&self) -> usize {
        self.used_float_count
    }

    /// Used slot names, in order.
    #[must_use]
    pub fn used_slot_names(&self) -> Vec<&str> {
        self.used.iter().map(|s| s.name.as_str()).collect()
    }
}

fn used_info(slot: &SlotConfig, idx: usize, slot_value_idx: usize) -> Result<UsedSlotInfo> {
    let mut inductive_shape_index = None;
    let mut total_dims_without_inductive = 1usize;

    if slot.dense {
        if slot.shape.is_empty() {
            return Err(Error::Schema(format!(
                "dense slot '{}' declares no shape",
                slot.name
            )));
        }
        for (i, &dim) in slot.shape.iter().enumerate() {
            match dim {
                -1 => {
                    if inductive_shape_index.is_some() {
                        return Err(Error::Schema(format!(
                            "slot '{}' has more than one inductive dimension",
                            slot.name
                        )));
                    }
                    inductive_shape_index = Some(i);
                }
                d if d > 0 => {
                    total_dims_without_inductive *= usize::try_from(d)
                        .map_err(|_| Error::Schema(format!("slot '{}' dim overflow", slot.name)))?;
                }
                d => {
                    return Err(Error::Schema(format!(
                        "slot '{}' has invalid dimension {d}",
                        slot.name
                    )))
                }
            }
        }
    }

    Ok(UsedSlotInfo {
        idx,
        slot_value_idx,
        name: slot.name.clone(),
        slot_type: slot.slot_type,
        dense: slot.dense,
        local_shape: slot.shape.clone(),
        total_dims_without_inductive,
        inductive_shape_index,
    })
}
