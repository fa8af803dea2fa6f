//! Tests for `schema` module.

use super::schema::*;
use crate::config::SlotConfig;
use crate::error::Error;

fn sample_slots() -> Vec<SlotConfig> {
    vec![
        SlotConfig::ragged("click", SlotType::Uint64),
        SlotConfig::ragged("ctr", SlotType::Float).unused(),
        SlotConfig::ragged("query", SlotType::Uint64).unused(),
        SlotConfig::dense("embed", SlotType::Float, vec![-1, 4]),
        SlotConfig::ragged("title", SlotType::Uint64),
    ]
}

#[test]
fn test_from_config_assigns_typed_indices() {
    // Arrange & Act
    let schema = SlotSchema::from_config(&sample_slots()).expect("schema");

    // Assert
    assert_eq!(schema.all_slots().len(), 5);
    assert_eq!(schema.uint64_slot_count(), 3);
    assert_eq!(schema.float_slot_count(), 2);
    assert_eq!(schema.used_uint64_count(), 2);
    assert_eq!(schema.used_float_count(), 1);

    let title = schema.slot("title").expect("title");
    assert_eq!(title.slot_value_idx, 2);
    assert_eq!(title.used_idx, Some(2));
    assert_eq!(schema.slot("query").expect("query").used_idx, None);
}

#[test]
fn test_inductive_dimension_is_recorded() {
    let schema = SlotSchema::from_config(&sample_slots()).expect("schema");

    let embed = schema.used_slot("embed").expect("embed");

    assert!(embed.dense);
    assert_eq!(embed.inductive_shape_index, Some(0));
    assert_eq!(embed.total_dims_without_inductive, 4);
    assert_eq!(embed.slot_value_idx, 1);
}

#[test]
fn test_used_slot_rejects_unused_and_unknown() {
    let schema = SlotSchema::from_config(&sample_slots()).expect("schema");

    assert!(matches!(schema.used_slot("ctr"), Err(Error::SlotNotFound(_))));
    assert!(matches!(schema.used_slot("nope"), Err(Error::SlotNotFound(_))));
}

#[test]
fn test_duplicate_names_are_rejected() {
    let slots = vec![
        SlotConfig::ragged("a", SlotType::Uint64),
        SlotConfig::ragged("a", SlotType::Float),
    ];

    let err = SlotSchema::from_config(&slots).unwrap_err();

    assert_eq!(err.code(), "FEED-001");
}

#[test]
fn test_two_inductive_dimensions_are_rejected() {
    let slots = vec![SlotConfig::dense("d", SlotType::Float, vec![-1, -1])];

    assert!(SlotSchema::from_config(&slots).is_err());
}

#[test]
fn test_dense_without_shape_is_rejected() {
    let slots = vec![SlotConfig::dense("d", SlotType::Float, vec![])];

    assert!(SlotSchema::from_config(&slots).is_err());
}

#[test]
fn test_schema_without_used_slots_is_rejected() {
    let slots = vec![SlotConfig::ragged("a", SlotType::Uint64).unused()];

    assert!(SlotSchema::from_config(&slots).is_err());
}

#[test]
fn test_used_slot_names_keep_declaration_order() {
    let schema = SlotSchema::from_config(&sample_slots()).expect("schema");

    assert_eq!(schema.used_slot_names(), vec!["click", "embed", "title"]);
}
