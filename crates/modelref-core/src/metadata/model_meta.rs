//! Per-model metadata helpers.
//!
//! These operate on raw record JSON (the shape persisted to category
//! documents) so that write paths can maintain the `metadata` sub-object
//! without requiring full typed validation first.

use crate::models::RecordMetadata;
use serde_json::Value;

/// Extract the `metadata` sub-object of a record, defaulting to empty.
pub fn get_record_metadata(record: &Value) -> RecordMetadata {
    record
        .get("metadata")
        .and_then(|m| serde_json::from_value(m.clone()).ok())
        .unwrap_or_default()
}

/// Write the `metadata` sub-object back onto a record.
pub fn set_record_metadata(record: &mut Value, metadata: &RecordMetadata) {
    if let Value::Object(map) = record {
        if let Ok(value) = serde_json::to_value(metadata) {
            map.insert("metadata".to_string(), value);
        }
    }
}

/// Carry `created_at`/`created_by` forward from an existing record.
///
/// Creation fields are immutable once set; an update must not be able to
/// rewrite them.
pub fn preserve_creation_fields(existing: &Value, incoming: &mut Value) {
    let existing_meta = get_record_metadata(existing);
    let mut incoming_meta = get_record_metadata(incoming);

    if existing_meta.created_at.is_some() {
        incoming_meta.created_at = existing_meta.created_at;
    }
    if existing_meta.created_by.is_some() {
        incoming_meta.created_by = existing_meta.created_by;
    }

    set_record_metadata(incoming, &incoming_meta);
}

/// Stamp `updated_at` on a record.
pub fn set_update_timestamp(record: &mut Value, timestamp: i64) {
    let mut metadata = get_record_metadata(record);
    metadata.updated_at = Some(timestamp);
    set_record_metadata(record, &metadata);
}

/// Fill in any missing `created_at`/`updated_at` timestamps.
///
/// Returns true if anything was populated.
pub fn ensure_metadata_populated(record: &mut Value, timestamp: i64) -> bool {
    let mut metadata = get_record_metadata(record);
    let mut updated = false;

    if metadata.created_at.is_none() {
        metadata.created_at = Some(timestamp);
        updated = true;
    }
    if metadata.updated_at.is_none() {
        metadata.updated_at = Some(timestamp);
        updated = true;
    }

    if updated {
        set_record_metadata(record, &metadata);
    }
    updated
}
