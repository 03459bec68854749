//! Row materializer
//!
//! Converts raw property cells into caller-facing [`Property`] values: one
//! batched reverse resolution for the identifiers, then a per-cell decode by
//! physical type. Cells the layer cannot represent (unknown type codes,
//! error/null placeholders, a value that contradicts its declared type) are
//! dropped silently; a count mismatch from the resolver is fatal.

use tracing::debug;

use crate::backend::{RawCell, RawValue};
use crate::store::Store;
use crate::types::error::{check, Result};
use crate::types::property::{Property, TypedValue};
use crate::types::{PropTag, PropType};

/// Materialize every cell of an object read.
pub fn properties(store: &Store, cells: &[RawCell]) -> Result<Vec<Property>> {
    columns(store, cells, 0)
}

/// Materialize the cells past the fixed default columns of a table row.
pub fn columns(store: &Store, cells: &[RawCell], skip: usize) -> Result<Vec<Property>> {
    let cells = &cells[skip.min(cells.len())..];
    let tags: Vec<PropTag> = cells.iter().map(|cell| cell.tag).collect();
    let resolved = store.resolve_prop_tags(&tags)?;
    check(resolved.len() == cells.len(), "resolved property count mismatch")?;

    Ok(cells
        .iter()
        .zip(resolved)
        .filter_map(|(cell, resolved)| {
            decode(cell).map(|value| Property {
                id: resolved.prop_key(),
                value,
            })
        })
        .collect())
}

fn decode(cell: &RawCell) -> Option<TypedValue> {
    let Some(prop_type) = cell.tag.prop_type() else {
        debug!(tag = ?cell.tag, "dropping cell with unknown type code");
        return None;
    };
    match (prop_type, &cell.value) {
        (PropType::Int, RawValue::Int(value)) => Some(TypedValue::Int(*value)),
        (PropType::Bool, RawValue::Bool(value)) => Some(TypedValue::Bool(*value)),
        (PropType::String8, RawValue::String8(bytes)) => {
            Some(TypedValue::String(String::from_utf8_lossy(bytes).into_owned()))
        }
        (PropType::Unicode, RawValue::Unicode(units)) => {
            Some(TypedValue::String(String::from_utf16_lossy(units)))
        }
        (PropType::Guid, RawValue::Guid(guid)) => Some(TypedValue::from_guid(*guid)),
        (PropType::Time, RawValue::Time(time)) => Some(TypedValue::from_time(*time)),
        (PropType::Binary, RawValue::Binary(bytes)) => Some(TypedValue::Binary(bytes.clone())),
        (PropType::Error | PropType::Null | PropType::Unspecified, _) => None,
        (prop_type, value) => {
            debug!(?prop_type, ?value, "dropping cell whose value contradicts its type");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone as _;
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::SessionBackend;
    use crate::types::property::PropId;
    use crate::types::tags;

    fn test_store() -> (MemoryBackend, Arc<Store>) {
        let backend = MemoryBackend::new();
        let store_id = backend.add_store("personal");
        let store = Store::new(
            store_id.clone(),
            "personal".to_string(),
            backend.open_store(&store_id).unwrap(),
        );
        (backend, store)
    }

    fn cell(tag: PropTag, value: RawValue) -> RawCell {
        RawCell::new(tag, value)
    }

    #[test]
    fn test_decodes_each_physical_type() {
        let (_backend, store) = test_store();
        let guid = Uuid::parse_str("00020329-0000-0000-c000-000000000046").unwrap();
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let cells = [
            cell(tags::CONTENT_COUNT, RawValue::Int(12)),
            cell(PropTag::new(PropType::Bool, 0x0E1F), RawValue::Bool(true)),
            cell(tags::SUBJECT.with_type(PropType::String8), RawValue::String8(b"hello".to_vec())),
            cell(PropTag::new(PropType::Guid, 0x0FF8), RawValue::Guid(guid)),
            cell(tags::RECEIVED_TIME, RawValue::Time(time)),
            cell(tags::ENTRY_ID, RawValue::Binary(vec![1, 2])),
        ];
        let properties = properties(&store, &cells).unwrap();
        assert_eq!(properties.len(), 6);
        assert_eq!(properties[0].value, TypedValue::Int(12));
        assert_eq!(properties[1].value, TypedValue::Bool(true));
        assert_eq!(properties[2].value, TypedValue::String("hello".to_string()));
        assert_eq!(
            properties[3].value,
            TypedValue::Guid("00020329-0000-0000-c000-000000000046".to_string())
        );
        assert_eq!(properties[4].value, TypedValue::Time(time.to_rfc3339()));
        assert_eq!(properties[5].value, TypedValue::Binary(vec![1, 2]));
        assert_eq!(properties[0].id, PropId::Int(tags::CONTENT_COUNT.prop_id()));
    }

    #[test]
    fn test_utf16_units_become_utf8() {
        let (_backend, store) = test_store();
        let units: Vec<u16> = "grüße".encode_utf16().collect();
        let cells = [cell(tags::SUBJECT, RawValue::Unicode(units))];
        let properties = properties(&store, &cells).unwrap();
        assert_eq!(properties[0].value, TypedValue::String("grüße".to_string()));
    }

    #[test]
    fn test_unknown_and_error_cells_are_dropped() {
        let (_backend, store) = test_store();
        let cells = [
            // 0x00FB is a real wire type code this layer does not model.
            cell(PropTag((0x0FF9 << 16) | 0x00FB), RawValue::Binary(vec![1])),
            cell(tags::SUBJECT.with_type(PropType::Error), RawValue::Null),
            cell(tags::CONTENT_COUNT, RawValue::Int(3)),
        ];
        let properties = properties(&store, &cells).unwrap();
        assert_eq!(properties.len(), 1);
        assert_eq!(properties[0].value, TypedValue::Int(3));
    }

    #[test]
    fn test_value_contradicting_type_is_dropped() {
        let (_backend, store) = test_store();
        let cells = [cell(tags::CONTENT_COUNT, RawValue::Bool(true))];
        let properties = properties(&store, &cells).unwrap();
        assert!(properties.is_empty());
    }

    #[test]
    fn test_skip_leaves_default_columns_out() {
        let (_backend, store) = test_store();
        let cells = [
            cell(tags::ENTRY_ID, RawValue::Binary(vec![1])),
            cell(tags::SUBJECT.with_type(PropType::String8), RawValue::String8(b"x".to_vec())),
        ];
        let properties = columns(&store, &cells, 1).unwrap();
        assert_eq!(properties.len(), 1);
        assert_eq!(properties[0].id, PropId::Int(tags::SUBJECT.prop_id()));
    }

    #[test]
    fn test_skip_beyond_row_yields_nothing() {
        let (_backend, store) = test_store();
        let cells = [cell(tags::ENTRY_ID, RawValue::Binary(vec![1]))];
        assert!(columns(&store, &cells, 5).unwrap().is_empty());
    }
}
