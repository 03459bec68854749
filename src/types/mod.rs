//! Core data structures shared across the crate

pub mod changes;
pub mod directives;
pub mod error;
pub mod property;

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Opaque byte sequence uniquely naming a store, folder, or item.
///
/// Exposed to callers as a base64 string, the usual convention for opaque
/// identifiers in a schema layer.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub Vec<u8>);

impl EntryId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for EntryId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for EntryId {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE64.encode(&self.0))
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", BASE64.encode(&self.0))
    }
}

impl Serialize for EntryId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for EntryId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = BASE64.decode(encoded).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// Secondary, notification-stable identifier for a table row.
///
/// Stable across re-reads of the same logical row, which is what lets change
/// notifications be correlated back to cached window positions. Distinct from
/// the row's [`EntryId`], which is stable across the row's lifetime but not
/// usable for window correlation.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceKey(pub Vec<u8>);

impl InstanceKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for InstanceKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE64.encode(&self.0))
    }
}

impl fmt::Debug for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceKey({})", BASE64.encode(&self.0))
    }
}

impl Serialize for InstanceKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for InstanceKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = BASE64.decode(encoded).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// Pair of store id and object (folder/item) id naming a subscription target.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    pub store_id: EntryId,
    pub object_id: EntryId,
}

/// Well-known folders resolved through the store/inbox/subtree property chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpecialFolder {
    Inbox,
    Deleted,
    Outbox,
    Sent,
    Calendar,
    Contacts,
    Tasks,
    Archive,
    Drafts,
}

/// Physical property types understood by the materializer.
///
/// This is a closed set fixed by the wire schema. Raw type codes outside it
/// map to `None` in [`PropType::from_code`] and the cell is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum PropType {
    Unspecified = 0x0000,
    Null = 0x0001,
    Int = 0x0003,
    Error = 0x000A,
    Bool = 0x000B,
    String8 = 0x001E,
    Unicode = 0x001F,
    Time = 0x0040,
    Guid = 0x0048,
    Binary = 0x0102,
}

impl PropType {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0000 => Some(Self::Unspecified),
            0x0001 => Some(Self::Null),
            0x0003 => Some(Self::Int),
            0x000A => Some(Self::Error),
            0x000B => Some(Self::Bool),
            0x001E => Some(Self::String8),
            0x001F => Some(Self::Unicode),
            0x0040 => Some(Self::Time),
            0x0048 => Some(Self::Guid),
            0x0102 => Some(Self::Binary),
            _ => None,
        }
    }
}

/// Packed property tag: high 16 bits are the property id, low 16 bits the
/// physical type code.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropTag(pub u32);

impl PropTag {
    pub const fn new(prop_type: PropType, prop_id: u32) -> Self {
        Self((prop_id << 16) | (prop_type as u32))
    }

    pub const fn prop_id(self) -> u32 {
        self.0 >> 16
    }

    pub const fn type_code(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub fn prop_type(self) -> Option<PropType> {
        PropType::from_code(self.type_code())
    }

    /// Same property id retagged with a different physical type.
    pub const fn with_type(self, prop_type: PropType) -> Self {
        Self::new(prop_type, self.prop_id())
    }
}

impl fmt::Debug for PropTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropTag({:#010X})", self.0)
    }
}

/// Well-known property tags used by the fixed default columns.
pub mod tags {
    use super::{PropTag, PropType};

    pub const INSTANCE_KEY: PropTag = PropTag::new(PropType::Binary, 0x0FF6);
    pub const ENTRY_ID: PropTag = PropTag::new(PropType::Binary, 0x0FFF);
    pub const PARENT_ENTRY_ID: PropTag = PropTag::new(PropType::Binary, 0x0E09);
    pub const DISPLAY_NAME: PropTag = PropTag::new(PropType::Unicode, 0x3001);
    pub const CONTENT_COUNT: PropTag = PropTag::new(PropType::Int, 0x3602);
    pub const CONTENT_UNREAD: PropTag = PropTag::new(PropType::Int, 0x3603);
    pub const SUBJECT: PropTag = PropTag::new(PropType::Unicode, 0x0037);
    pub const SENDER_NAME: PropTag = PropTag::new(PropType::Unicode, 0x0C1A);
    pub const DISPLAY_TO: PropTag = PropTag::new(PropType::Unicode, 0x0E04);
    pub const DISPLAY_CC: PropTag = PropTag::new(PropType::Unicode, 0x0E03);
    pub const MESSAGE_FLAGS: PropTag = PropTag::new(PropType::Int, 0x0E07);
    pub const RECEIVED_TIME: PropTag = PropTag::new(PropType::Time, 0x0E06);
    pub const MODIFIED_TIME: PropTag = PropTag::new(PropType::Time, 0x3008);
    pub const BODY: PropTag = PropTag::new(PropType::Unicode, 0x1000);

    /// Bit set in `MESSAGE_FLAGS` when an item has been read.
    pub const FLAG_READ: i64 = 0x0001;

    // Special-folder entry ids stored on the store object itself.
    pub const SUBTREE_ENTRY_ID: PropTag = PropTag::new(PropType::Binary, 0x35E0);
    pub const OUTBOX_ENTRY_ID: PropTag = PropTag::new(PropType::Binary, 0x35E2);
    pub const WASTEBASKET_ENTRY_ID: PropTag = PropTag::new(PropType::Binary, 0x35E3);
    pub const SENT_ITEMS_ENTRY_ID: PropTag = PropTag::new(PropType::Binary, 0x35E4);

    // Special-folder entry ids read from the inbox, falling back to the
    // subtree root.
    pub const CALENDAR_ENTRY_ID: PropTag = PropTag::new(PropType::Binary, 0x36D0);
    pub const CONTACTS_ENTRY_ID: PropTag = PropTag::new(PropType::Binary, 0x36D1);
    pub const TASKS_ENTRY_ID: PropTag = PropTag::new(PropType::Binary, 0x36D4);
    pub const ARCHIVE_ENTRY_ID: PropTag = PropTag::new(PropType::Binary, 0x35FF);
    pub const DRAFTS_ENTRY_ID: PropTag = PropTag::new(PropType::Binary, 0x36D7);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prop_tag_packing() {
        let tag = PropTag::new(PropType::Unicode, 0x3001);
        assert_eq!(tag.prop_id(), 0x3001);
        assert_eq!(tag.type_code(), 0x001F);
        assert_eq!(tag.prop_type(), Some(PropType::Unicode));

        let retagged = tag.with_type(PropType::Unspecified);
        assert_eq!(retagged.prop_id(), 0x3001);
        assert_eq!(retagged.prop_type(), Some(PropType::Unspecified));
    }

    #[test]
    fn test_prop_type_unknown_code() {
        // 0x00FB is a real wire code the materializer does not understand.
        assert_eq!(PropType::from_code(0x00FB), None);
    }

    #[test]
    fn test_entry_id_base64_round_trip() {
        let id = EntryId(vec![0x01, 0x02, 0xFF]);
        let json = serde_json::to_string(&id).unwrap();
        let back: EntryId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
        assert_eq!(id.to_string(), "AQL/");
    }

    #[test]
    fn test_object_id_ordering() {
        let a = ObjectId {
            store_id: EntryId(vec![1]),
            object_id: EntryId(vec![9]),
        };
        let b = ObjectId {
            store_id: EntryId(vec![2]),
            object_id: EntryId(vec![0]),
        };
        // Store id dominates the object id.
        assert!(a < b);
    }
}
