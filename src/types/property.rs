//! Property identifiers and typed property values
//!
//! Properties are named either by a small store-independent numeric id or by
//! a "named" descriptor scoped to a property-set GUID. Named descriptors are
//! resolved against the store into canonical numeric tags (see
//! `store::resolver`); the threshold between the two id spaces is
//! [`NAMED_PROP_ID_MIN`].

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{PropTag, PropType};

/// Numeric ids at or above this value are store-specific assignments for
/// named properties; ids below it are well-known and pass through the
/// resolver unchanged.
pub const NAMED_PROP_ID_MIN: u32 = 0x8000;

/// The shared property set for ad-hoc string-named properties.
pub static PS_PUBLIC_STRINGS: Lazy<Uuid> =
    Lazy::new(|| Uuid::parse_str("00020329-0000-0000-c000-000000000046").unwrap());

/// Payload of a named property descriptor: exactly one of an integer sub-id
/// or a string name, enforced by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamedIdKind {
    Id(i64),
    Name(String),
}

/// A named property descriptor: a property-set GUID plus its payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedPropId {
    pub propset: Uuid,
    pub kind: NamedIdKind,
}

impl NamedPropId {
    pub fn by_id(propset: Uuid, id: i64) -> Self {
        Self {
            propset,
            kind: NamedIdKind::Id(id),
        }
    }

    pub fn by_name(propset: Uuid, name: impl Into<String>) -> Self {
        Self {
            propset,
            kind: NamedIdKind::Name(name.into()),
        }
    }
}

// Ordering is propset bytes, then kind (integer sub-ids before names), then
// payload. This is the deterministic iteration and deduplication order used
// by the per-store resolution cache.
impl Ord for NamedPropId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.propset
            .as_bytes()
            .cmp(other.propset.as_bytes())
            .then_with(|| match (&self.kind, &other.kind) {
                (NamedIdKind::Id(lhs), NamedIdKind::Id(rhs)) => lhs.cmp(rhs),
                (NamedIdKind::Id(_), NamedIdKind::Name(_)) => Ordering::Less,
                (NamedIdKind::Name(_), NamedIdKind::Id(_)) => Ordering::Greater,
                (NamedIdKind::Name(lhs), NamedIdKind::Name(rhs)) => lhs.cmp(rhs),
            })
    }
}

impl PartialOrd for NamedPropId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A property identifier as supplied by callers: either a plain numeric id
/// or a named descriptor that needs resolution against a store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropId {
    Int(u32),
    Named(NamedPropId),
}

/// A canonical resolution of a [`PropId`] against one store: the numeric tag
/// (type left unspecified) plus, for named properties, the original
/// descriptor for round-tripping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPropId {
    tag: PropTag,
    named: Option<NamedPropId>,
}

impl ResolvedPropId {
    pub fn numeric(prop_id: u32) -> Self {
        Self {
            tag: PropTag::new(PropType::Unspecified, prop_id),
            named: None,
        }
    }

    pub fn named(prop_id: u32, descriptor: NamedPropId) -> Self {
        Self {
            tag: PropTag::new(PropType::Unspecified, prop_id),
            named: Some(descriptor),
        }
    }

    pub fn tag(&self) -> PropTag {
        self.tag
    }

    pub fn prop_id(&self) -> u32 {
        self.tag.prop_id()
    }

    /// The caller-facing identifier: the named descriptor when there is one,
    /// the numeric id otherwise.
    pub fn prop_key(&self) -> PropId {
        match &self.named {
            Some(descriptor) => PropId::Named(descriptor.clone()),
            None => PropId::Int(self.tag.prop_id()),
        }
    }
}

/// Logical value kinds selectable in column and sort directives; each maps
/// onto one physical property type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Int,
    Bool,
    String,
    Guid,
    Time,
    Binary,
}

impl ValueKind {
    pub fn physical_type(self) -> PropType {
        match self {
            Self::Int => PropType::Int,
            Self::Bool => PropType::Bool,
            Self::String => PropType::Unicode,
            Self::Guid => PropType::Guid,
            Self::Time => PropType::Time,
            Self::Binary => PropType::Binary,
        }
    }
}

/// A decoded property value. Exactly one variant is active; produced fresh
/// per read and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    Int(i64),
    Bool(bool),
    String(String),
    /// Hyphenated GUID string.
    Guid(String),
    /// RFC 3339 timestamp string.
    Time(String),
    Binary(Vec<u8>),
}

impl TypedValue {
    pub fn from_guid(guid: Uuid) -> Self {
        Self::Guid(guid.hyphenated().to_string())
    }

    pub fn from_time(time: DateTime<Utc>) -> Self {
        Self::Time(time.to_rfc3339())
    }
}

/// One resolved property identifier paired with its decoded value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropId,
    pub value: TypedValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn propset(byte: u8) -> Uuid {
        Uuid::from_bytes([byte; 16])
    }

    #[test]
    fn test_named_id_ordering_propset_first() {
        let a = NamedPropId::by_name(propset(1), "zzz");
        let b = NamedPropId::by_id(propset(2), 1);
        assert!(a < b);
    }

    #[test]
    fn test_named_id_ordering_kind_then_payload() {
        let ps = propset(7);
        let by_id_low = NamedPropId::by_id(ps, 1);
        let by_id_high = NamedPropId::by_id(ps, 2);
        let by_name_a = NamedPropId::by_name(ps, "alpha");
        let by_name_b = NamedPropId::by_name(ps, "beta");

        // Integer sub-ids sort before names within the same propset.
        assert!(by_id_low < by_id_high);
        assert!(by_id_high < by_name_a);
        assert!(by_name_a < by_name_b);
    }

    #[test]
    fn test_named_id_equality() {
        let ps = propset(3);
        assert_eq!(NamedPropId::by_id(ps, 5), NamedPropId::by_id(ps, 5));
        assert_ne!(NamedPropId::by_id(ps, 5), NamedPropId::by_name(ps, "5"));
    }

    #[test]
    fn test_resolved_prop_key_round_trips_descriptor() {
        let descriptor = NamedPropId::by_name(*PS_PUBLIC_STRINGS, "Keywords");
        let resolved = ResolvedPropId::named(0x8011, descriptor.clone());
        assert_eq!(resolved.prop_id(), 0x8011);
        assert_eq!(resolved.prop_key(), PropId::Named(descriptor));

        let plain = ResolvedPropId::numeric(0x0037);
        assert_eq!(plain.prop_key(), PropId::Int(0x0037));
    }

    #[test]
    fn test_value_kind_physical_types() {
        assert_eq!(ValueKind::String.physical_type(), PropType::Unicode);
        assert_eq!(ValueKind::Time.physical_type(), PropType::Time);
        assert_eq!(ValueKind::Binary.physical_type(), PropType::Binary);
    }
}
