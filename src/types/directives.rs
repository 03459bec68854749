//! Table read directives
//!
//! A directive set is the caller-supplied modifier bundle for one table read:
//! column selection, sort order, seek cursor, offset, and take. Equality over
//! directive sets doubles as a cache-invalidation key and, combined with the
//! target object id, as the subscription registration key. The total ordering
//! here keeps registration multisets sorted deterministically.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::property::{PropId, ValueKind};
use crate::types::{EntryId, ObjectId};

/// One extra column to project, with the physical type to request it as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub kind: ValueKind,
    pub property: PropId,
}

impl Ord for Column {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind
            .cmp(&other.kind)
            .then_with(|| self.property.cmp(&other.property))
    }
}

impl PartialOrd for Column {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One sort key with direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub kind: ValueKind,
    pub property: PropId,
    pub descending: bool,
}

impl Ord for Order {
    fn cmp(&self, other: &Self) -> Ordering {
        // Descending entries sort ahead of ascending ones.
        other
            .descending
            .cmp(&self.descending)
            .then_with(|| self.kind.cmp(&other.kind))
            .then_with(|| self.property.cmp(&other.property))
    }
}

impl PartialOrd for Order {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The declarative directive bundle for one table read.
///
/// `seek` distinguishes three states: directive absent (`None`, read from the
/// beginning), directive present with an explicit empty cursor
/// (`Some(None)`, position at the end of the table), and directive present
/// with a cursor (`Some(Some(id))`, position at the matching row).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDirectiveSet {
    pub columns: Option<Vec<Column>>,
    pub order_by: Option<Vec<Order>>,
    pub seek: Option<Option<EntryId>>,
    pub offset: Option<i32>,
    pub take: Option<i32>,
}

impl TableDirectiveSet {
    pub fn is_empty(&self) -> bool {
        self.columns.is_none()
            && self.order_by.is_none()
            && self.seek.is_none()
            && self.offset.is_none()
            && self.take.is_none()
    }

    /// True when every directive present in `self` is present and equal in
    /// `other`. This is the subscription delivery filter: a listener only
    /// sees events whose delivery key carries all of the directives it
    /// registered with.
    pub fn subset_of(&self, other: &TableDirectiveSet) -> bool {
        fn covered<T: PartialEq>(registered: &Option<T>, delivered: &Option<T>) -> bool {
            match registered {
                None => true,
                Some(value) => delivered.as_ref() == Some(value),
            }
        }

        covered(&self.columns, &other.columns)
            && covered(&self.order_by, &other.order_by)
            && covered(&self.seek, &other.seek)
            && covered(&self.offset, &other.offset)
            && covered(&self.take, &other.take)
    }
}

// Absent directives sort ahead of present ones; the field order matches the
// registration-key ordering: offset, take, seek, columns, order_by.
impl Ord for TableDirectiveSet {
    fn cmp(&self, other: &Self) -> Ordering {
        self.offset
            .cmp(&other.offset)
            .then_with(|| self.take.cmp(&other.take))
            .then_with(|| self.seek.cmp(&other.seek))
            .then_with(|| self.columns.cmp(&other.columns))
            .then_with(|| self.order_by.cmp(&other.order_by))
    }
}

impl PartialOrd for TableDirectiveSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Key identifying one subscription registration: the target object plus the
/// directive set it was registered with. Registrations with equal keys share
/// one underlying table watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationKey {
    pub object: ObjectId,
    pub directives: TableDirectiveSet,
}

impl Ord for RegistrationKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.object
            .cmp(&other.object)
            .then_with(|| self.directives.cmp(&other.directives))
    }
}

impl PartialOrd for RegistrationKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
