//! Backing store interface
//!
//! The core never talks to a real message store directly; it consumes this
//! narrow trait surface. A production implementation wraps the platform mail
//! API; [`memory`] provides a complete in-memory implementation used by tests
//! and demos.
//!
//! Notification payloads from real stores are transient, so `RawRow` is an
//! owned duplicate of the row's property buffer and cheap to clone.

pub mod memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::table::ReadPlan;
use crate::types::error::Result;
use crate::types::property::NamedPropId;
use crate::types::{EntryId, InstanceKey, PropTag};

/// Raw wire value of one property cell, still in the store's native
/// representation. Text arrives either as the store's 8-bit encoding or as
/// UTF-16 code units; the materializer converts both to UTF-8.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Int(i64),
    Bool(bool),
    String8(Vec<u8>),
    Unicode(Vec<u16>),
    Guid(Uuid),
    Time(DateTime<Utc>),
    Binary(Vec<u8>),
    /// Placeholder for a property the store could not supply.
    Null,
}

/// One property cell: the packed tag plus the raw value.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCell {
    pub tag: PropTag,
    pub value: RawValue,
}

impl RawCell {
    pub fn new(tag: PropTag, value: RawValue) -> Self {
        Self { tag, value }
    }
}

/// An owned duplicate of one table row's property buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    pub cells: Vec<RawCell>,
}

impl RawRow {
    pub fn new(cells: Vec<RawCell>) -> Self {
        Self { cells }
    }
}

/// Which of a folder's two tables a watch or subscription targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableKind {
    /// Items of a folder.
    Contents,
    /// Child folders of a folder.
    Hierarchy,
}

/// One low-level change notification from a watched table.
///
/// `RowAdded` is keyed by the instance key of the row the new row lands
/// after; `RowModified` and `RowDeleted` by the affected row's own instance
/// key. The three reload-class signals all force a full re-read.
#[derive(Debug, Clone)]
pub enum TableEvent {
    Changed,
    Error,
    Reload,
    RowAdded {
        prior_instance_key: InstanceKey,
        row: RawRow,
    },
    RowModified {
        instance_key: InstanceKey,
        row: RawRow,
    },
    RowDeleted {
        instance_key: InstanceKey,
    },
}

/// Callback invoked with each raw change batch, on the store's notification
/// thread.
pub type ChangeCallback = Box<dyn Fn(&[TableEvent]) + Send + Sync>;

/// Scope-bound ownership of one installed table watch; dropping the guard
/// tears the watch down.
pub struct WatchGuard {
    unwatch: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchGuard {
    pub fn new(unwatch: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unwatch: Some(Box::new(unwatch)),
        }
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(unwatch) = self.unwatch.take() {
            unwatch();
        }
    }
}

impl std::fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WatchGuard")
    }
}

/// Session-level operations: enumerating stores and opening one.
pub trait SessionBackend: Send + Sync {
    /// Read the store table: one row per store, projected onto the store
    /// default columns (entry id, display name).
    fn store_rows(&self) -> Result<Vec<RawRow>>;

    /// Open a store by entry id.
    fn open_store(&self, id: &EntryId) -> Result<Arc<dyn StoreBackend>>;
}

/// Per-store operations consumed by the resolver, materializer, and planner.
pub trait StoreBackend: Send + Sync {
    /// Entry id of the store's root (subtree) folder.
    fn root_id(&self) -> Result<EntryId>;

    /// Entry id of the store's receive folder, if it has one.
    fn inbox_id(&self) -> Result<Option<EntryId>>;

    /// Read properties directly off the store object.
    fn store_properties(&self, tags: &[PropTag]) -> Result<Vec<RawCell>>;

    /// Read properties of a folder or item. `None` reads every property the
    /// object has; a projection returns one cell per requested tag, with a
    /// `PropType::Error` cell standing in for properties the object lacks.
    fn object_properties(&self, object: &EntryId, tags: Option<&[PropTag]>) -> Result<Vec<RawCell>>;

    /// Open the item table of a folder.
    fn contents_table(&self, folder: &EntryId) -> Result<Arc<dyn TableBackend>>;

    /// Open the child-folder table of a folder.
    fn hierarchy_table(&self, folder: &EntryId) -> Result<Arc<dyn TableBackend>>;

    /// Resolve a batch of named descriptors to numeric ids. The result is
    /// parallel to the input; `None` marks a descriptor the store does not
    /// recognize.
    fn resolve_named_props(&self, names: &[NamedPropId]) -> Result<Vec<Option<u32>>>;

    /// Reverse-resolve a batch of numeric ids to named descriptors. The
    /// result is parallel to the input; `None` marks an id with no named
    /// mapping.
    fn resolve_prop_ids(&self, ids: &[u32]) -> Result<Vec<Option<NamedPropId>>>;
}

/// One open table: bounded ordered reads plus change watching.
pub trait TableBackend: Send + Sync {
    /// Execute a concrete read plan: projection, sort, seek, offset, then a
    /// bounded read.
    fn read_rows(&self, plan: &ReadPlan) -> Result<Vec<RawRow>>;

    /// Install a change watch. At most one watch per subscription sink; the
    /// returned guard tears it down on drop.
    fn watch(&self, on_change: ChangeCallback) -> Result<WatchGuard>;
}
