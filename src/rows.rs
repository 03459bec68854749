//! Folder and item rows
//!
//! Typed views over one table row each. A row is constructed from whatever
//! cells the read produced; the well-known fields are extracted by property
//! id, so rows from plan reads and rows carried inside change notifications
//! both work. Cells past the fixed default columns stay raw and materialize
//! on demand through [`columns`](Folder::columns).

use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};

use crate::backend::{RawCell, RawRow, RawValue};
use crate::store::{materialize, Store};
use crate::sync;
use crate::table::{SortKey, TableDirectives};
use crate::types::directives::TableDirectiveSet;
use crate::types::error::{check, GraphMailError, Result};
use crate::types::property::Property;
use crate::types::{tags, EntryId, InstanceKey, PropTag, SpecialFolder};

struct WindowCache<R> {
    directives: TableDirectiveSet,
    rows: Vec<Arc<R>>,
}

/// One folder row.
pub struct Folder {
    store: Weak<Store>,
    cells: Vec<RawCell>,
    instance_key: InstanceKey,
    id: EntryId,
    parent_id: EntryId,
    name: String,
    count: i64,
    unread: i64,
    sub_folders: Mutex<Option<WindowCache<Folder>>>,
    items: Mutex<Option<WindowCache<Item>>>,
}

impl Folder {
    /// Fixed projection every folder read starts from.
    pub const DEFAULT_COLUMNS: &'static [PropTag] = &[
        tags::INSTANCE_KEY,
        tags::ENTRY_ID,
        tags::PARENT_ENTRY_ID,
        tags::DISPLAY_NAME,
        tags::CONTENT_COUNT,
        tags::CONTENT_UNREAD,
    ];

    pub const DEFAULT_SORT: [SortKey; 1] = [SortKey {
        tag: tags::DISPLAY_NAME,
        descending: false,
    }];

    pub(crate) fn from_row(store: &Arc<Store>, row: RawRow) -> Result<Self> {
        let id = EntryId(binary(&row.cells, tags::ENTRY_ID));
        check(!id.is_empty(), "folder row missing entry id")?;
        Ok(Self {
            store: Arc::downgrade(store),
            instance_key: InstanceKey(binary(&row.cells, tags::INSTANCE_KEY)),
            id,
            parent_id: EntryId(binary(&row.cells, tags::PARENT_ENTRY_ID)),
            name: text(&row.cells, tags::DISPLAY_NAME),
            count: int(&row.cells, tags::CONTENT_COUNT),
            unread: int(&row.cells, tags::CONTENT_UNREAD),
            cells: row.cells,
            sub_folders: Mutex::new(None),
            items: Mutex::new(None),
        })
    }

    pub fn instance_key(&self) -> &InstanceKey {
        &self.instance_key
    }

    pub fn id(&self) -> &EntryId {
        &self.id
    }

    pub fn parent_id(&self) -> &EntryId {
        &self.parent_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn unread(&self) -> i64 {
        self.unread
    }

    /// Which well-known folder this is, if any.
    pub fn special_kind(&self) -> Result<Option<SpecialFolder>> {
        const ALL: [SpecialFolder; 9] = [
            SpecialFolder::Inbox,
            SpecialFolder::Deleted,
            SpecialFolder::Outbox,
            SpecialFolder::Sent,
            SpecialFolder::Calendar,
            SpecialFolder::Contacts,
            SpecialFolder::Tasks,
            SpecialFolder::Archive,
            SpecialFolder::Drafts,
        ];
        let store = self.store()?;
        let map = store.special_folders(&ALL)?;
        Ok(map
            .into_iter()
            .find(|(_, id)| *id == self.id)
            .map(|(kind, _)| kind))
    }

    /// Child folders under the given directives, cached per directive set.
    pub fn sub_folders(&self, directives: &TableDirectiveSet) -> Result<Vec<Arc<Folder>>> {
        {
            let cache = sync::lock(&self.sub_folders);
            if let Some(cached) = cache.as_ref() {
                if cached.directives == *directives {
                    return Ok(cached.rows.clone());
                }
            }
        }
        let store = self.store()?;
        let table = store.backend().hierarchy_table(&self.id)?;
        let planner = TableDirectives::new(Some(Arc::clone(&store)), directives)?;
        let raw = planner.read(table.as_ref(), Folder::DEFAULT_COLUMNS, &Folder::DEFAULT_SORT)?;
        let rows: Vec<Arc<Folder>> = raw
            .into_iter()
            .map(|row| Folder::from_row(&store, row).map(Arc::new))
            .collect::<Result<_>>()?;
        *sync::lock(&self.sub_folders) = Some(WindowCache {
            directives: directives.clone(),
            rows: rows.clone(),
        });
        Ok(rows)
    }

    /// Items under the given directives, cached per directive set.
    pub fn items(&self, directives: &TableDirectiveSet) -> Result<Vec<Arc<Item>>> {
        {
            let cache = sync::lock(&self.items);
            if let Some(cached) = cache.as_ref() {
                if cached.directives == *directives {
                    return Ok(cached.rows.clone());
                }
            }
        }
        let store = self.store()?;
        let table = store.backend().contents_table(&self.id)?;
        let planner = TableDirectives::new(Some(Arc::clone(&store)), directives)?;
        let raw = planner.read(table.as_ref(), Item::DEFAULT_COLUMNS, &Item::DEFAULT_SORT)?;
        let rows: Vec<Arc<Item>> = raw
            .into_iter()
            .map(|row| Item::from_row(&store, row).map(Arc::new))
            .collect::<Result<_>>()?;
        *sync::lock(&self.items) = Some(WindowCache {
            directives: directives.clone(),
            rows: rows.clone(),
        });
        Ok(rows)
    }

    /// Materialize the cells past the fixed default columns.
    pub fn columns(&self) -> Result<Vec<Property>> {
        let store = self.store()?;
        materialize::columns(&store, &self.cells, Self::DEFAULT_COLUMNS.len())
    }

    fn store(&self) -> Result<Arc<Store>> {
        self.store
            .upgrade()
            .ok_or_else(|| GraphMailError::Invariant("store context dropped".to_string()))
    }
}

impl std::fmt::Debug for Folder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Folder")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One item row.
pub struct Item {
    store: Weak<Store>,
    cells: Vec<RawCell>,
    instance_key: InstanceKey,
    id: EntryId,
    parent_id: EntryId,
    subject: String,
    sender: String,
    to: String,
    cc: String,
    read: bool,
    received: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
    preview: String,
}

impl Item {
    /// Fixed projection every item read starts from.
    pub const DEFAULT_COLUMNS: &'static [PropTag] = &[
        tags::INSTANCE_KEY,
        tags::ENTRY_ID,
        tags::PARENT_ENTRY_ID,
        tags::SUBJECT,
        tags::SENDER_NAME,
        tags::DISPLAY_TO,
        tags::DISPLAY_CC,
        tags::MESSAGE_FLAGS,
        tags::RECEIVED_TIME,
        tags::MODIFIED_TIME,
        tags::BODY,
    ];

    pub const DEFAULT_SORT: [SortKey; 1] = [SortKey {
        tag: tags::RECEIVED_TIME,
        descending: true,
    }];

    pub(crate) fn from_row(store: &Arc<Store>, row: RawRow) -> Result<Self> {
        let id = EntryId(binary(&row.cells, tags::ENTRY_ID));
        check(!id.is_empty(), "item row missing entry id")?;
        Ok(Self {
            store: Arc::downgrade(store),
            instance_key: InstanceKey(binary(&row.cells, tags::INSTANCE_KEY)),
            id,
            parent_id: EntryId(binary(&row.cells, tags::PARENT_ENTRY_ID)),
            subject: text(&row.cells, tags::SUBJECT),
            sender: text(&row.cells, tags::SENDER_NAME),
            to: text(&row.cells, tags::DISPLAY_TO),
            cc: text(&row.cells, tags::DISPLAY_CC),
            read: int(&row.cells, tags::MESSAGE_FLAGS) & tags::FLAG_READ != 0,
            received: time(&row.cells, tags::RECEIVED_TIME),
            modified: time(&row.cells, tags::MODIFIED_TIME),
            preview: text(&row.cells, tags::BODY),
            cells: row.cells,
        })
    }

    pub fn instance_key(&self) -> &InstanceKey {
        &self.instance_key
    }

    pub fn id(&self) -> &EntryId {
        &self.id
    }

    pub fn parent_id(&self) -> &EntryId {
        &self.parent_id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn cc(&self) -> &str {
        &self.cc
    }

    /// Derived from the read bit of the message flags.
    pub fn read(&self) -> bool {
        self.read
    }

    pub fn received(&self) -> Option<DateTime<Utc>> {
        self.received
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    pub fn preview(&self) -> &str {
        &self.preview
    }

    /// Materialize the cells past the fixed default columns.
    pub fn columns(&self) -> Result<Vec<Property>> {
        let store = self
            .store
            .upgrade()
            .ok_or_else(|| GraphMailError::Invariant("store context dropped".to_string()))?;
        materialize::columns(&store, &self.cells, Self::DEFAULT_COLUMNS.len())
    }
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Item")
            .field("id", &self.id)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

pub(crate) fn find<'a>(cells: &'a [RawCell], tag: PropTag) -> Option<&'a RawValue> {
    cells
        .iter()
        .find(|cell| cell.tag.prop_id() == tag.prop_id())
        .map(|cell| &cell.value)
}

pub(crate) fn binary(cells: &[RawCell], tag: PropTag) -> Vec<u8> {
    match find(cells, tag) {
        Some(RawValue::Binary(bytes)) => bytes.clone(),
        _ => Vec::new(),
    }
}

pub(crate) fn text(cells: &[RawCell], tag: PropTag) -> String {
    match find(cells, tag) {
        Some(RawValue::Unicode(units)) => String::from_utf16_lossy(units),
        Some(RawValue::String8(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
        _ => String::new(),
    }
}

fn int(cells: &[RawCell], tag: PropTag) -> i64 {
    match find(cells, tag) {
        Some(RawValue::Int(value)) => *value,
        _ => 0,
    }
}

fn time(cells: &[RawCell], tag: PropTag) -> Option<DateTime<Utc>> {
    match find(cells, tag) {
        Some(RawValue::Time(value)) => Some(*value),
        _ => None,
    }
}
