//! In-memory backing store
//!
//! A complete [`SessionBackend`] with no external storage, backing the test
//! suite. Reads honor the whole [`ReadPlan`]: projection
//! with error cells for missing properties, multi-key sort, seek, offset, and
//! a bounded (possibly backward) take.
//!
//! Mutators update the maps and then dispatch change notifications
//! synchronously to every watch installed on the affected table, which keeps
//! notification tests deterministic. Named-property resolution round trips
//! are counted so cache behavior is observable from tests.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::backend::{
    ChangeCallback, RawCell, RawRow, RawValue, SessionBackend, StoreBackend, TableBackend,
    TableEvent, TableKind, WatchGuard,
};
use crate::sync;
use crate::table::{ReadPlan, SeekPlan};
use crate::types::error::{GraphMailError, Result};
use crate::types::property::{NamedPropId, NAMED_PROP_ID_MIN};
use crate::types::{tags, EntryId, InstanceKey, PropTag, PropType};

/// Property bag of one object, keyed by property id.
type PropMap = BTreeMap<u32, (PropType, RawValue)>;

/// One watched table: store, folder, and which of its tables.
type WatchKey = (EntryId, EntryId, TableKind);

#[derive(Default)]
struct FolderState {
    props: PropMap,
    parent: Option<EntryId>,
    sub_folders: Vec<EntryId>,
    items: Vec<EntryId>,
}

struct ItemState {
    props: PropMap,
    parent: EntryId,
}

struct StoreState {
    props: PropMap,
    root_id: EntryId,
    inbox_id: Option<EntryId>,
    folders: BTreeMap<EntryId, FolderState>,
    items: BTreeMap<EntryId, ItemState>,
    named: BTreeMap<NamedPropId, u32>,
    next_named_id: u32,
}

#[derive(Default)]
struct State {
    stores: BTreeMap<EntryId, StoreState>,
    next_id: u64,
}

impl State {
    fn alloc(&mut self) -> (EntryId, InstanceKey) {
        self.next_id += 1;
        let bytes = self.next_id.to_be_bytes();
        let mut key = vec![0x6B];
        key.extend_from_slice(&bytes);
        (EntryId(bytes.to_vec()), InstanceKey(key))
    }

    fn store(&self, id: &EntryId) -> Result<&StoreState> {
        self.stores
            .get(id)
            .ok_or_else(|| GraphMailError::StoreNotFound(id.to_string()))
    }

    fn store_mut(&mut self, id: &EntryId) -> Result<&mut StoreState> {
        self.stores
            .get_mut(id)
            .ok_or_else(|| GraphMailError::StoreNotFound(id.to_string()))
    }
}

impl StoreState {
    fn folder(&self, id: &EntryId) -> Result<&FolderState> {
        self.folders
            .get(id)
            .ok_or_else(|| GraphMailError::FolderNotFound(id.to_string()))
    }

    fn folder_mut(&mut self, id: &EntryId) -> Result<&mut FolderState> {
        self.folders
            .get_mut(id)
            .ok_or_else(|| GraphMailError::FolderNotFound(id.to_string()))
    }

    fn item(&self, id: &EntryId) -> Result<&ItemState> {
        self.items
            .get(id)
            .ok_or_else(|| GraphMailError::ItemNotFound(id.to_string()))
    }
}

struct Inner {
    state: Mutex<State>,
    watches: Mutex<BTreeMap<WatchKey, Vec<(u64, Arc<ChangeCallback>)>>>,
    next_watch_id: AtomicU64,
    named_resolve_calls: AtomicUsize,
    prop_id_resolve_calls: AtomicUsize,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        sync::lock(&self.state)
    }

    fn dispatch(&self, key: &WatchKey, events: &[TableEvent]) {
        if events.is_empty() {
            return;
        }
        // Snapshot the callbacks so none run under the registry lock; a
        // callback is free to re-enter the backend to re-read its table.
        let callbacks: Vec<Arc<ChangeCallback>> = {
            let watches = sync::lock(&self.watches);
            match watches.get(key) {
                Some(entries) => entries.iter().map(|(_, callback)| Arc::clone(callback)).collect(),
                None => Vec::new(),
            }
        };
        debug!(
            watchers = callbacks.len(),
            events = events.len(),
            "dispatching table events"
        );
        for callback in callbacks {
            callback(events);
        }
    }

    fn remove_watch(&self, key: &WatchKey, watch_id: u64) {
        let mut watches = sync::lock(&self.watches);
        if let Some(entries) = watches.get_mut(key) {
            entries.retain(|(id, _)| *id != watch_id);
            if entries.is_empty() {
                watches.remove(key);
            }
        }
    }
}

/// The in-memory backend. Clone the `Arc` that owns it to keep mutating the
/// stores while a [`Session`](crate::session::Session) reads from them.
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                watches: Mutex::new(BTreeMap::new()),
                next_watch_id: AtomicU64::new(1),
                named_resolve_calls: AtomicUsize::new(0),
                prop_id_resolve_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a store with an empty root folder and return its entry id.
    pub fn add_store(&self, name: &str) -> EntryId {
        let mut state = self.inner.state();
        let (store_id, _) = state.alloc();
        let (root_id, root_key) = state.alloc();

        let mut root = FolderState::default();
        put(&mut root.props, tags::ENTRY_ID, RawValue::Binary(root_id.0.clone()));
        put(&mut root.props, tags::INSTANCE_KEY, RawValue::Binary(root_key.0));
        put(&mut root.props, tags::DISPLAY_NAME, utf16("Top of Store"));
        put(&mut root.props, tags::CONTENT_COUNT, RawValue::Int(0));
        put(&mut root.props, tags::CONTENT_UNREAD, RawValue::Int(0));

        let mut props = PropMap::new();
        put(&mut props, tags::ENTRY_ID, RawValue::Binary(store_id.0.clone()));
        put(&mut props, tags::DISPLAY_NAME, utf16(name));
        put(&mut props, tags::SUBTREE_ENTRY_ID, RawValue::Binary(root_id.0.clone()));

        let mut folders = BTreeMap::new();
        folders.insert(root_id.clone(), root);
        state.stores.insert(
            store_id.clone(),
            StoreState {
                props,
                root_id,
                inbox_id: None,
                folders,
                items: BTreeMap::new(),
                named: BTreeMap::new(),
                next_named_id: NAMED_PROP_ID_MIN,
            },
        );
        store_id
    }

    /// Create a child folder and notify hierarchy watchers of the parent.
    pub fn add_folder(&self, store: &EntryId, parent: &EntryId, name: &str) -> Result<EntryId> {
        let (key, events, folder_id) = {
            let mut state = self.inner.state();
            let (folder_id, instance_key) = state.alloc();
            let store_state = state.store_mut(store)?;

            let mut folder = FolderState {
                parent: Some(parent.clone()),
                ..Default::default()
            };
            put(&mut folder.props, tags::ENTRY_ID, RawValue::Binary(folder_id.0.clone()));
            put(&mut folder.props, tags::INSTANCE_KEY, RawValue::Binary(instance_key.0.clone()));
            put(&mut folder.props, tags::PARENT_ENTRY_ID, RawValue::Binary(parent.0.clone()));
            put(&mut folder.props, tags::DISPLAY_NAME, utf16(name));
            put(&mut folder.props, tags::CONTENT_COUNT, RawValue::Int(0));
            put(&mut folder.props, tags::CONTENT_UNREAD, RawValue::Int(0));
            let row = props_row(&folder.props);

            let last_child = store_state.folder(parent)?.sub_folders.last().cloned();
            let prior = last_child
                .map(|id| store_state.folder(&id).map(|child| instance_key_of(&child.props)))
                .transpose()?
                .unwrap_or_default();

            let parent_state = store_state.folder_mut(parent)?;
            parent_state.sub_folders.push(folder_id.clone());
            store_state.folders.insert(folder_id.clone(), folder);

            (
                (store.clone(), parent.clone(), TableKind::Hierarchy),
                vec![TableEvent::RowAdded {
                    prior_instance_key: prior,
                    row,
                }],
                folder_id,
            )
        };
        self.inner.dispatch(&key, &events);
        Ok(folder_id)
    }

    /// Designate the store's receive folder.
    pub fn set_inbox(&self, store: &EntryId, folder: &EntryId) -> Result<()> {
        let mut state = self.inner.state();
        let store_state = state.store_mut(store)?;
        store_state.folder(folder)?;
        store_state.inbox_id = Some(folder.clone());
        Ok(())
    }

    /// Append an item to a folder and notify contents watchers.
    pub fn add_item(
        &self,
        store: &EntryId,
        folder: &EntryId,
        subject: &str,
        received: DateTime<Utc>,
    ) -> Result<EntryId> {
        self.insert_item(store, folder, None, subject, received)
    }

    /// Insert an item after the given sibling (`None` inserts at the front)
    /// and notify contents watchers with the matching prior instance key.
    pub fn insert_item_after(
        &self,
        store: &EntryId,
        folder: &EntryId,
        after: Option<&EntryId>,
        subject: &str,
        received: DateTime<Utc>,
    ) -> Result<EntryId> {
        self.insert_item(store, folder, Some(after), subject, received)
    }

    fn insert_item(
        &self,
        store: &EntryId,
        folder: &EntryId,
        position: Option<Option<&EntryId>>,
        subject: &str,
        received: DateTime<Utc>,
    ) -> Result<EntryId> {
        let (key, events, item_id) = {
            let mut state = self.inner.state();
            let (item_id, instance_key) = state.alloc();
            let store_state = state.store_mut(store)?;

            let mut props = PropMap::new();
            put(&mut props, tags::ENTRY_ID, RawValue::Binary(item_id.0.clone()));
            put(&mut props, tags::INSTANCE_KEY, RawValue::Binary(instance_key.0.clone()));
            put(&mut props, tags::PARENT_ENTRY_ID, RawValue::Binary(folder.0.clone()));
            put(&mut props, tags::SUBJECT, utf16(subject));
            put(&mut props, tags::MESSAGE_FLAGS, RawValue::Int(0));
            put(&mut props, tags::RECEIVED_TIME, RawValue::Time(received));
            put(&mut props, tags::MODIFIED_TIME, RawValue::Time(received));
            let row = props_row(&props);

            let folder_state = store_state.folder(folder)?;
            // Appends ride after the current last item; explicit positions
            // after the named sibling, or at the front for `Some(None)`.
            let (index, prior_id) = match position {
                None => (folder_state.items.len(), folder_state.items.last().cloned()),
                Some(None) => (0, None),
                Some(Some(after)) => {
                    let at = folder_state
                        .items
                        .iter()
                        .position(|id| id == after)
                        .ok_or_else(|| GraphMailError::ItemNotFound(after.to_string()))?;
                    (at + 1, Some(after.clone()))
                }
            };
            let prior = prior_id
                .map(|id| store_state.item(&id).map(|item| instance_key_of(&item.props)))
                .transpose()?
                .unwrap_or_default();

            let folder_state = store_state.folder_mut(folder)?;
            folder_state.items.insert(index, item_id.clone());
            bump(&mut folder_state.props, tags::CONTENT_COUNT, 1);
            bump(&mut folder_state.props, tags::CONTENT_UNREAD, 1);
            store_state.items.insert(
                item_id.clone(),
                ItemState {
                    props,
                    parent: folder.clone(),
                },
            );

            (
                (store.clone(), folder.clone(), TableKind::Contents),
                vec![TableEvent::RowAdded {
                    prior_instance_key: prior,
                    row,
                }],
                item_id,
            )
        };
        self.inner.dispatch(&key, &events);
        Ok(item_id)
    }

    /// Rewrite an item's subject and notify contents watchers.
    pub fn update_item(&self, store: &EntryId, item: &EntryId, subject: &str) -> Result<()> {
        let (key, events) = {
            let mut state = self.inner.state();
            let store_state = state.store_mut(store)?;
            let item_state = store_state
                .items
                .get_mut(item)
                .ok_or_else(|| GraphMailError::ItemNotFound(item.to_string()))?;
            put(&mut item_state.props, tags::SUBJECT, utf16(subject));
            put(&mut item_state.props, tags::MODIFIED_TIME, RawValue::Time(Utc::now()));
            (
                (store.clone(), item_state.parent.clone(), TableKind::Contents),
                vec![TableEvent::RowModified {
                    instance_key: instance_key_of(&item_state.props),
                    row: props_row(&item_state.props),
                }],
            )
        };
        self.inner.dispatch(&key, &events);
        Ok(())
    }

    /// Delete an item and notify contents watchers.
    pub fn remove_item(&self, store: &EntryId, item: &EntryId) -> Result<()> {
        let (key, events) = {
            let mut state = self.inner.state();
            let store_state = state.store_mut(store)?;
            let item_state = store_state
                .items
                .remove(item)
                .ok_or_else(|| GraphMailError::ItemNotFound(item.to_string()))?;
            let parent = item_state.parent.clone();
            let folder_state = store_state.folder_mut(&parent)?;
            folder_state.items.retain(|id| id != item);
            bump(&mut folder_state.props, tags::CONTENT_COUNT, -1);
            (
                (store.clone(), parent, TableKind::Contents),
                vec![TableEvent::RowDeleted {
                    instance_key: instance_key_of(&item_state.props),
                }],
            )
        };
        self.inner.dispatch(&key, &events);
        Ok(())
    }

    /// Rename a folder and notify hierarchy watchers of its parent.
    pub fn rename_folder(&self, store: &EntryId, folder: &EntryId, name: &str) -> Result<()> {
        let (key, events) = {
            let mut state = self.inner.state();
            let store_state = state.store_mut(store)?;
            let folder_state = store_state.folder_mut(folder)?;
            put(&mut folder_state.props, tags::DISPLAY_NAME, utf16(name));
            let parent = folder_state
                .parent
                .clone()
                .ok_or_else(|| GraphMailError::InvalidInput("cannot rename the root folder".into()))?;
            (
                (store.clone(), parent, TableKind::Hierarchy),
                vec![TableEvent::RowModified {
                    instance_key: instance_key_of(&folder_state.props),
                    row: props_row(&folder_state.props),
                }],
            )
        };
        self.inner.dispatch(&key, &events);
        Ok(())
    }

    /// Write a property directly onto the store object.
    pub fn set_store_prop(&self, store: &EntryId, tag: PropTag, value: RawValue) -> Result<()> {
        let mut state = self.inner.state();
        let store_state = state.store_mut(store)?;
        put(&mut store_state.props, tag, value);
        Ok(())
    }

    /// Write a property onto a folder or item without emitting events.
    pub fn set_object_prop(
        &self,
        store: &EntryId,
        object: &EntryId,
        tag: PropTag,
        value: RawValue,
    ) -> Result<()> {
        let mut state = self.inner.state();
        let store_state = state.store_mut(store)?;
        if let Some(folder) = store_state.folders.get_mut(object) {
            put(&mut folder.props, tag, value);
            return Ok(());
        }
        if let Some(item) = store_state.items.get_mut(object) {
            put(&mut item.props, tag, value);
            return Ok(());
        }
        Err(GraphMailError::ItemNotFound(object.to_string()))
    }

    /// Register a named property for the store and return its numeric id.
    /// Only registered descriptors resolve; unknown ones come back `None`.
    pub fn define_named_prop(&self, store: &EntryId, descriptor: &NamedPropId) -> Result<u32> {
        let mut state = self.inner.state();
        let store_state = state.store_mut(store)?;
        if let Some(id) = store_state.named.get(descriptor) {
            return Ok(*id);
        }
        let id = store_state.next_named_id;
        store_state.next_named_id += 1;
        store_state.named.insert(descriptor.clone(), id);
        Ok(id)
    }

    /// Push a raw event batch at every watcher of one table. Used by tests to
    /// exercise reload and error signals.
    pub fn emit(&self, store: &EntryId, folder: &EntryId, kind: TableKind, events: &[TableEvent]) {
        self.inner.dispatch(&(store.clone(), folder.clone(), kind), events);
    }

    /// Number of installed table watches across every store.
    pub fn watch_count(&self) -> usize {
        let watches = sync::lock(&self.inner.watches);
        watches.values().map(Vec::len).sum()
    }

    /// How many named-to-numeric resolution calls the backend has served.
    pub fn named_resolve_calls(&self) -> usize {
        self.inner.named_resolve_calls.load(AtomicOrdering::SeqCst)
    }

    /// How many numeric-to-named resolution calls the backend has served.
    pub fn prop_id_resolve_calls(&self) -> usize {
        self.inner.prop_id_resolve_calls.load(AtomicOrdering::SeqCst)
    }
}

impl SessionBackend for MemoryBackend {
    fn store_rows(&self) -> Result<Vec<RawRow>> {
        let state = self.inner.state();
        Ok(state
            .stores
            .values()
            .map(|store| project(&store.props, &[tags::ENTRY_ID, tags::DISPLAY_NAME]))
            .collect())
    }

    fn open_store(&self, id: &EntryId) -> Result<Arc<dyn StoreBackend>> {
        let state = self.inner.state();
        state.store(id)?;
        Ok(Arc::new(MemoryStore {
            inner: Arc::clone(&self.inner),
            store_id: id.clone(),
        }))
    }
}

struct MemoryStore {
    inner: Arc<Inner>,
    store_id: EntryId,
}

impl StoreBackend for MemoryStore {
    fn root_id(&self) -> Result<EntryId> {
        let state = self.inner.state();
        Ok(state.store(&self.store_id)?.root_id.clone())
    }

    fn inbox_id(&self) -> Result<Option<EntryId>> {
        let state = self.inner.state();
        Ok(state.store(&self.store_id)?.inbox_id.clone())
    }

    fn store_properties(&self, tags: &[PropTag]) -> Result<Vec<RawCell>> {
        let state = self.inner.state();
        Ok(project(&state.store(&self.store_id)?.props, tags).cells)
    }

    fn object_properties(&self, object: &EntryId, tags: Option<&[PropTag]>) -> Result<Vec<RawCell>> {
        let state = self.inner.state();
        let store = state.store(&self.store_id)?;
        let props = if let Some(folder) = store.folders.get(object) {
            &folder.props
        } else if let Some(item) = store.items.get(object) {
            &item.props
        } else {
            return Err(GraphMailError::ItemNotFound(object.to_string()));
        };
        Ok(match tags {
            Some(tags) => project(props, tags).cells,
            None => props_row(props).cells,
        })
    }

    fn contents_table(&self, folder: &EntryId) -> Result<Arc<dyn TableBackend>> {
        self.open_table(folder, TableKind::Contents)
    }

    fn hierarchy_table(&self, folder: &EntryId) -> Result<Arc<dyn TableBackend>> {
        self.open_table(folder, TableKind::Hierarchy)
    }

    fn resolve_named_props(&self, names: &[NamedPropId]) -> Result<Vec<Option<u32>>> {
        self.inner.named_resolve_calls.fetch_add(1, AtomicOrdering::SeqCst);
        let state = self.inner.state();
        let store = state.store(&self.store_id)?;
        Ok(names.iter().map(|name| store.named.get(name).copied()).collect())
    }

    fn resolve_prop_ids(&self, ids: &[u32]) -> Result<Vec<Option<NamedPropId>>> {
        self.inner.prop_id_resolve_calls.fetch_add(1, AtomicOrdering::SeqCst);
        let state = self.inner.state();
        let store = state.store(&self.store_id)?;
        Ok(ids
            .iter()
            .map(|id| {
                store
                    .named
                    .iter()
                    .find(|(_, assigned)| *assigned == id)
                    .map(|(descriptor, _)| descriptor.clone())
            })
            .collect())
    }
}

impl MemoryStore {
    fn open_table(&self, folder: &EntryId, kind: TableKind) -> Result<Arc<dyn TableBackend>> {
        let state = self.inner.state();
        state.store(&self.store_id)?.folder(folder)?;
        Ok(Arc::new(MemoryTable {
            inner: Arc::clone(&self.inner),
            store_id: self.store_id.clone(),
            folder_id: folder.clone(),
            kind,
        }))
    }
}

struct MemoryTable {
    inner: Arc<Inner>,
    store_id: EntryId,
    folder_id: EntryId,
    kind: TableKind,
}

impl TableBackend for MemoryTable {
    fn read_rows(&self, plan: &ReadPlan) -> Result<Vec<RawRow>> {
        let state = self.inner.state();
        let store = state.store(&self.store_id)?;
        let folder = store.folder(&self.folder_id)?;

        let mut rows: Vec<(&EntryId, &PropMap)> = match self.kind {
            TableKind::Contents => folder
                .items
                .iter()
                .map(|id| store.item(id).map(|item| (id, &item.props)))
                .collect::<Result<_>>()?,
            TableKind::Hierarchy => folder
                .sub_folders
                .iter()
                .map(|id| store.folder(id).map(|child| (id, &child.props)))
                .collect::<Result<_>>()?,
        };

        rows.sort_by(|(left_id, left), (right_id, right)| {
            for key in &plan.sort {
                let ordering = compare_cells(
                    left.get(&key.tag.prop_id()).map(|(_, value)| value),
                    right.get(&key.tag.prop_id()).map(|(_, value)| value),
                );
                let ordering = if key.descending { ordering.reverse() } else { ordering };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            left_id.cmp(right_id)
        });

        let position = match &plan.seek {
            SeekPlan::Beginning => 0,
            SeekPlan::End => rows.len(),
            SeekPlan::Find(id) => rows
                .iter()
                .position(|(entry_id, _)| *entry_id == id)
                .ok_or_else(|| GraphMailError::InvalidInput(format!("seek cursor not in table: {id}")))?,
        };
        let position =
            (position as i64 + plan.offset as i64).clamp(0, rows.len() as i64) as usize;

        let window = if plan.take >= 0 {
            let end = (position + plan.take as usize).min(rows.len());
            &rows[position..end]
        } else {
            let start = (position as i64 + plan.take as i64).max(0) as usize;
            &rows[start..position]
        };

        Ok(window.iter().map(|(_, props)| project(props, &plan.columns)).collect())
    }

    fn watch(&self, on_change: ChangeCallback) -> Result<WatchGuard> {
        let key: WatchKey = (self.store_id.clone(), self.folder_id.clone(), self.kind);
        let watch_id = self.inner.next_watch_id.fetch_add(1, AtomicOrdering::SeqCst);
        {
            let mut watches = sync::lock(&self.inner.watches);
            watches
                .entry(key.clone())
                .or_default()
                .push((watch_id, Arc::new(on_change)));
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Ok(WatchGuard::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_watch(&key, watch_id);
            }
        }))
    }
}

fn utf16(text: &str) -> RawValue {
    RawValue::Unicode(text.encode_utf16().collect())
}

fn put(props: &mut PropMap, tag: PropTag, value: RawValue) {
    props.insert(
        tag.prop_id(),
        (tag.prop_type().unwrap_or(PropType::Unspecified), value),
    );
}

fn bump(props: &mut PropMap, tag: PropTag, delta: i64) {
    let current = match props.get(&tag.prop_id()) {
        Some((_, RawValue::Int(count))) => *count,
        _ => 0,
    };
    put(props, tag, RawValue::Int((current + delta).max(0)));
}

fn instance_key_of(props: &PropMap) -> InstanceKey {
    match props.get(&tags::INSTANCE_KEY.prop_id()) {
        Some((_, RawValue::Binary(bytes))) => InstanceKey(bytes.clone()),
        _ => InstanceKey::default(),
    }
}

/// Project a property bag onto a column set, with an error cell standing in
/// for each property the object lacks.
fn project(props: &PropMap, columns: &[PropTag]) -> RawRow {
    RawRow::new(
        columns
            .iter()
            .map(|tag| match props.get(&tag.prop_id()) {
                Some((prop_type, value)) => {
                    RawCell::new(PropTag::new(*prop_type, tag.prop_id()), value.clone())
                }
                None => RawCell::new(tag.with_type(PropType::Error), RawValue::Null),
            })
            .collect(),
    )
}

/// Every property of the object, in id order. Notification rows carry the
/// full bag rather than any single watcher's projection.
fn props_row(props: &PropMap) -> RawRow {
    RawRow::new(
        props
            .iter()
            .map(|(prop_id, (prop_type, value))| {
                RawCell::new(PropTag::new(*prop_type, *prop_id), value.clone())
            })
            .collect(),
    )
}

fn compare_cells(left: Option<&RawValue>, right: Option<&RawValue>) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) => compare_raw(left, right),
        // Missing values sort last.
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_raw(left: &RawValue, right: &RawValue) -> Ordering {
    match (left, right) {
        (RawValue::Int(a), RawValue::Int(b)) => a.cmp(b),
        (RawValue::Bool(a), RawValue::Bool(b)) => a.cmp(b),
        (RawValue::Time(a), RawValue::Time(b)) => a.cmp(b),
        (RawValue::Guid(a), RawValue::Guid(b)) => a.as_bytes().cmp(b.as_bytes()),
        (RawValue::Binary(a), RawValue::Binary(b)) => a.cmp(b),
        (RawValue::Null, RawValue::Null) => Ordering::Equal,
        _ => match (text_of(left), text_of(right)) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => type_rank(left).cmp(&type_rank(right)),
        },
    }
}

fn text_of(value: &RawValue) -> Option<String> {
    match value {
        RawValue::String8(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        RawValue::Unicode(units) => Some(String::from_utf16_lossy(units)),
        _ => None,
    }
}

fn type_rank(value: &RawValue) -> u8 {
    match value {
        RawValue::Null => 0,
        RawValue::Int(_) => 1,
        RawValue::Bool(_) => 2,
        RawValue::String8(_) => 3,
        RawValue::Unicode(_) => 3,
        RawValue::Guid(_) => 4,
        RawValue::Time(_) => 5,
        RawValue::Binary(_) => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::SortKey;
    use crate::types::property::PS_PUBLIC_STRINGS;
    use chrono::TimeZone;

    fn received(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn plan(columns: Vec<PropTag>, sort: Vec<SortKey>, take: i32) -> ReadPlan {
        ReadPlan {
            columns,
            sort,
            seek: SeekPlan::Beginning,
            offset: 0,
            take,
        }
    }

    fn subject_of(row: &RawRow) -> String {
        row.cells
            .iter()
            .find(|cell| cell.tag.prop_id() == tags::SUBJECT.prop_id())
            .and_then(|cell| text_of(&cell.value))
            .unwrap()
    }

    fn seeded() -> (MemoryBackend, EntryId, EntryId) {
        let backend = MemoryBackend::new();
        let store = backend.add_store("personal");
        let root = backend.open_store(&store).unwrap().root_id().unwrap();
        let inbox = backend.add_folder(&store, &root, "Inbox").unwrap();
        backend.set_inbox(&store, &inbox).unwrap();
        backend.add_item(&store, &inbox, "first", received(9)).unwrap();
        backend.add_item(&store, &inbox, "second", received(10)).unwrap();
        backend.add_item(&store, &inbox, "third", received(11)).unwrap();
        (backend, store, inbox)
    }

    #[test]
    fn test_projection_emits_error_cells_for_missing_props() {
        let (backend, store, inbox) = seeded();
        let table = backend
            .open_store(&store)
            .unwrap()
            .contents_table(&inbox)
            .unwrap();
        let rows = table
            .read_rows(&plan(vec![tags::SUBJECT, tags::DISPLAY_NAME], vec![], 50))
            .unwrap();

        assert_eq!(rows.len(), 3);
        let first = &rows[0];
        assert_eq!(first.cells.len(), 2);
        assert_eq!(first.cells[0].tag, tags::SUBJECT);
        // Items have no display name; the cell comes back as an error.
        assert_eq!(first.cells[1].tag.prop_type(), Some(PropType::Error));
        assert_eq!(first.cells[1].value, RawValue::Null);
    }

    #[test]
    fn test_sort_descending_and_bounded_take() {
        let (backend, store, inbox) = seeded();
        let table = backend
            .open_store(&store)
            .unwrap()
            .contents_table(&inbox)
            .unwrap();
        let sort = vec![SortKey {
            tag: tags::RECEIVED_TIME,
            descending: true,
        }];

        let rows = table.read_rows(&plan(vec![tags::SUBJECT], sort.clone(), 2)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(subject_of(&rows[0]), "third");
        assert_eq!(subject_of(&rows[1]), "second");
    }

    #[test]
    fn test_negative_take_reads_backward_from_end() {
        let (backend, store, inbox) = seeded();
        let table = backend
            .open_store(&store)
            .unwrap()
            .contents_table(&inbox)
            .unwrap();
        let rows = table
            .read_rows(&ReadPlan {
                columns: vec![tags::SUBJECT],
                sort: vec![],
                seek: SeekPlan::End,
                offset: 0,
                take: -2,
            })
            .unwrap();

        // The two rows before the end, still in table order.
        assert_eq!(rows.len(), 2);
        assert_eq!(subject_of(&rows[0]), "second");
        assert_eq!(subject_of(&rows[1]), "third");
    }

    #[test]
    fn test_seek_find_with_offset() {
        let (backend, store, inbox) = seeded();
        let store_backend = backend.open_store(&store).unwrap();
        let table = store_backend.contents_table(&inbox).unwrap();

        let all = table.read_rows(&plan(vec![tags::ENTRY_ID, tags::SUBJECT], vec![], 50)).unwrap();
        let first_id = match &all[0].cells[0].value {
            RawValue::Binary(bytes) => EntryId(bytes.clone()),
            other => panic!("expected binary entry id, got {:?}", other),
        };

        let rows = table
            .read_rows(&ReadPlan {
                columns: vec![tags::SUBJECT],
                sort: vec![],
                seek: SeekPlan::Find(first_id),
                offset: 1,
                take: 50,
            })
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(subject_of(&rows[0]), "second");
    }

    #[test]
    fn test_watch_dispatch_and_guard_teardown() {
        let (backend, store, inbox) = seeded();
        let table = backend
            .open_store(&store)
            .unwrap()
            .contents_table(&inbox)
            .unwrap();

        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let guard = table
            .watch(Box::new(move |events| {
                *counter.lock().unwrap() += events.len();
            }))
            .unwrap();
        assert_eq!(backend.watch_count(), 1);

        backend.add_item(&store, &inbox, "fourth", received(12)).unwrap();
        assert_eq!(*seen.lock().unwrap(), 1);

        drop(guard);
        assert_eq!(backend.watch_count(), 0);
        backend.add_item(&store, &inbox, "fifth", received(13)).unwrap();
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_named_prop_resolution_and_call_counting() {
        let backend = MemoryBackend::new();
        let store_id = backend.add_store("personal");
        let keywords = NamedPropId::by_name(*PS_PUBLIC_STRINGS, "Keywords");
        let assigned = backend.define_named_prop(&store_id, &keywords).unwrap();
        assert_eq!(assigned, NAMED_PROP_ID_MIN);

        let store = backend.open_store(&store_id).unwrap();
        let unknown = NamedPropId::by_name(*PS_PUBLIC_STRINGS, "NoSuchName");
        let resolved = store
            .resolve_named_props(&[keywords.clone(), unknown])
            .unwrap();
        assert_eq!(resolved, vec![Some(assigned), None]);
        assert_eq!(backend.named_resolve_calls(), 1);

        let reversed = store.resolve_prop_ids(&[assigned, 0x9999]).unwrap();
        assert_eq!(reversed, vec![Some(keywords), None]);
        assert_eq!(backend.prop_id_resolve_calls(), 1);
    }
}
