//! Per-store context
//!
//! A [`Store`] is an immutable view over one backing store plus a handful of
//! interior-mutable caches: the insertion-only named-property cache consumed
//! by [`resolver`], lazily opened folder/item objects, the special-folder
//! map, and the root-folder window (invalidated by a hierarchy watch on the
//! root). [`Session::clear_caches`](crate::session::Session::clear_caches)
//! purges everything here except the property cache.

pub mod materialize;
pub mod resolver;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use crate::backend::{RawRow, RawValue, StoreBackend, WatchGuard};
use crate::rows::Folder;
use crate::rows::Item;
use crate::sync;
use crate::table::TableDirectives;
use crate::types::directives::{Column, TableDirectiveSet};
use crate::types::error::Result;
use crate::types::property::{NamedPropId, PropId, Property};
use crate::types::{tags, EntryId, PropTag, SpecialFolder};

struct RootFolderCache {
    directives: TableDirectiveSet,
    rows: Vec<Arc<Folder>>,
}

pub struct Store {
    id: EntryId,
    name: String,
    backend: Arc<dyn StoreBackend>,
    /// Named-property resolutions; insertion-only for the store's lifetime.
    prop_cache: RwLock<BTreeMap<NamedPropId, u32>>,
    root_id: Mutex<Option<EntryId>>,
    special: Mutex<Option<BTreeMap<SpecialFolder, EntryId>>>,
    folders: Mutex<HashMap<EntryId, Arc<Folder>>>,
    items: Mutex<HashMap<EntryId, Arc<Item>>>,
    root_folders: Mutex<Option<RootFolderCache>>,
    root_watch: Mutex<Option<WatchGuard>>,
}

impl Store {
    pub(crate) fn new(id: EntryId, name: String, backend: Arc<dyn StoreBackend>) -> Arc<Self> {
        Arc::new(Self {
            id,
            name,
            backend,
            prop_cache: RwLock::new(BTreeMap::new()),
            root_id: Mutex::new(None),
            special: Mutex::new(None),
            folders: Mutex::new(HashMap::new()),
            items: Mutex::new(HashMap::new()),
            root_folders: Mutex::new(None),
            root_watch: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &EntryId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// Entry id of the store's root folder, fetched once.
    pub fn root_id(&self) -> Result<EntryId> {
        let mut cached = sync::lock(&self.root_id);
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }
        let id = self.backend.root_id()?;
        *cached = Some(id.clone());
        Ok(id)
    }

    /// The store's top-level folders under the given directives.
    ///
    /// The window is cached per directive set; asking with a different set
    /// replaces the cache. A hierarchy watch on the root folder invalidates
    /// the cache when the backing store reports any change.
    pub fn root_folders(self: &Arc<Self>, directives: &TableDirectiveSet) -> Result<Vec<Arc<Folder>>> {
        {
            let cache = sync::lock(&self.root_folders);
            if let Some(cached) = cache.as_ref() {
                if cached.directives == *directives {
                    return Ok(cached.rows.clone());
                }
            }
        }

        let root = self.root_id()?;
        let table = self.backend.hierarchy_table(&root)?;
        let planner = TableDirectives::new(Some(Arc::clone(self)), directives)?;
        let rows = planner.read(table.as_ref(), Folder::DEFAULT_COLUMNS, &Folder::DEFAULT_SORT)?;
        let rows: Vec<Arc<Folder>> = rows
            .into_iter()
            .map(|row| Folder::from_row(self, row).map(Arc::new))
            .collect::<Result<_>>()?;

        self.install_root_watch(&root)?;
        *sync::lock(&self.root_folders) = Some(RootFolderCache {
            directives: directives.clone(),
            rows: rows.clone(),
        });
        Ok(rows)
    }

    fn install_root_watch(self: &Arc<Self>, root: &EntryId) -> Result<()> {
        let mut guard = sync::lock(&self.root_watch);
        if guard.is_some() {
            return Ok(());
        }
        let table = self.backend.hierarchy_table(root)?;
        let weak = Arc::downgrade(self);
        let watch = table.watch(Box::new(move |_events| {
            if let Some(store) = weak.upgrade() {
                debug!(store = %store.id, "root folder change, invalidating window");
                *sync::lock(&store.root_folders) = None;
            }
        }))?;
        *guard = Some(watch);
        Ok(())
    }

    /// Resolve the requested well-known folders. Folders the store does not
    /// designate are simply absent from the result.
    pub fn special_folders(
        &self,
        which: &[SpecialFolder],
    ) -> Result<BTreeMap<SpecialFolder, EntryId>> {
        let map = self.special_folder_map()?;
        Ok(which
            .iter()
            .filter_map(|kind| map.get(kind).map(|id| (*kind, id.clone())))
            .collect())
    }

    fn special_folder_map(&self) -> Result<BTreeMap<SpecialFolder, EntryId>> {
        let mut special = sync::lock(&self.special);
        if let Some(map) = special.as_ref() {
            return Ok(map.clone());
        }

        // The receive folder designates most of the well-known folders; the
        // store object carries the rest. First writer wins on conflicts.
        let mut map = BTreeMap::new();
        if let Some(inbox) = self.backend.inbox_id()? {
            map.insert(SpecialFolder::Inbox, inbox.clone());

            const INBOX_TAGS: [(SpecialFolder, PropTag); 5] = [
                (SpecialFolder::Calendar, tags::CALENDAR_ENTRY_ID),
                (SpecialFolder::Contacts, tags::CONTACTS_ENTRY_ID),
                (SpecialFolder::Tasks, tags::TASKS_ENTRY_ID),
                (SpecialFolder::Archive, tags::ARCHIVE_ENTRY_ID),
                (SpecialFolder::Drafts, tags::DRAFTS_ENTRY_ID),
            ];
            let projection: Vec<PropTag> = INBOX_TAGS.iter().map(|(_, tag)| *tag).collect();
            let cells = self.backend.object_properties(&inbox, Some(&projection))?;
            for ((kind, _), cell) in INBOX_TAGS.iter().zip(cells) {
                if let RawValue::Binary(bytes) = cell.value {
                    map.entry(*kind).or_insert(EntryId(bytes));
                }
            }
        }

        const STORE_TAGS: [(SpecialFolder, PropTag); 3] = [
            (SpecialFolder::Outbox, tags::OUTBOX_ENTRY_ID),
            (SpecialFolder::Deleted, tags::WASTEBASKET_ENTRY_ID),
            (SpecialFolder::Sent, tags::SENT_ITEMS_ENTRY_ID),
        ];
        let projection: Vec<PropTag> = STORE_TAGS.iter().map(|(_, tag)| *tag).collect();
        let cells = self.backend.store_properties(&projection)?;
        for ((kind, _), cell) in STORE_TAGS.iter().zip(cells) {
            if let RawValue::Binary(bytes) = cell.value {
                map.entry(*kind).or_insert(EntryId(bytes));
            }
        }

        *special = Some(map.clone());
        Ok(map)
    }

    /// Open a folder by entry id; the empty id opens the root. Opened
    /// folders are cached until [`clear_caches`](Self::clear_caches).
    pub fn open_folder(self: &Arc<Self>, id: &EntryId) -> Result<Arc<Folder>> {
        let target = if id.is_empty() { self.root_id()? } else { id.clone() };
        if let Some(folder) = sync::lock(&self.folders).get(&target) {
            return Ok(Arc::clone(folder));
        }
        let cells = self.backend.object_properties(&target, Some(Folder::DEFAULT_COLUMNS))?;
        let folder = Arc::new(Folder::from_row(self, RawRow::new(cells))?);
        sync::lock(&self.folders).insert(target, Arc::clone(&folder));
        Ok(folder)
    }

    /// Open an item by entry id, cached like folders.
    pub fn open_item(self: &Arc<Self>, id: &EntryId) -> Result<Arc<Item>> {
        if let Some(item) = sync::lock(&self.items).get(id) {
            return Ok(Arc::clone(item));
        }
        let cells = self.backend.object_properties(id, Some(Item::DEFAULT_COLUMNS))?;
        let item = Arc::new(Item::from_row(self, RawRow::new(cells))?);
        sync::lock(&self.items).insert(id.clone(), Arc::clone(&item));
        Ok(item)
    }

    /// Read folder properties: every property when `columns` is `None`, or
    /// exactly the requested projection.
    pub fn folder_properties(
        &self,
        id: &EntryId,
        columns: Option<&[Column]>,
    ) -> Result<Vec<Property>> {
        let target = if id.is_empty() { self.root_id()? } else { id.clone() };
        self.object_props(&target, columns)
    }

    /// Read item properties, same contract as folders.
    pub fn item_properties(&self, id: &EntryId, columns: Option<&[Column]>) -> Result<Vec<Property>> {
        self.object_props(id, columns)
    }

    /// Ad-hoc projection directly off the store object.
    pub fn properties(&self, columns: &[Column]) -> Result<Vec<Property>> {
        let projection = self.column_tags(columns)?;
        let cells = self.backend.store_properties(&projection)?;
        materialize::properties(self, &cells)
    }

    fn object_props(&self, id: &EntryId, columns: Option<&[Column]>) -> Result<Vec<Property>> {
        let cells = match columns {
            None => self.backend.object_properties(id, None)?,
            Some(columns) => {
                let projection = self.column_tags(columns)?;
                self.backend.object_properties(id, Some(&projection))?
            }
        };
        materialize::properties(self, &cells)
    }

    /// Resolve column directives to concrete tags, unresolved named columns
    /// projecting as id 0 (and coming back as dropped error cells).
    pub(crate) fn column_tags(&self, columns: &[Column]) -> Result<Vec<PropTag>> {
        let inputs: Vec<PropId> = columns.iter().map(|column| column.property.clone()).collect();
        let resolved = self.resolve_prop_inputs(&inputs)?;
        Ok(columns
            .iter()
            .zip(resolved)
            .map(|(column, resolved)| {
                let prop_id = resolved.map(|entry| entry.prop_id()).unwrap_or(0);
                PropTag::new(column.kind.physical_type(), prop_id)
            })
            .collect())
    }

    /// Drop every cached object and window. The named-property cache
    /// survives: resolutions stay valid for the store's lifetime.
    pub fn clear_caches(&self) {
        debug!(store = %self.id, "clearing store caches");
        sync::lock(&self.folders).clear();
        sync::lock(&self.items).clear();
        *sync::lock(&self.root_folders) = None;
        *sync::lock(&self.special) = None;
        *sync::lock(&self.root_id) = None;
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::SessionBackend;
    use crate::types::property::{NamedPropId, PS_PUBLIC_STRINGS};
    use chrono::{TimeZone as _, Utc};

    fn seeded() -> (MemoryBackend, EntryId, Arc<Store>) {
        let backend = MemoryBackend::new();
        let store_id = backend.add_store("personal");
        let store = Store::new(
            store_id.clone(),
            "personal".to_string(),
            backend.open_store(&store_id).unwrap(),
        );
        (backend, store_id, store)
    }

    #[test]
    fn test_special_folders_prefer_inbox_designations() {
        let (backend, store_id, store) = seeded();
        let root = store.root_id().unwrap();
        let inbox = backend.add_folder(&store_id, &root, "Inbox").unwrap();
        let drafts = backend.add_folder(&store_id, &root, "Drafts").unwrap();
        let trash = backend.add_folder(&store_id, &root, "Trash").unwrap();
        backend.set_inbox(&store_id, &inbox).unwrap();
        backend
            .set_object_prop(&store_id, &inbox, tags::DRAFTS_ENTRY_ID, RawValue::Binary(drafts.0.clone()))
            .unwrap();
        backend
            .set_store_prop(&store_id, tags::WASTEBASKET_ENTRY_ID, RawValue::Binary(trash.0.clone()))
            .unwrap();

        let map = store
            .special_folders(&[
                SpecialFolder::Inbox,
                SpecialFolder::Drafts,
                SpecialFolder::Deleted,
                SpecialFolder::Calendar,
            ])
            .unwrap();
        assert_eq!(map.get(&SpecialFolder::Inbox), Some(&inbox));
        assert_eq!(map.get(&SpecialFolder::Drafts), Some(&drafts));
        assert_eq!(map.get(&SpecialFolder::Deleted), Some(&trash));
        // No calendar designated anywhere.
        assert!(!map.contains_key(&SpecialFolder::Calendar));
    }

    #[test]
    fn test_open_folder_caches_until_cleared() {
        let (backend, store_id, store) = seeded();
        let root = store.root_id().unwrap();
        let inbox = backend.add_folder(&store_id, &root, "Inbox").unwrap();

        let first = store.open_folder(&inbox).unwrap();
        let second = store.open_folder(&inbox).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        store.clear_caches();
        let third = store.open_folder(&inbox).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(first.name(), third.name());
    }

    #[test]
    fn test_empty_id_opens_root() {
        let (_backend, _store_id, store) = seeded();
        let root = store.open_folder(&EntryId::default()).unwrap();
        assert_eq!(*root.id(), store.root_id().unwrap());
    }

    #[test]
    fn test_clear_caches_preserves_prop_cache() {
        let (backend, store_id, store) = seeded();
        let keywords = NamedPropId::by_name(*PS_PUBLIC_STRINGS, "Keywords");
        backend.define_named_prop(&store_id, &keywords).unwrap();

        store
            .resolve_prop_inputs(&[PropId::Named(keywords.clone())])
            .unwrap();
        assert_eq!(backend.named_resolve_calls(), 1);

        store.clear_caches();
        store.resolve_prop_inputs(&[PropId::Named(keywords)]).unwrap();
        // Still one round trip; the resolution cache survived the purge.
        assert_eq!(backend.named_resolve_calls(), 1);
    }

    #[test]
    fn test_root_folders_cache_and_watch_invalidation() {
        let (backend, store_id, store) = seeded();
        let root = store.root_id().unwrap();
        backend.add_folder(&store_id, &root, "Inbox").unwrap();

        let none = TableDirectiveSet::default();
        let first = store.root_folders(&none).unwrap();
        assert_eq!(first.len(), 1);
        let again = store.root_folders(&none).unwrap();
        assert!(Arc::ptr_eq(&first[0], &again[0]));

        // A hierarchy change under the root invalidates the window.
        backend.add_folder(&store_id, &root, "Archive").unwrap();
        let refreshed = store.root_folders(&none).unwrap();
        assert_eq!(refreshed.len(), 2);
    }

    #[test]
    fn test_root_folders_directive_change_replaces_cache() {
        let (backend, store_id, store) = seeded();
        let root = store.root_id().unwrap();
        backend.add_folder(&store_id, &root, "Beta").unwrap();
        backend.add_folder(&store_id, &root, "Alpha").unwrap();

        let all = store.root_folders(&TableDirectiveSet::default()).unwrap();
        assert_eq!(all.len(), 2);
        // Default sort is by display name.
        assert_eq!(all[0].name(), "Alpha");

        let one = TableDirectiveSet {
            take: Some(1),
            ..Default::default()
        };
        let limited = store.root_folders(&one).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_folder_properties_projection() {
        let (backend, store_id, store) = seeded();
        let root = store.root_id().unwrap();
        let inbox = backend.add_folder(&store_id, &root, "Inbox").unwrap();

        let props = store
            .folder_properties(
                &inbox,
                Some(&[Column {
                    kind: crate::types::property::ValueKind::String,
                    property: PropId::Int(tags::DISPLAY_NAME.prop_id()),
                }]),
            )
            .unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(
            props[0].value,
            crate::types::property::TypedValue::String("Inbox".to_string())
        );
    }

    #[test]
    fn test_item_properties_all() {
        let (backend, store_id, store) = seeded();
        let root = store.root_id().unwrap();
        let inbox = backend.add_folder(&store_id, &root, "Inbox").unwrap();
        let received = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let item = backend.add_item(&store_id, &inbox, "hello", received).unwrap();

        let props = store.item_properties(&item, None).unwrap();
        assert!(props
            .iter()
            .any(|prop| prop.id == PropId::Int(tags::SUBJECT.prop_id())));
    }
}
