//! Change notification engine
//!
//! Turns raw table events from the backing store into typed, windowed change
//! payloads. Registrations with an equal key (target object + directive set)
//! share one `TableSink` and therefore exactly one backend watch; the watch
//! callback holds only `Weak` references, so a torn-down engine or sink makes
//! late notifications a no-op instead of an error.
//!
//! Within one event batch a reload-class signal wins: the window is re-read
//! and a single `Reloaded` payload replaces whatever row changes the batch
//! had produced so far.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use crate::backend::{RawRow, TableBackend, TableEvent, TableKind, WatchGuard};
use crate::rows::{Folder, Item};
use crate::store::Store;
use crate::sync;
use crate::table::{SortKey, TableDirectives};
use crate::types::changes::RowChange;
use crate::types::directives::{RegistrationKey, TableDirectiveSet};
use crate::types::error::Result;
use crate::types::{EntryId, InstanceKey, ObjectId, PropTag};

/// Row types that can populate a subscribed window.
pub trait TableRow: Sized + Send + Sync + 'static {
    fn default_columns() -> &'static [PropTag];
    fn default_sort() -> &'static [SortKey];
    fn from_row(store: &Arc<Store>, row: RawRow) -> Result<Self>;
    fn instance_key(&self) -> &InstanceKey;
}

impl TableRow for Item {
    fn default_columns() -> &'static [PropTag] {
        Item::DEFAULT_COLUMNS
    }

    fn default_sort() -> &'static [SortKey] {
        &Item::DEFAULT_SORT
    }

    fn from_row(store: &Arc<Store>, row: RawRow) -> Result<Self> {
        Item::from_row(store, row)
    }

    fn instance_key(&self) -> &InstanceKey {
        self.instance_key()
    }
}

impl TableRow for Folder {
    fn default_columns() -> &'static [PropTag] {
        Folder::DEFAULT_COLUMNS
    }

    fn default_sort() -> &'static [SortKey] {
        &Folder::DEFAULT_SORT
    }

    fn from_row(store: &Arc<Store>, row: RawRow) -> Result<Self> {
        Folder::from_row(store, row)
    }

    fn instance_key(&self) -> &InstanceKey {
        self.instance_key()
    }
}

/// Shared window over one watched table. Alive as long as at least one
/// registration references it; dropping the last reference releases the
/// backend watch through the guard.
struct TableSink<R> {
    store: Arc<Store>,
    table: Arc<dyn TableBackend>,
    directives: TableDirectiveSet,
    window: Mutex<Vec<Arc<R>>>,
    watch: Mutex<Option<WatchGuard>>,
}

impl<R: TableRow> TableSink<R> {
    fn open(
        store: Arc<Store>,
        object_id: &EntryId,
        kind: TableKind,
        directives: TableDirectiveSet,
    ) -> Result<Arc<Self>> {
        let folder_id = if object_id.is_empty() { store.root_id()? } else { object_id.clone() };
        let table = match kind {
            TableKind::Contents => store.backend().contents_table(&folder_id)?,
            TableKind::Hierarchy => store.backend().hierarchy_table(&folder_id)?,
        };
        let sink = Arc::new(Self {
            store,
            table,
            directives,
            window: Mutex::new(Vec::new()),
            watch: Mutex::new(None),
        });
        let initial = sink.read_window()?;
        *sync::lock(&sink.window) = initial;
        Ok(sink)
    }

    fn read_window(&self) -> Result<Vec<Arc<R>>> {
        let planner = TableDirectives::new(Some(Arc::clone(&self.store)), &self.directives)?;
        let raw = planner.read(self.table.as_ref(), R::default_columns(), R::default_sort())?;
        raw.into_iter()
            .map(|row| R::from_row(&self.store, row).map(Arc::new))
            .collect()
    }

    /// Fold one raw event batch into the window, producing the typed changes
    /// to deliver.
    fn apply(&self, events: &[TableEvent]) -> Result<Vec<RowChange<R>>> {
        let mut window = sync::lock(&self.window);
        let mut out: Vec<RowChange<R>> = Vec::new();
        for event in events {
            match event {
                TableEvent::Changed | TableEvent::Error | TableEvent::Reload => {
                    debug!("reload-class event, re-reading window");
                    let rows = self.read_window()?;
                    *window = rows.clone();
                    out.clear();
                    out.push(RowChange::Reloaded { rows });
                    break;
                }
                TableEvent::RowAdded {
                    prior_instance_key,
                    row,
                } => {
                    // The new row lands after the row carrying the prior key.
                    // A key matching nothing in the window (the empty key
                    // included) means the add is outside it.
                    let Some(index) = window
                        .iter()
                        .position(|entry| entry.instance_key() == prior_instance_key)
                        .map(|at| at + 1)
                    else {
                        debug!("dropping row add outside the window");
                        continue;
                    };
                    let row = Arc::new(R::from_row(&self.store, row.clone())?);
                    window.insert(index, Arc::clone(&row));
                    out.push(RowChange::Added { index, row });
                }
                TableEvent::RowModified { instance_key, row } => {
                    let Some(index) = window
                        .iter()
                        .position(|entry| entry.instance_key() == instance_key)
                    else {
                        debug!("dropping modification outside the window");
                        continue;
                    };
                    let row = Arc::new(R::from_row(&self.store, row.clone())?);
                    window[index] = Arc::clone(&row);
                    out.push(RowChange::Updated { index, row });
                }
                TableEvent::RowDeleted { instance_key } => {
                    let Some(index) = window
                        .iter()
                        .position(|entry| entry.instance_key() == instance_key)
                    else {
                        debug!("dropping deletion outside the window");
                        continue;
                    };
                    window.remove(index);
                    out.push(RowChange::Removed {
                        index,
                        key: instance_key.clone(),
                    });
                }
            }
        }
        Ok(out)
    }
}

struct Registration<R> {
    id: u64,
    key: RegistrationKey,
    sink: Arc<TableSink<R>>,
    listener: flume::Sender<Vec<RowChange<R>>>,
}

/// All registrations of one subscription field, ordered by key.
pub(crate) struct RegistrationSet<R> {
    entries: Mutex<Vec<Registration<R>>>,
}

impl<R: TableRow> RegistrationSet<R> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
        })
    }

    /// Fan a payload out to every listener whose registered target matches
    /// and whose directives are a subset of the delivery key's.
    fn deliver(&self, key: &RegistrationKey, changes: Vec<RowChange<R>>) {
        let entries = sync::lock(&self.entries);
        for entry in entries.iter() {
            if entry.key.object != key.object {
                continue;
            }
            if !entry.key.directives.subset_of(&key.directives) {
                continue;
            }
            if entry.listener.send(changes.clone()).is_err() {
                debug!(id = entry.id, "listener receiver dropped");
            }
        }
    }

    fn unregister(&self, id: u64) {
        let mut entries = sync::lock(&self.entries);
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() < before {
            debug!(id, "subscription unregistered");
        }
    }
}

/// Handle owning one registration; the receiver yields typed change batches.
/// Dropping the handle unregisters, and the last handle on a shared sink
/// releases the backend watch.
pub struct SubscriptionHandle<R: TableRow> {
    id: u64,
    receiver: flume::Receiver<Vec<RowChange<R>>>,
    set: Weak<RegistrationSet<R>>,
}

impl<R: TableRow> SubscriptionHandle<R> {
    pub fn receiver(&self) -> &flume::Receiver<Vec<RowChange<R>>> {
        &self.receiver
    }

    /// Await the next change batch; `None` once the engine is gone.
    pub async fn next(&self) -> Option<Vec<RowChange<R>>> {
        self.receiver.recv_async().await.ok()
    }

    /// Non-blocking poll for a pending change batch.
    pub fn try_next(&self) -> Option<Vec<RowChange<R>>> {
        self.receiver.try_recv().ok()
    }
}

impl<R: TableRow> std::fmt::Debug for SubscriptionHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<R: TableRow> Drop for SubscriptionHandle<R> {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.unregister(self.id);
        }
    }
}

/// Owns the three registration sets and hands out subscriptions.
pub(crate) struct NotifyEngine {
    items: Arc<RegistrationSet<Item>>,
    sub_folders: Arc<RegistrationSet<Folder>>,
    root_folders: Arc<RegistrationSet<Folder>>,
    next_id: AtomicU64,
}

impl NotifyEngine {
    pub(crate) fn new() -> Self {
        Self {
            items: RegistrationSet::new(),
            sub_folders: RegistrationSet::new(),
            root_folders: RegistrationSet::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn subscribe_items(
        &self,
        store: Arc<Store>,
        folder: EntryId,
        directives: TableDirectiveSet,
    ) -> Result<SubscriptionHandle<Item>> {
        self.subscribe(&self.items, store, folder, TableKind::Contents, directives)
    }

    pub(crate) fn subscribe_sub_folders(
        &self,
        store: Arc<Store>,
        folder: EntryId,
        directives: TableDirectiveSet,
    ) -> Result<SubscriptionHandle<Folder>> {
        self.subscribe(&self.sub_folders, store, folder, TableKind::Hierarchy, directives)
    }

    /// Top-level folders of a store; the registration key uses the empty
    /// object id so every subscriber to the same store shares a sink.
    pub(crate) fn subscribe_root_folders(
        &self,
        store: Arc<Store>,
        directives: TableDirectiveSet,
    ) -> Result<SubscriptionHandle<Folder>> {
        self.subscribe(
            &self.root_folders,
            store,
            EntryId::default(),
            TableKind::Hierarchy,
            directives,
        )
    }

    fn subscribe<R: TableRow>(
        &self,
        set: &Arc<RegistrationSet<R>>,
        store: Arc<Store>,
        object_id: EntryId,
        kind: TableKind,
        directives: TableDirectiveSet,
    ) -> Result<SubscriptionHandle<R>> {
        let key = RegistrationKey {
            object: ObjectId {
                store_id: store.id().clone(),
                object_id: object_id.clone(),
            },
            directives: directives.clone(),
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = flume::unbounded();

        // Opening a sink reads from the backing store, and deliver() contends
        // on the registration lock, so the open happens outside it.
        let existing = {
            let entries = sync::lock(&set.entries);
            entries
                .iter()
                .find(|entry| entry.key == key)
                .map(|entry| Arc::clone(&entry.sink))
        };
        let opened = match existing {
            Some(sink) => {
                debug!(id, "joining shared table sink");
                sink
            }
            None => {
                debug!(id, "opening table sink");
                let sink = TableSink::open(store, &object_id, kind, directives)?;
                let watch = install_watch(&sink, set, &key)?;
                *sync::lock(&sink.watch) = Some(watch);
                sink
            }
        };

        let mut entries = sync::lock(&set.entries);
        // A racing registration may have published the same key while the
        // sink was opening; join its sink so an equal key keeps exactly one
        // backend watch. A discarded sink releases its watch on drop.
        let sink = match entries.iter().find(|entry| entry.key == key) {
            Some(racing) => Arc::clone(&racing.sink),
            None => opened,
        };
        entries.push(Registration {
            id,
            key,
            sink,
            listener: sender,
        });
        entries.sort_by(|left, right| left.key.cmp(&right.key).then(left.id.cmp(&right.id)));
        drop(entries);

        Ok(SubscriptionHandle {
            id,
            receiver,
            set: Arc::downgrade(set),
        })
    }
}

fn install_watch<R: TableRow>(
    sink: &Arc<TableSink<R>>,
    set: &Arc<RegistrationSet<R>>,
    key: &RegistrationKey,
) -> Result<WatchGuard> {
    let weak_set = Arc::downgrade(set);
    let weak_sink = Arc::downgrade(sink);
    let key = key.clone();
    sink.table.watch(Box::new(move |events| {
        let (Some(set), Some(sink)) = (weak_set.upgrade(), weak_sink.upgrade()) else {
            return;
        };
        match sink.apply(events) {
            Ok(changes) if !changes.is_empty() => set.deliver(&key, changes),
            Ok(_) => {}
            Err(error) => warn!(%error, "failed to apply change batch"),
        }
    }))
}
