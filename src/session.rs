//! Session layer
//!
//! The `Session` is the entry point: it enumerates stores off the backing
//! store once and keeps them behind an async lock, owns the notification
//! engine, and exposes the subscription and cache-invalidation surface.
//! Stores themselves are cheap shared handles; dropping the session drops
//! the engine and with it every remaining watch.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::SessionBackend;
use crate::notify::{NotifyEngine, SubscriptionHandle};
use crate::rows::{self, Folder, Item};
use crate::store::Store;
use crate::types::directives::TableDirectiveSet;
use crate::types::error::{check, GraphMailError, Result};
use crate::types::{tags, EntryId, ObjectId};

struct SessionInner {
    backend: Arc<dyn SessionBackend>,
    stores: RwLock<Option<Vec<Arc<Store>>>>,
    engine: NotifyEngine,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                backend,
                stores: RwLock::new(None),
                engine: NotifyEngine::new(),
            }),
        }
    }

    /// Enumerate stores, or look up the given ids. Lookups are partial: an
    /// unknown id yields `None` in its slot rather than failing the call.
    pub async fn stores(&self, ids: Option<&[EntryId]>) -> Result<Vec<Option<Arc<Store>>>> {
        let all = self.load_stores().await?;
        match ids {
            None => Ok(all.into_iter().map(Some).collect()),
            Some(ids) => Ok(ids
                .iter()
                .map(|id| all.iter().find(|store| store.id() == id).cloned())
                .collect()),
        }
    }

    /// Look up one store by entry id.
    pub async fn lookup_store(&self, id: &EntryId) -> Result<Option<Arc<Store>>> {
        let all = self.load_stores().await?;
        Ok(all.iter().find(|store| store.id() == id).cloned())
    }

    async fn load_stores(&self) -> Result<Vec<Arc<Store>>> {
        {
            let cached = self.inner.stores.read().await;
            if let Some(stores) = cached.as_ref() {
                return Ok(stores.clone());
            }
        }

        let stores_rows = self.inner.backend.store_rows()?;
        let mut stores = Vec::with_capacity(stores_rows.len());
        for row in stores_rows {
            let id = EntryId(rows::binary(&row.cells, tags::ENTRY_ID));
            check(!id.is_empty(), "store row missing entry id")?;
            let name = rows::text(&row.cells, tags::DISPLAY_NAME);
            let backend = self.inner.backend.open_store(&id)?;
            stores.push(Store::new(id, name, backend));
        }
        debug!(count = stores.len(), "enumerated stores");

        let mut cached = self.inner.stores.write().await;
        if let Some(existing) = cached.as_ref() {
            return Ok(existing.clone());
        }
        *cached = Some(stores.clone());
        Ok(stores)
    }

    /// Subscribe to item changes in one folder.
    pub async fn subscribe_items(
        &self,
        object: &ObjectId,
        directives: TableDirectiveSet,
    ) -> Result<SubscriptionHandle<Item>> {
        let store = self.require_store(&object.store_id).await?;
        self.inner
            .engine
            .subscribe_items(store, object.object_id.clone(), directives)
    }

    /// Subscribe to child-folder changes under one folder.
    pub async fn subscribe_sub_folders(
        &self,
        object: &ObjectId,
        directives: TableDirectiveSet,
    ) -> Result<SubscriptionHandle<Folder>> {
        let store = self.require_store(&object.store_id).await?;
        self.inner
            .engine
            .subscribe_sub_folders(store, object.object_id.clone(), directives)
    }

    /// Subscribe to changes of a store's top-level folders.
    pub async fn subscribe_root_folders(
        &self,
        store_id: &EntryId,
        directives: TableDirectiveSet,
    ) -> Result<SubscriptionHandle<Folder>> {
        let store = self.require_store(store_id).await?;
        self.inner.engine.subscribe_root_folders(store, directives)
    }

    /// Purge every store's object caches. Named-property resolutions are
    /// kept; they stay valid for a store's lifetime.
    pub async fn clear_caches(&self) {
        let cached = self.inner.stores.read().await;
        if let Some(stores) = cached.as_ref() {
            for store in stores {
                store.clear_caches();
            }
        }
    }

    /// Call after any out-of-band mutation of the backing store so reads
    /// stop serving stale windows.
    pub async fn invalidate_after_mutation(&self) {
        debug!("invalidating caches after mutation");
        self.clear_caches().await;
    }

    async fn require_store(&self, id: &EntryId) -> Result<Arc<Store>> {
        self.lookup_store(id)
            .await?
            .ok_or_else(|| GraphMailError::StoreNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::types::changes::RowChange;
    use crate::types::property::{NamedPropId, PropId, PS_PUBLIC_STRINGS};
    use chrono::{TimeZone as _, Utc};

    fn seeded() -> (Arc<MemoryBackend>, EntryId, EntryId) {
        let backend = Arc::new(MemoryBackend::new());
        let store_id = backend.add_store("personal");
        let root = {
            use crate::backend::SessionBackend as _;
            backend.open_store(&store_id).unwrap().root_id().unwrap()
        };
        let inbox = backend.add_folder(&store_id, &root, "Inbox").unwrap();
        backend.set_inbox(&store_id, &inbox).unwrap();
        (backend, store_id, inbox)
    }

    #[tokio::test]
    async fn test_store_enumeration_and_partial_lookup() {
        let (backend, store_id, _inbox) = seeded();
        backend.add_store("archive");
        let session = Session::new(backend.clone());

        let all = session.stores(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].as_ref().unwrap().name(), "personal");

        let unknown = EntryId(vec![0xEE; 8]);
        let looked_up = session.stores(Some(&[store_id.clone(), unknown])).await.unwrap();
        assert!(looked_up[0].is_some());
        assert!(looked_up[1].is_none());

        // The store list is loaded once and shared afterwards.
        let first = session.lookup_store(&store_id).await.unwrap().unwrap();
        let second = session.lookup_store(&store_id).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_subscribe_items_end_to_end() {
        let (backend, store_id, inbox) = seeded();
        let received = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        backend.add_item(&store_id, &inbox, "earlier", received).unwrap();
        let session = Session::new(backend.clone());

        let handle = session
            .subscribe_items(
                &ObjectId {
                    store_id: store_id.clone(),
                    object_id: inbox.clone(),
                },
                TableDirectiveSet::default(),
            )
            .await
            .unwrap();

        let later = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        backend.add_item(&store_id, &inbox, "hello", later).unwrap();

        let batch = handle.next().await.unwrap();
        match &batch[0] {
            RowChange::Added { index, row } => {
                assert_eq!(*index, 1);
                assert_eq!(row.subject(), "hello");
            }
            other => panic!("expected Added, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscribe_unknown_store_fails() {
        let (backend, _store_id, inbox) = seeded();
        let session = Session::new(backend);

        let err = session
            .subscribe_items(
                &ObjectId {
                    store_id: EntryId(vec![0xEE; 8]),
                    object_id: inbox,
                },
                TableDirectiveSet::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GraphMailError::StoreNotFound(_)));
    }

    #[tokio::test]
    async fn test_clear_caches_preserves_prop_cache_and_subscriptions() {
        let (backend, store_id, inbox) = seeded();
        let keywords = NamedPropId::by_name(*PS_PUBLIC_STRINGS, "Keywords");
        backend.define_named_prop(&store_id, &keywords).unwrap();
        let seeded_at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        backend.add_item(&store_id, &inbox, "seed", seeded_at).unwrap();
        let session = Session::new(backend.clone());

        let store = session.lookup_store(&store_id).await.unwrap().unwrap();
        store
            .resolve_prop_inputs(&[PropId::Named(keywords.clone())])
            .unwrap();
        assert_eq!(backend.named_resolve_calls(), 1);

        let handle = session
            .subscribe_items(
                &ObjectId {
                    store_id: store_id.clone(),
                    object_id: inbox.clone(),
                },
                TableDirectiveSet::default(),
            )
            .await
            .unwrap();

        session.invalidate_after_mutation().await;
        store.resolve_prop_inputs(&[PropId::Named(keywords)]).unwrap();
        assert_eq!(backend.named_resolve_calls(), 1);

        // Subscriptions survive cache invalidation.
        let received = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        backend.add_item(&store_id, &inbox, "still alive", received).unwrap();
        assert!(handle.next().await.is_some());
    }

    #[tokio::test]
    async fn test_subscribe_root_folders_via_session() {
        let (backend, store_id, _inbox) = seeded();
        let session = Session::new(backend.clone());

        let handle = session
            .subscribe_root_folders(&store_id, TableDirectiveSet::default())
            .await
            .unwrap();

        let root = {
            use crate::backend::SessionBackend as _;
            backend.open_store(&store_id).unwrap().root_id().unwrap()
        };
        backend.add_folder(&store_id, &root, "Projects").unwrap();
        let batch = handle.next().await.unwrap();
        assert!(matches!(&batch[0], RowChange::Added { .. }));
    }
}
