//! Store of unversioned entities, reconciled against the full server list.

use crate::api::SimpleApi;
use crate::collection::Slot;
use crate::config::StoreConfig;
use crate::context::StoreContext;
use crate::dependencies::Operation;
use crate::engine::{RecordState, StoreEngine, SyncPass};
use crate::error::StoreResult;
use crate::hooks::{DefaultHooks, StoreHooks};
use crate::item::{SimpleEntity, StoreItem};
use crate::reporter::{CREATE_ITEMS, DELETE_ITEMS, GET_UPDATES};
use crate::status::{SimpleSyncStatus, StoreSnapshot};
use crate::synced::SyncedStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Offline store of entities without server versions, such as links
/// between two owned entities.
pub struct SimpleStore<E: SimpleEntity> {
    engine: Arc<StoreEngine<E, SimpleSyncStatus>>,
    api: Arc<dyn SimpleApi<E::Dto>>,
    hooks: Arc<dyn StoreHooks<E>>,
}

impl<E: SimpleEntity> std::fmt::Debug for SimpleStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleStore").field("engine", &self.engine).finish_non_exhaustive()
    }
}

impl<E: SimpleEntity> SimpleStore<E> {
    /// Creates a closed store with default hooks and configuration.
    pub fn new(name: impl Into<String>, api: Arc<dyn SimpleApi<E::Dto>>) -> Arc<Self> {
        Self::with_options(name, api, Arc::new(DefaultHooks), StoreConfig::default())
    }

    /// Creates a closed store.
    pub fn with_options(
        name: impl Into<String>,
        api: Arc<dyn SimpleApi<E::Dto>>,
        hooks: Arc<dyn StoreHooks<E>>,
        config: StoreConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine: StoreEngine::new(name, config),
            api,
            hooks,
        })
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Arc<StoreEngine<E, SimpleSyncStatus>> {
        &self.engine
    }

    /// Adds a new entity.
    pub fn create(&self, item: E) -> Slot<E> {
        self.engine.create(item)
    }

    /// Adds several entities in one operation.
    pub fn create_many(&self, items: Vec<E>) {
        self.engine.create_many(items)
    }

    /// Replaces an entity in memory and on the device. Simple entities
    /// have no update endpoint, so this is never sent to the server.
    pub fn update(&self, item: E) {
        self.engine.update(item)
    }

    /// Removes an entity.
    pub fn delete(&self, item: E) {
        self.engine.delete(item)
    }

    /// Removes every entity matching `predicate`.
    pub fn delete_if(&self, description: impl Into<String>, predicate: impl Fn(&E) -> bool + Send + 'static) {
        self.engine.delete_if(description, predicate)
    }

    /// Follows the list of slots.
    pub fn get_all(&self) -> watch::Receiver<Vec<Slot<E>>> {
        self.engine.get_all()
    }

    /// Follows the list of slots once the device table is loaded.
    pub async fn get_all_when_loaded(&self) -> watch::Receiver<Vec<Slot<E>>> {
        self.engine.get_all_when_loaded().await
    }

    /// Current value of `key`.
    pub fn get_item(&self, key: &str) -> Option<E> {
        self.engine.get_item(key)
    }

    /// Follows `key`.
    pub fn watch_item(&self, key: &str) -> watch::Receiver<Option<E>> {
        self.engine.watch_item(key)
    }

    /// Every current value.
    pub fn items(&self) -> Vec<E> {
        self.engine.items()
    }

    /// Current sync status.
    pub fn status(&self) -> SimpleSyncStatus {
        self.engine.status()
    }

    /// Follows the sync status.
    pub fn watch_status(&self) -> watch::Receiver<SimpleSyncStatus> {
        self.engine.watch_status()
    }

    /// Runs one sync pass: create, delete, then reconcile with the full
    /// server list. Returns `true` when local work is left over.
    pub async fn sync(&self) -> bool {
        let Some(pass) = self.engine.begin_sync().await else {
            return false;
        };
        debug!(store = %self.engine.name(), "sync pass started");

        self.sync_create(&pass).await;
        if !self.engine.still_valid(&pass) {
            return false;
        }
        self.sync_delete(&pass).await;
        if !self.engine.still_valid(&pass) {
            return false;
        }
        let listed = self.sync_list(&pass).await;
        self.engine.finish_sync(pass, listed, self.hooks.is_quota_reached())
    }

    async fn sync_create(&self, pass: &SyncPass) -> bool {
        let engine = &self.engine;
        let keys = engine.pending().created.clone();
        if keys.is_empty() {
            return true;
        }
        let total = keys.len();
        let started = engine.start_sync_many(keys);
        let allowed = engine.allowed(Operation::Create, &started);
        let blocked: Vec<String> = started.iter().filter(|k| !allowed.contains(k)).cloned().collect();
        engine.sync_done_many(&blocked);

        let items: Vec<E> = allowed.iter().filter_map(|key| engine.get_item(key)).collect();
        let (ready, not_ready) = engine.select_ready(items, self.hooks.as_ref()).await;
        let ready_keys: Vec<String> = ready.iter().map(|item| item.key()).collect();
        let released: Vec<String> = allowed.iter().filter(|k| !ready_keys.contains(k)).cloned().collect();
        engine.sync_done_many(&released);

        if ready.is_empty() {
            debug!(store = %engine.name(), waiting = not_ready.len(), "nothing ready to create");
            return false;
        }

        let dtos = ready.iter().map(|item| item.to_dto()).collect();
        let complete = match self.api.create_on_server(dtos).await {
            Ok(created) => {
                info!(store = %engine.name(), sent = ready.len(), created = created.len(), "entities created on server");
                if engine.still_valid(pass) {
                    let confirmed: Vec<String> =
                        created.into_iter().map(|dto| E::from_dto(dto).key()).collect();
                    {
                        let mut pending = engine.pending();
                        for key in &confirmed {
                            pending.take_created(key);
                        }
                    }
                    engine.operation_done(Operation::Create, &confirmed);
                    self.save_store();
                    engine.refresh_local_work();
                    confirmed.len() >= ready.len() && ready.len() == total
                } else {
                    false
                }
            }
            Err(e) => {
                engine.report(CREATE_ITEMS, &e);
                false
            }
        };
        engine.sync_done_many(&ready_keys);
        complete
    }

    async fn sync_delete(&self, pass: &SyncPass) -> bool {
        let engine = &self.engine;
        let tombstones: Vec<E> = engine.pending().deleted.clone();
        if tombstones.is_empty() {
            return true;
        }
        let keys: Vec<String> = tombstones.iter().map(|item| item.key()).collect();
        let allowed = engine.allowed(Operation::Delete, &keys);
        if allowed.is_empty() {
            debug!(store = %engine.name(), blocked = keys.len(), "nothing ready to delete");
            return false;
        }
        let dtos = tombstones
            .iter()
            .filter(|item| allowed.contains(&item.key()))
            .map(|item| item.to_dto())
            .collect();

        match self.api.delete_from_server(dtos).await {
            Ok(()) => {
                info!(store = %engine.name(), deleted = allowed.len(), "entities deleted on server");
                if !engine.still_valid(pass) {
                    return false;
                }
                {
                    let mut pending = engine.pending();
                    for key in &allowed {
                        pending.forget_deleted(key);
                    }
                }
                engine.operation_done(Operation::Delete, &allowed);
                self.save_store();
                engine.refresh_local_work();
                allowed.len() == keys.len()
            }
            Err(e) => {
                engine.report(DELETE_ITEMS, &e);
                false
            }
        }
    }

    /// Diffs the collection against the server list. Entities missing on
    /// the server are dropped unless created on the device; server entities
    /// unknown here are added unless deleted on the device.
    async fn sync_list(&self, pass: &SyncPass) -> bool {
        let engine = &self.engine;
        let listed = match self.api.get_all().await {
            Ok(listed) => listed,
            Err(e) => {
                engine.report(GET_UPDATES, &e);
                return false;
            }
        };
        if !engine.still_valid(pass) {
            return false;
        }

        let server: Vec<E> = listed.into_iter().map(E::from_dto).collect();
        let listed_count = server.len();
        let mut by_key: HashMap<String, E> = server.iter().map(|item| (item.key(), item.clone())).collect();
        let replace = self.hooks.update_entity_from_server();

        let mut removed_keys = Vec::new();
        let mut replaced = 0usize;
        let added: Vec<(String, Slot<E>)> = {
            let pending = engine.pending();
            for (key, _) in engine.collection.entries() {
                match by_key.remove(&key) {
                    Some(copy) => {
                        if replace {
                            if let Some(slot) = engine.collection.get(&key) {
                                slot.set(copy);
                                replaced += 1;
                            }
                        }
                    }
                    None if !pending.is_created(&key) => removed_keys.push(key),
                    None => {}
                }
            }
            server
                .into_iter()
                .filter(|item| by_key.contains_key(&item.key()) && !pending.is_deleted(&item.key()))
                .map(|item| (item.key(), Slot::new(item)))
                .collect()
        };

        let removed = engine.collection.remove_many(&removed_keys);
        let added_count = added.len();
        engine.collection.insert_many(added);
        for slot in removed {
            slot.clear();
        }
        info!(
            store = %engine.name(),
            listed = listed_count,
            added = added_count,
            removed = removed_keys.len(),
            replaced,
            "reconciled with server list"
        );
        if added_count > 0 || !removed_keys.is_empty() || replaced > 0 {
            self.save_store();
        }
        true
    }

    /// Rewrites the device table from memory.
    fn save_store(&self) {
        let engine = &self.engine;
        let records: Vec<_> = {
            let pending = engine.pending();
            let live = engine.collection.entries().into_iter().filter_map(|(key, item)| {
                let state = if pending.is_created(&key) {
                    RecordState::Created
                } else {
                    RecordState::Pristine
                };
                engine.record(&item, state)
            });
            let tombstones = pending
                .deleted
                .iter()
                .filter_map(|item| engine.record(item, RecordState::Deleted));
            live.chain(tombstones).collect()
        };
        engine.persist("save store", |table| {
            table.clear()?;
            table.put_many(records)
        });
    }
}

#[async_trait]
impl<E: SimpleEntity> SyncedStore for SimpleStore<E> {
    fn name(&self) -> &str {
        self.engine.name()
    }

    fn open(&self, ctx: &StoreContext) -> StoreResult<()> {
        self.engine.open(ctx, self.hooks.as_ref())
    }

    fn close(&self) {
        self.engine.close()
    }

    async fn sync(&self) -> bool {
        SimpleStore::sync(self).await
    }

    fn snapshot(&self) -> StoreSnapshot {
        self.engine.snapshot()
    }

    fn watch_snapshot(&self) -> watch::Receiver<StoreSnapshot> {
        self.engine.watch_snapshot()
    }

    fn trigger_sync_from_server(&self) {
        self.engine.trigger_sync_from_server()
    }

    async fn flush(&self) {
        self.engine.flush().await
    }
}
