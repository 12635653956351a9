//! Store of owned, server-versioned entities.
//!
//! A sync pass runs four phases in order: create, delete, pull and push.
//! Each phase is independent: a failure is reported and the pass moves on,
//! leaving the affected work queued for the next pass.

use crate::api::{DeletedItem, KnownVersion, OwnedApi};
use crate::collection::Slot;
use crate::config::StoreConfig;
use crate::context::StoreContext;
use crate::dependencies::Operation;
use crate::engine::{RecordState, StoreEngine, SyncPass};
use crate::error::StoreResult;
use crate::hooks::{DefaultHooks, StoreHooks};
use crate::item::{now_millis, owned_key, split_owned_key, OwnedEntity, StoreItem};
use crate::reporter::{CREATE_ITEMS, DELETE_ITEMS, GET_UPDATES, SEND_UPDATES};
use crate::status::{OwnedSyncStatus, StoreSnapshot};
use crate::synced::SyncedStore;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Offline store of entities owned by a user and versioned by the server.
pub struct OwnedStore<E: OwnedEntity> {
    engine: Arc<StoreEngine<E, OwnedSyncStatus>>,
    api: Arc<dyn OwnedApi<E::Dto>>,
    hooks: Arc<dyn StoreHooks<E>>,
}

impl<E: OwnedEntity> std::fmt::Debug for OwnedStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedStore").field("engine", &self.engine).finish_non_exhaustive()
    }
}

impl<E: OwnedEntity> OwnedStore<E> {
    /// Creates a closed store with default hooks and configuration.
    pub fn new(name: impl Into<String>, api: Arc<dyn OwnedApi<E::Dto>>) -> Arc<Self> {
        Self::with_options(name, api, Arc::new(DefaultHooks), StoreConfig::default())
    }

    /// Creates a closed store.
    pub fn with_options(
        name: impl Into<String>,
        api: Arc<dyn OwnedApi<E::Dto>>,
        hooks: Arc<dyn StoreHooks<E>>,
        config: StoreConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine: StoreEngine::with_recovery(name, config, |item: &mut E, tombstone: &E| {
                item.set_version(tombstone.version())
            }),
            api,
            hooks,
        })
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Arc<StoreEngine<E, OwnedSyncStatus>> {
        &self.engine
    }

    /// Adds a new entity, see [`StoreEngine::create`].
    pub fn create(&self, item: E) -> Slot<E> {
        self.engine.create(item)
    }

    /// Adds several entities in one operation.
    pub fn create_many(&self, items: Vec<E>) {
        self.engine.create_many(items)
    }

    /// Replaces an entity, stamping its modification time.
    pub fn update(&self, mut item: E) {
        item.set_updated_at(now_millis());
        self.engine.update(item)
    }

    /// Edits the latest value of `item` under its lock, stamping its
    /// modification time.
    pub async fn update_with_lock(&self, item: E, updater: impl FnOnce(&mut E) + Send) -> E {
        self.engine
            .update_with_lock(item, |latest| {
                updater(latest);
                latest.set_updated_at(now_millis());
            })
            .await
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

    /// Current value of an entity.
    pub fn get_item(&self, uuid: &str, owner: &str) -> Option<E> {
        self.engine.get_item(&owned_key(uuid, owner))
    }

    /// Follows an entity.
    pub fn watch_item(&self, uuid: &str, owner: &str) -> watch::Receiver<Option<E>> {
        self.engine.watch_item(&owned_key(uuid, owner))
    }

    /// Every current value.
    pub fn items(&self) -> Vec<E> {
        self.engine.items()
    }

    /// Whether the entity has local modifications the server has not seen.
    pub fn item_updated_locally(&self, uuid: &str, owner: &str) -> bool {
        self.engine.item_updated_locally(&owned_key(uuid, owner))
    }

    /// Number of entities created on the device and not yet confirmed.
    pub fn local_creates_count(&self) -> usize {
        self.engine.local_creates_count()
    }

    /// Current sync status.
    pub fn status(&self) -> OwnedSyncStatus {
        self.engine.status()
    }

    /// Follows the sync status.
    pub fn watch_status(&self) -> watch::Receiver<OwnedSyncStatus> {
        self.engine.watch_status()
    }

    /// Locks an entity against sync until [`unlock`](Self::unlock).
    pub async fn lock(&self, uuid: &str, owner: &str) -> bool {
        self.engine.locks().lock(&owned_key(uuid, owner)).await
    }

    /// Releases a lock taken with [`lock`](Self::lock).
    pub fn unlock(&self, uuid: &str, owner: &str) {
        self.engine.locks().unlock(&owned_key(uuid, owner))
    }

    /// Runs one sync pass. Returns `true` when local work is left over and
    /// another pass should follow soon.
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
        let pulled = if self.engine.status().needs_update_from_server {
            self.sync_pull(&pass).await
        } else {
            false
        };
        if !self.engine.still_valid(&pass) {
            return false;
        }
        self.sync_push(&pass).await;

        self.engine.finish_sync(pass, pulled, self.hooks.is_quota_reached())
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

        for item in &not_ready {
            if self.hooks.created_locally_can_be_removed(item).await && engine.still_valid(pass) {
                engine.forget_created(&item.key());
            }
        }

        if ready.is_empty() {
            debug!(store = %engine.name(), waiting = not_ready.len(), "nothing ready to create");
            return false;
        }

        let dtos = ready.iter().map(|item| item.to_dto()).collect();
        let complete = match self.api.create_on_server(dtos).await {
            Ok(created) => {
                info!(
                    store = %engine.name(),
                    sent = ready.len(),
                    created = created.len(),
                    waiting = not_ready.len(),
                    "entities created on server"
                );
                if engine.still_valid(pass) {
                    let confirmed = created.len();
                    self.accept_from_server(created, Vec::new(), ready_keys.clone());
                    confirmed >= ready.len() && ready.len() == total
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
        let keys: Vec<String> = engine.pending().deleted.iter().map(|item| item.key()).collect();
        if keys.is_empty() {
            return true;
        }
        let allowed = engine.allowed(Operation::Delete, &keys);
        if allowed.is_empty() {
            debug!(store = %engine.name(), blocked = keys.len(), "nothing ready to delete");
            return false;
        }
        let deleted: Vec<DeletedItem> = allowed
            .iter()
            .filter_map(|key| split_owned_key(key))
            .map(|(uuid, owner)| DeletedItem::new(uuid, owner))
            .collect();
        let uuids = deleted.iter().map(|d| d.uuid.clone()).collect();

        match self.api.delete_from_server(uuids).await {
            Ok(()) => {
                info!(store = %engine.name(), deleted = deleted.len(), "entities deleted on server");
                if !engine.still_valid(pass) {
                    return false;
                }
                self.accept_from_server(Vec::new(), deleted, Vec::new());
                allowed.len() == keys.len()
            }
            Err(e) => {
                engine.report(DELETE_ITEMS, &e);
                false
            }
        }
    }

    async fn sync_pull(&self, pass: &SyncPass) -> bool {
        let engine = &self.engine;
        let known: Vec<KnownVersion> = {
            let pending = engine.pending();
            engine
                .items()
                .into_iter()
                .filter(|item| !pending.is_created(&item.key()))
                .map(|item| KnownVersion {
                    uuid: item.uuid().to_string(),
                    owner: item.owner().to_string(),
                    version: item.version(),
                })
                .collect()
        };
        let sent = known.len();

        match self.api.get_updates_from_server(known).await {
            Ok(response) => {
                info!(
                    store = %engine.name(),
                    sent,
                    deleted = response.deleted.len(),
                    updated = response.updated.len(),
                    created = response.created.len(),
                    "updates received from server"
                );
                if !engine.still_valid(pass) {
                    return false;
                }
                let mut dtos = response.updated;
                dtos.extend(response.created);
                self.accept_from_server(dtos, response.deleted, Vec::new());
                true
            }
            Err(e) => {
                engine.report(GET_UPDATES, &e);
                false
            }
        }
    }

    async fn sync_push(&self, pass: &SyncPass) -> bool {
        let engine = &self.engine;
        let keys = engine.pending().updated.clone();
        if keys.is_empty() {
            return true;
        }
        let total = keys.len();
        let started = engine.start_sync_many(keys);
        let allowed = engine.allowed(Operation::Update, &started);
        let blocked: Vec<String> = started.iter().filter(|k| !allowed.contains(k)).cloned().collect();
        engine.sync_done_many(&blocked);

        let items: Vec<E> = allowed.iter().filter_map(|key| engine.get_item(key)).collect();
        let (ready, _) = engine.select_ready(items, self.hooks.as_ref()).await;
        let ready_keys: Vec<String> = ready.iter().map(|item| item.key()).collect();
        let released: Vec<String> = allowed.iter().filter(|k| !ready_keys.contains(k)).cloned().collect();
        engine.sync_done_many(&released);

        if ready.is_empty() {
            debug!(store = %engine.name(), "nothing ready to send");
            return false;
        }

        let dtos = ready.iter().map(|item| item.to_dto()).collect();
        let complete = match self.api.send_updates_to_server(dtos).await {
            Ok(updated) => {
                info!(store = %engine.name(), sent = ready.len(), updated = updated.len(), "updates sent to server");
                if engine.still_valid(pass) {
                    let returned: HashSet<String> =
                        updated.iter().map(|dto| E::from_dto(dto.clone()).key()).collect();
                    let unchanged: Vec<String> =
                        ready_keys.iter().filter(|k| !returned.contains(*k)).cloned().collect();
                    {
                        let mut pending = engine.pending();
                        for key in &ready_keys {
                            pending.forget_updated(key);
                        }
                    }
                    let records = unchanged
                        .iter()
                        .filter_map(|key| engine.get_item(key))
                        .filter_map(|item| engine.record(&item, RecordState::Pristine))
                        .collect();
                    engine.put_records("send updates", records);
                    engine.operation_done(Operation::Update, &unchanged);
                    self.accept_from_server(updated, Vec::new(), Vec::new());
                    ready.len() == total
                } else {
                    false
                }
            }
            Err(e) => {
                engine.report(SEND_UPDATES, &e);
                false
            }
        };
        engine.sync_done_many(&ready_keys);
        complete
    }

    /// Folds server entities and deletions into the store.
    ///
    /// Entities are matched by key. When the response has one entity per
    /// key of `placeholders` (keys sent to `_bulkCreate`), entities with an
    /// unknown key take the place of the unmatched placeholders in order.
    /// A shorter response cannot be lined up with what was sent, so its
    /// unknown entities are added as new and every unmatched placeholder
    /// stays pending. A server copy never replaces a newer local version, nor an
    /// equal version with local modifications. Local deletions win over
    /// server copies of the same entity.
    fn accept_from_server(&self, dtos: Vec<E::Dto>, deleted: Vec<DeletedItem>, placeholders: Vec<String>) {
        let engine = &self.engine;
        let entities: Vec<E> = dtos.into_iter().map(E::from_dto).collect();
        let response_keys: HashSet<String> = entities.iter().map(|e| e.key()).collect();
        let positional = entities.len() == placeholders.len();
        let mut free: VecDeque<String> = placeholders
            .into_iter()
            .filter(|_| positional)
            .filter(|key| !response_keys.contains(key) && engine.collection.contains(key))
            .collect();

        let mut added: Vec<(String, Slot<E>)> = Vec::new();
        let mut records = Vec::new();
        let mut stale_keys = Vec::new();
        let mut created_done = Vec::new();
        let mut updated_done = Vec::new();
        let mut skipped = 0usize;

        let deleted_keys: Vec<String> = deleted.iter().map(|d| owned_key(&d.uuid, &d.owner)).collect();
        {
            let mut pending = engine.pending();
            for entity in entities {
                let key = entity.key();
                let mut slot = engine.collection.get(&key);
                if slot.is_none() && !pending.is_deleted(&key) {
                    if let Some(old) = free.pop_front() {
                        slot = engine.collection.rekey(&old, &key);
                        if slot.is_some() {
                            pending.forget_updated(&old);
                            pending.take_created(&old);
                            stale_keys.push(old.clone());
                            created_done.push(old);
                        }
                    }
                }

                match slot {
                    None => {
                        if pending.is_deleted(&key) {
                            skipped += 1;
                            continue;
                        }
                        records.extend(engine.record(&entity, RecordState::Pristine));
                        added.push((key, Slot::new(entity)));
                    }
                    Some(slot) => {
                        // a rekeyed placeholder still carries its old key and is always replaced
                        if let Some(current) = slot.get() {
                            let newer_here = entity.version() < current.version()
                                || (entity.version() == current.version() && pending.is_updated(&key));
                            if newer_here && current.key() == key {
                                skipped += 1;
                                continue;
                            }
                        }
                        pending.forget_updated(&key);
                        if pending.take_created(&key) {
                            created_done.push(key.clone());
                        } else {
                            updated_done.push(key.clone());
                        }
                        records.extend(engine.record(&entity, RecordState::Pristine));
                        slot.set(entity);
                    }
                }
            }

            for key in &deleted_keys {
                pending.forget_deleted(key);
                pending.forget_updated(key);
                pending.take_created(key);
            }
        }

        let removed = engine.collection.remove_many(&deleted_keys);
        engine.collection.insert_many(added);
        for slot in removed {
            slot.clear();
        }
        if !deleted.is_empty() {
            self.hooks.signal_deleted(&deleted);
        }

        let mut gone = stale_keys;
        gone.extend(deleted_keys.iter().cloned());
        engine.delete_records("accept from server", &gone);
        engine.put_records("accept from server", records);

        engine.operation_done(Operation::Delete, &deleted_keys);
        engine.operation_done(Operation::Create, &created_done);
        engine.operation_done(Operation::Update, &updated_done);
        if skipped > 0 {
            debug!(store = %engine.name(), skipped, "server copies older than local state ignored");
        }
        engine.refresh_local_work();
    }
}

#[async_trait]
impl<E: OwnedEntity> SyncedStore for OwnedStore<E> {
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
        OwnedStore::sync(self).await
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
