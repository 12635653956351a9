//! Shared store engine: reactive collection, durable table and the queue
//! of local operations.
//!
//! Owned and simple stores wrap a [`StoreEngine`] and only add their sync
//! protocol. Local operations never touch the table directly: they are
//! queued and applied one at a time by a worker task, under the same gate a
//! sync pass holds. An operation therefore never interleaves with a sync
//! pass, and a pass starts only once the queue is drained.

use crate::collection::{Collection, Slot};
use crate::config::StoreConfig;
use crate::context::StoreContext;
use crate::dependencies::{DependenciesService, Operation};
use crate::error::{ApiError, StoreResult};
use crate::hooks::StoreHooks;
use crate::item::{now_millis, StoreItem};
use crate::locks::SynchronizationLocks;
use crate::reporter::ErrorReporter;
use crate::status::{LocalWork, StoreSnapshot, SyncStatus};
use outpost_storage::{StorageResult, StoredRecord, Table};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Job<I, S> = Box<dyn FnOnce(&StoreEngine<I, S>) + Send>;

struct QueuedJob<I: StoreItem, S: SyncStatus> {
    epoch: u64,
    description: &'static str,
    run: Job<I, S>,
}

struct Queue<I: StoreItem, S: SyncStatus> {
    tx: mpsc::UnboundedSender<QueuedJob<I, S>>,
    rx: Option<mpsc::UnboundedReceiver<QueuedJob<I, S>>>,
    worker: Option<JoinHandle<()>>,
}

impl<I: StoreItem, S: SyncStatus> Queue<I, S> {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Some(rx),
            worker: None,
        }
    }
}

/// Keys with local work the server has not acknowledged yet.
#[derive(Debug)]
pub(crate) struct PendingWork<I> {
    /// Created on the device, in creation order.
    pub(crate) created: Vec<String>,
    /// Modified on the device since the last server copy.
    pub(crate) updated: Vec<String>,
    /// Deleted on the device; the last known value is kept.
    pub(crate) deleted: Vec<I>,
    /// Slots handed out by `create` whose operation has not run yet.
    pub(crate) queued_creates: HashMap<String, Slot<I>>,
}

impl<I: StoreItem> PendingWork<I> {
    fn new() -> Self {
        Self {
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            queued_creates: HashMap::new(),
        }
    }

    pub(crate) fn is_created(&self, key: &str) -> bool {
        self.created.iter().any(|k| k == key)
    }

    pub(crate) fn is_updated(&self, key: &str) -> bool {
        self.updated.iter().any(|k| k == key)
    }

    pub(crate) fn is_deleted(&self, key: &str) -> bool {
        self.deleted.iter().any(|item| item.key() == key)
    }

    /// Drops `key` from the created index, returning whether it was there.
    pub(crate) fn take_created(&mut self, key: &str) -> bool {
        let before = self.created.len();
        self.created.retain(|k| k != key);
        self.created.len() != before
    }

    pub(crate) fn forget_updated(&mut self, key: &str) {
        self.updated.retain(|k| k != key);
    }

    fn take_deleted(&mut self, key: &str) -> Option<I> {
        let index = self.deleted.iter().position(|item| item.key() == key)?;
        Some(self.deleted.remove(index))
    }

    pub(crate) fn forget_deleted(&mut self, key: &str) {
        self.deleted.retain(|item| item.key() != key);
    }

    fn mark_updated(&mut self, key: &str) {
        if !self.is_updated(key) {
            self.updated.push(key.to_string());
        }
    }

    fn local_work(&self, tracks_updates: bool) -> LocalWork {
        LocalWork {
            creates: !self.created.is_empty(),
            updates: tracks_updates && !self.updated.is_empty(),
            deletes: !self.deleted.is_empty(),
        }
    }
}

struct Session {
    table: Arc<dyn Table>,
    dependencies: Arc<DependenciesService>,
    reporter: Arc<dyn ErrorReporter>,
}

/// Proof that a sync pass holds the store gate.
///
/// Side effects of a pass are only applied while [`StoreEngine::still_valid`]
/// holds for it, so a pass overtaken by `close` becomes inert.
pub(crate) struct SyncPass {
    epoch: u64,
    _gate: OwnedMutexGuard<()>,
}

/// Durable flag applied when persisting an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordState {
    Pristine,
    Created,
    Updated,
    Deleted,
}

/// The engine shared by owned and simple stores.
pub struct StoreEngine<I: StoreItem, S: SyncStatus> {
    name: String,
    config: StoreConfig,
    pub(crate) collection: Collection<I>,
    pending: Mutex<PendingWork<I>>,
    session: RwLock<Option<Session>>,
    locks: Arc<SynchronizationLocks>,
    status: watch::Sender<S>,
    loaded: watch::Sender<bool>,
    queued: watch::Sender<usize>,
    snapshot: watch::Sender<StoreSnapshot>,
    epoch: AtomicU64,
    gate: Arc<tokio::sync::Mutex<()>>,
    queue: Mutex<Queue<I, S>>,
    recover: fn(&mut I, &I),
}

impl<I: StoreItem, S: SyncStatus> std::fmt::Debug for StoreEngine<I, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEngine")
            .field("name", &self.name)
            .field("items", &self.collection.len())
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl<I: StoreItem, S: SyncStatus> StoreEngine<I, S> {
    /// Creates a closed engine. Operations can be queued right away and
    /// run once the engine is opened.
    pub fn new(name: impl Into<String>, config: StoreConfig) -> Arc<Self> {
        Self::with_recovery(name, config, |_, _| {})
    }

    /// Creates a closed engine whose re-created entities go through
    /// `recover` when they replace a pending local deletion. It receives
    /// the new entity and the last value of the deleted one.
    pub fn with_recovery(name: impl Into<String>, config: StoreConfig, recover: fn(&mut I, &I)) -> Arc<Self> {
        let status = S::default();
        let snapshot = StoreSnapshot {
            loaded: false,
            pending_operations: false,
            status: status.to_store_status(),
        };
        Arc::new(Self {
            name: name.into(),
            config,
            collection: Collection::new(),
            pending: Mutex::new(PendingWork::new()),
            session: RwLock::new(None),
            locks: Arc::new(SynchronizationLocks::new()),
            status: watch::Sender::new(status),
            loaded: watch::Sender::new(false),
            queued: watch::Sender::new(0),
            snapshot: watch::Sender::new(snapshot),
            epoch: AtomicU64::new(0),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            queue: Mutex::new(Queue::new()),
            recover,
        })
    }

    /// Table name of the store.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Engine configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Per-key locks between user edits and sync.
    pub fn locks(&self) -> &Arc<SynchronizationLocks> {
        &self.locks
    }

    /// Whether the device table has been loaded.
    pub fn is_loaded(&self) -> bool {
        *self.loaded.borrow()
    }

    /// Current sync status.
    pub fn status(&self) -> S {
        self.status.borrow().clone()
    }

    /// Follows the sync status.
    pub fn watch_status(&self) -> watch::Receiver<S> {
        self.status.subscribe()
    }

    /// Current aggregate snapshot.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Follows the aggregate snapshot.
    pub fn watch_snapshot(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshot.subscribe()
    }

    /// Number of queued operations not applied yet.
    pub fn queued_operations(&self) -> usize {
        *self.queued.borrow()
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    // Lifecycle

    /// Loads the device table and starts applying queued operations.
    ///
    /// Re-opening an open engine closes it first. Must be called from
    /// within a tokio runtime.
    pub fn open(self: &Arc<Self>, ctx: &StoreContext, hooks: &dyn StoreHooks<I>) -> StoreResult<()> {
        if self.session.read().is_some() {
            self.close();
        }

        let table = ctx.db().table(&self.name)?;
        self.migrate(ctx, table.as_ref(), hooks)?;

        let mut slots = Vec::new();
        let mut skipped = 0usize;
        {
            let mut pending = self.pending.lock();
            for record in table.all()? {
                let item = match Self::decode(record.item) {
                    Ok(item) => item,
                    Err(e) => {
                        warn!(store = %self.name, key = %record.key, error = %e, "skipping undecodable record");
                        skipped += 1;
                        continue;
                    }
                };
                if record.deleted_locally {
                    pending.deleted.push(item);
                    continue;
                }
                if record.created_locally {
                    pending.created.push(record.key.clone());
                } else if record.updated_locally && S::TRACKS_UPDATES {
                    pending.updated.push(record.key.clone());
                }
                slots.push((record.key, Slot::new(item)));
            }
        }
        let loaded = slots.len();
        self.collection.insert_many(slots);

        *self.session.write() = Some(Session {
            table,
            dependencies: Arc::clone(ctx.dependencies()),
            reporter: Arc::clone(ctx.reporter()),
        });

        let work = self.pending.lock().local_work(S::TRACKS_UPDATES);
        self.update_status(|status| {
            status.set_local_work(work);
            status.set_needs_update_from_server(true);
        });
        self.loaded.send_replace(true);
        self.publish_snapshot();
        self.spawn_worker();

        info!(store = %self.name, items = loaded, skipped, "store opened");
        Ok(())
    }

    fn migrate(&self, ctx: &StoreContext, table: &dyn Table, hooks: &dyn StoreHooks<I>) -> StoreResult<()> {
        let target = hooks.schema_version();
        let current = ctx.db().table_version(&self.name)?;
        if current >= target {
            return Ok(());
        }
        let records = table.all()?;
        let before = records.len();
        let migrated: Vec<StoredRecord> = records
            .into_iter()
            .filter_map(|record| hooks.migrate(current, record))
            .collect();
        info!(
            store = %self.name,
            from = current,
            to = target,
            records = before,
            kept = migrated.len(),
            "migrating device table"
        );
        table.clear()?;
        table.put_many(migrated)?;
        ctx.db().set_table_version(&self.name, target)?;
        Ok(())
    }

    /// Drops every in-memory structure and invalidates queued operations
    /// and running sync passes. Slots handed out so far turn to `None`.
    pub fn close(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self.session.write() = None;
        {
            let mut queue = self.queue.lock();
            if let Some(worker) = queue.worker.take() {
                worker.abort();
            }
            *queue = Queue::new();
        }
        self.queued.send_replace(0);
        self.loaded.send_replace(false);
        self.collection.clear();
        let queued_slots: Vec<Slot<I>> = {
            let mut pending = self.pending.lock();
            let slots = pending.queued_creates.drain().map(|(_, slot)| slot).collect();
            *pending = PendingWork::new();
            slots
        };
        for slot in queued_slots {
            slot.clear();
        }
        self.locks.reset();
        self.status.send_replace(S::default());
        self.publish_snapshot();
        debug!(store = %self.name, "store closed");
    }

    // Queue

    fn enqueue(&self, description: &'static str, run: impl FnOnce(&Self) + Send + 'static) {
        let job = QueuedJob {
            epoch: self.epoch(),
            description,
            run: Box::new(run),
        };
        self.queued.send_modify(|n| *n += 1);
        let sent = self.queue.lock().tx.send(job).is_ok();
        if !sent {
            self.queued.send_modify(|n| *n = n.saturating_sub(1));
        }
        self.publish_snapshot();
    }

    fn spawn_worker(self: &Arc<Self>) {
        let mut queue = self.queue.lock();
        let Some(mut rx) = queue.rx.take() else {
            return;
        };
        let engine = Arc::downgrade(self);
        let gate = Arc::clone(&self.gate);
        let batch = self.config.operation_batch_yield.max(1);
        queue.worker = Some(tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let guard = gate.lock().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.run_job(job);
                for _ in 1..batch {
                    match rx.try_recv() {
                        Ok(job) => engine.run_job(job),
                        Err(_) => break,
                    }
                }
                drop(engine);
                drop(guard);
                tokio::task::yield_now().await;
            }
        }));
    }

    fn run_job(&self, job: QueuedJob<I, S>) {
        if job.epoch != self.epoch() {
            debug!(store = %self.name, operation = job.description, "discarding operation of a closed session");
            return;
        }
        debug!(store = %self.name, operation = job.description, "applying operation");
        (job.run)(self);
        if job.epoch == self.epoch() {
            self.queued.send_modify(|n| *n = n.saturating_sub(1));
        }
        self.publish_snapshot();
    }

    /// Resolves once every operation queued before the call has run.
    ///
    /// On a store that was never opened this waits for `open`.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.enqueue("flush", move |_| {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }

    // Status

    pub(crate) fn update_status(&self, apply: impl FnOnce(&mut S)) {
        self.status.send_if_modified(|status| {
            let before = status.clone();
            apply(status);
            *status != before
        });
        self.publish_snapshot();
    }

    pub(crate) fn refresh_local_work(&self) {
        let work = self.pending.lock().local_work(S::TRACKS_UPDATES);
        self.update_status(|status| status.set_local_work(work));
    }

    fn publish_snapshot(&self) {
        let snapshot = StoreSnapshot {
            loaded: *self.loaded.borrow(),
            pending_operations: *self.queued.borrow() > 0,
            status: self.status.borrow().to_store_status(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    // Persistence

    pub(crate) fn pending(&self) -> MutexGuard<'_, PendingWork<I>> {
        self.pending.lock()
    }

    pub(crate) fn decode(value: serde_json::Value) -> StoreResult<I> {
        let dto: I::Dto = serde_json::from_value(value)?;
        Ok(I::from_dto(dto))
    }

    pub(crate) fn record(&self, item: &I, state: RecordState) -> Option<StoredRecord> {
        let value = match serde_json::to_value(item.to_dto()) {
            Ok(value) => value,
            Err(e) => {
                warn!(store = %self.name, key = %item.key(), error = %e, "entity cannot be encoded");
                return None;
            }
        };
        let key = item.key();
        Some(match state {
            RecordState::Pristine => StoredRecord::pristine(key, value),
            RecordState::Created => StoredRecord::created(key, value),
            RecordState::Updated => StoredRecord::updated(key, value),
            RecordState::Deleted => StoredRecord::tombstone(key, value),
        })
    }

    /// Runs a write against the device table. Failures are logged and
    /// otherwise ignored: memory stays authoritative and the next sync pass
    /// reconciles.
    pub(crate) fn persist(&self, what: &'static str, write: impl FnOnce(&dyn Table) -> StorageResult<()>) {
        let table = self.session.read().as_ref().map(|s| Arc::clone(&s.table));
        match table {
            Some(table) => {
                if let Err(e) = write(table.as_ref()) {
                    warn!(store = %self.name, operation = what, error = %e, "device table write failed");
                }
            }
            None => debug!(store = %self.name, operation = what, "store closed, write skipped"),
        }
    }

    pub(crate) fn put_records(&self, what: &'static str, records: Vec<StoredRecord>) {
        if records.is_empty() {
            return;
        }
        self.persist(what, |table| table.put_many(records));
    }

    pub(crate) fn delete_records(&self, what: &'static str, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        self.persist(what, |table| table.delete_many(keys));
    }

    // Dependencies and reporting

    fn dependencies(&self) -> Option<Arc<DependenciesService>> {
        self.session.read().as_ref().map(|s| Arc::clone(&s.dependencies))
    }

    /// Keys among `keys` whose `operation` is not blocked.
    pub(crate) fn allowed(&self, operation: Operation, keys: &[String]) -> Vec<String> {
        if keys.is_empty() {
            return Vec::new();
        }
        let Some(dependencies) = self.dependencies() else {
            return Vec::new();
        };
        match dependencies.can_do(&self.name, operation, keys) {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(store = %self.name, %operation, error = %e, "dependency check failed");
                Vec::new()
            }
        }
    }

    pub(crate) fn operation_done(&self, operation: Operation, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        if let Some(dependencies) = self.dependencies() {
            if let Err(e) = dependencies.operation_done(&self.name, operation, keys) {
                warn!(store = %self.name, %operation, error = %e, "dependency ledger update failed");
            }
        }
    }

    pub(crate) fn report(&self, context: &'static str, error: &ApiError) {
        let reporter = self.session.read().as_ref().map(|s| Arc::clone(&s.reporter));
        if let Some(reporter) = reporter {
            reporter.network_error(&self.name, context, error);
        }
    }

    // Local operations

    /// Adds a new entity and returns its slot.
    ///
    /// Whether the key is already known is decided when the operation
    /// runs: a known entity is left untouched, and one whose deletion is
    /// still pending is recovered instead. Creating a key twice before
    /// either operation runs queues it once.
    pub fn create(&self, item: I) -> Slot<I> {
        let key = item.key();
        let slot = {
            let mut pending = self.pending.lock();
            if let Some(slot) = pending.queued_creates.get(&key) {
                return slot.clone();
            }
            let slot = self.collection.get(&key).unwrap_or_else(|| Slot::new(item.clone()));
            pending.queued_creates.insert(key.clone(), slot.clone());
            slot
        };
        let queued = slot.clone();
        self.enqueue("create item", move |engine| engine.apply_create(vec![(key, queued, item)]));
        slot
    }

    /// Adds several entities in one operation, skipping keys already
    /// queued for creation.
    pub fn create_many(&self, items: Vec<I>) {
        let entries: Vec<(String, Slot<I>, I)> = {
            let mut pending = self.pending.lock();
            items
                .into_iter()
                .filter_map(|item| {
                    let key = item.key();
                    if pending.queued_creates.contains_key(&key) {
                        return None;
                    }
                    let slot = self.collection.get(&key).unwrap_or_else(|| Slot::new(item.clone()));
                    pending.queued_creates.insert(key.clone(), slot.clone());
                    Some((key, slot, item))
                })
                .collect()
        };
        if entries.is_empty() {
            return;
        }
        self.enqueue("create items", move |engine| engine.apply_create(entries));
    }

    fn apply_create(&self, entries: Vec<(String, Slot<I>, I)>) {
        let mut records = Vec::new();
        let mut inserted = Vec::new();
        {
            let mut pending = self.pending.lock();
            for (key, slot, mut item) in entries {
                if pending
                    .queued_creates
                    .get(&key)
                    .is_some_and(|queued| queued.same_slot(&slot))
                {
                    pending.queued_creates.remove(&key);
                }
                if self.collection.contains(&key) {
                    continue;
                }
                let state = if let Some(tombstone) = pending.take_deleted(&key) {
                    (self.recover)(&mut item, &tombstone);
                    slot.set(item.clone());
                    if S::TRACKS_UPDATES {
                        pending.mark_updated(&key);
                        RecordState::Updated
                    } else {
                        RecordState::Pristine
                    }
                } else {
                    // handed out while the entity existed, cleared by a queued delete since
                    if slot.is_deleted() {
                        slot.set(item.clone());
                    }
                    pending.created.push(key.clone());
                    RecordState::Created
                };
                records.extend(self.record(&item, state));
                inserted.push((key, slot));
            }
        }
        self.collection.insert_many(inserted);
        self.put_records("create", records);
        self.refresh_local_work();
    }

    /// Replaces a known entity. Unknown keys are ignored.
    pub fn update(&self, item: I) {
        self.enqueue("update item", move |engine| engine.apply_update(item));
    }

    fn apply_update(&self, item: I) {
        let key = item.key();
        let Some(slot) = self.collection.get(&key) else {
            debug!(store = %self.name, %key, "update of an unknown entity ignored");
            return;
        };
        let state = {
            let mut pending = self.pending.lock();
            if pending.is_created(&key) {
                RecordState::Created
            } else if S::TRACKS_UPDATES {
                pending.mark_updated(&key);
                RecordState::Updated
            } else {
                RecordState::Pristine
            }
        };
        slot.set(item.clone());
        self.put_records("update", self.record(&item, state).into_iter().collect());
        self.refresh_local_work();
    }

    /// Applies `updater` to the latest value of `item` while holding its
    /// lock, so no sync pass sends it half-edited. Resolves once the
    /// change is persisted, with the updated entity.
    pub async fn update_with_lock(self: &Arc<Self>, item: I, updater: impl FnOnce(&mut I) + Send) -> I {
        let key = item.key();
        let Some(_lock) = self.locks.acquire(&key).await else {
            return item;
        };
        self.flush().await;
        let Some(mut latest) = self.collection.value(&key) else {
            return item;
        };
        updater(&mut latest);
        self.update(latest.clone());
        self.flush().await;
        latest
    }

    /// Removes an entity.
    pub fn delete(&self, item: I) {
        self.pending.lock().queued_creates.remove(&item.key());
        self.enqueue("delete item", move |engine| engine.apply_delete(vec![item.key()]));
    }

    /// Removes every entity matching `predicate`, evaluated in one step
    /// when the operation runs.
    pub fn delete_if(&self, description: impl Into<String>, predicate: impl Fn(&I) -> bool + Send + 'static) {
        let description = description.into();
        self.pending.lock().queued_creates.clear();
        self.enqueue("delete matching items", move |engine| {
            let keys: Vec<String> = engine
                .collection
                .entries()
                .into_iter()
                .filter(|(_, item)| predicate(item))
                .map(|(key, _)| key)
                .collect();
            debug!(store = %engine.name, %description, matched = keys.len(), "deleting matching entities");
            engine.apply_delete(keys);
        });
    }

    fn apply_delete(&self, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        let removed = self.collection.remove_many(&keys);
        let mut dropped = Vec::new();
        let mut records = Vec::new();
        {
            let mut pending = self.pending.lock();
            for slot in &removed {
                let Some(item) = slot.get() else {
                    continue;
                };
                let key = item.key();
                pending.forget_updated(&key);
                if pending.take_created(&key) {
                    dropped.push(key);
                } else if !pending.is_deleted(&key) {
                    records.extend(self.record(&item, RecordState::Deleted));
                    pending.deleted.push(item);
                }
            }
        }
        for slot in &removed {
            slot.clear();
        }
        self.delete_records("delete", &dropped);
        self.put_records("delete", records);
        self.refresh_local_work();
    }

    /// Asks the next sync pass to pull from the server.
    pub fn trigger_sync_from_server(&self) {
        self.enqueue("trigger sync from server", |engine| {
            engine.update_status(|status| status.set_needs_update_from_server(true));
        });
    }

    // Reads

    /// Follows the list of slots.
    pub fn get_all(&self) -> watch::Receiver<Vec<Slot<I>>> {
        self.collection.subscribe()
    }

    /// Like [`get_all`](Self::get_all), once the device table is loaded.
    pub async fn get_all_when_loaded(&self) -> watch::Receiver<Vec<Slot<I>>> {
        let mut loaded = self.loaded.subscribe();
        let _ = loaded.wait_for(|loaded| *loaded).await;
        self.collection.subscribe()
    }

    /// Current value of `key`.
    pub fn get_item(&self, key: &str) -> Option<I> {
        self.collection.value(key)
    }

    /// Slot of `key`.
    pub fn slot(&self, key: &str) -> Option<Slot<I>> {
        self.collection.get(key)
    }

    /// Every current value, in insertion order.
    pub fn items(&self) -> Vec<I> {
        self.collection.values()
    }

    /// Follows `key`: the current value (or `None`), then the slot once it
    /// appears, ending with `None` when the entity is deleted.
    pub fn watch_item(&self, key: &str) -> watch::Receiver<Option<I>> {
        let (tx, rx) = watch::channel(self.collection.value(key));
        let key = key.to_string();
        let mut list = self.collection.subscribe();
        tokio::spawn(async move {
            let slot = loop {
                let found = list
                    .borrow_and_update()
                    .iter()
                    .find(|slot| slot.get().is_some_and(|item| item.key() == key))
                    .cloned();
                if let Some(slot) = found {
                    break slot;
                }
                tokio::select! {
                    _ = tx.closed() => return,
                    changed = list.changed() => if changed.is_err() { return },
                }
            };
            let mut values = slot.subscribe();
            loop {
                let value = values.borrow_and_update().clone();
                let deleted = value.is_none();
                tx.send_replace(value);
                if deleted {
                    return;
                }
                tokio::select! {
                    _ = tx.closed() => return,
                    changed = values.changed() => if changed.is_err() { return },
                }
            }
        });
        rx
    }

    /// Whether `key` has local modifications the server has not seen.
    pub fn item_updated_locally(&self, key: &str) -> bool {
        self.pending.lock().is_updated(key)
    }

    /// Number of entities created on the device and not yet confirmed.
    pub fn local_creates_count(&self) -> usize {
        self.pending.lock().created.len()
    }

    /// Number of pending deletions.
    pub fn local_deletes_count(&self) -> usize {
        self.pending.lock().deleted.len()
    }

    // Sync pass helpers

    /// Waits for the queue to drain, then takes the gate. `None` when the
    /// store is not loaded or gets closed meanwhile.
    pub(crate) async fn begin_sync(&self) -> Option<SyncPass> {
        if !self.is_loaded() {
            return None;
        }
        let epoch = self.epoch();
        let mut queued = self.queued.subscribe();
        let _ = queued.wait_for(|n| *n == 0).await;
        let gate = Arc::clone(&self.gate).lock_owned().await;
        if self.epoch() != epoch || !self.is_loaded() {
            return None;
        }
        self.update_status(|status| status.set_in_progress(true));
        Some(SyncPass { epoch, _gate: gate })
    }

    pub(crate) fn still_valid(&self, pass: &SyncPass) -> bool {
        self.epoch() == pass.epoch
    }

    /// Publishes the outcome of a pass and returns whether local work is
    /// left over.
    pub(crate) fn finish_sync(&self, pass: SyncPass, pulled: bool, quota_reached: bool) -> bool {
        if !self.still_valid(&pass) {
            return false;
        }
        let work = self.pending.lock().local_work(S::TRACKS_UPDATES);
        self.update_status(|status| {
            status.set_local_work(work);
            status.set_quota_reached(quota_reached);
            if pulled {
                status.set_needs_update_from_server(false);
                status.set_last_update_from_server(now_millis());
            }
            status.set_in_progress(false);
        });
        info!(
            store = %self.name,
            creates = work.creates,
            updates = work.updates,
            deletes = work.deletes,
            pulled,
            "sync pass finished"
        );
        (work.creates && !quota_reached) || work.updates || work.deletes
    }

    /// Marks `keys` as syncing, keeping those not locked by a user edit.
    pub(crate) fn start_sync_many(&self, keys: Vec<String>) -> Vec<String> {
        keys.into_iter().filter(|key| self.locks.start_sync(key)).collect()
    }

    pub(crate) fn sync_done_many(&self, keys: &[String]) {
        for key in keys {
            self.locks.sync_done(key);
        }
    }

    /// Splits `items` into those ready to be sent and the others. When none
    /// is ready right away, each item gets a chance to become ready before
    /// a deadline shared by the whole batch.
    pub(crate) async fn select_ready(&self, items: Vec<I>, hooks: &dyn StoreHooks<I>) -> (Vec<I>, Vec<I>) {
        let (ready, waiting): (Vec<I>, Vec<I>) = items.into_iter().partition(|item| hooks.ready_to_save(item));
        if !ready.is_empty() || waiting.is_empty() {
            return (ready, waiting);
        }
        let deadline = tokio::time::Instant::now() + self.config.readiness_timeout;
        let poll = self.config.readiness_poll_interval;
        let mut ready = Vec::new();
        let mut not_ready = Vec::new();
        for item in waiting {
            match tokio::time::timeout_at(deadline, hooks.wait_ready(&item, poll)).await {
                Ok(true) => ready.push(item),
                _ => not_ready.push(item),
            }
        }
        (ready, not_ready)
    }

    /// Stops scheduling `key` for creation during this session.
    ///
    /// The durable record keeps its created flag, so the entity is offered
    /// for creation again after a restart.
    pub(crate) fn forget_created(&self, key: &str) {
        if !self.pending.lock().take_created(key) {
            return;
        }
        debug!(store = %self.name, %key, "creation abandoned");
    }
}
