//! Session orchestrator: the live stores of a signed-in user and the
//! scheduler tasks that sync them.

use crate::clock::{Clock, TokioClock};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::reachability::Reachability;
use crate::schedule::{Conditions, SyncSchedule};
use outpost_storage::DeviceDatabase;
use outpost_store::{DependenciesService, ErrorReporter, StoreContext, StoreSnapshot, StoreStatus, SyncedStore};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Aggregate status of every store of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionProgress {
    /// Some store runs a pass.
    pub sync_in_progress: bool,
    /// Some store holds changes the server has not seen.
    pub has_local_changes: bool,
    /// Oldest last successful server read across stores, epoch
    /// milliseconds. `None` while any store has never read the server.
    pub last_update_from_server: Option<i64>,
}

impl SessionProgress {
    /// Aggregates the snapshots of a session's stores.
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a StoreSnapshot>) -> Self {
        let mut progress = Self::default();
        let mut oldest: Option<Option<i64>> = None;
        for snapshot in snapshots {
            progress.sync_in_progress |= snapshot.status.in_progress();
            progress.has_local_changes |= snapshot.status.has_local_changes();
            let last = snapshot.status.last_update_from_server();
            oldest = Some(match oldest {
                None => last,
                Some(current) => current.zip(last).map(|(a, b)| a.min(b)),
            });
        }
        progress.last_update_from_server = oldest.flatten();
        progress
    }
}

struct Registered {
    store: Arc<dyn SyncedStore>,
    task: JoinHandle<()>,
}

struct Registry {
    stores: Mutex<Vec<Registered>>,
    progress: watch::Sender<SessionProgress>,
}

impl Registry {
    fn snapshots(&self) -> Vec<StoreSnapshot> {
        self.stores.lock().iter().map(|r| r.store.snapshot()).collect()
    }

    fn publish_progress(&self) {
        let progress = SessionProgress::from_snapshots(&self.snapshots());
        self.progress.send_if_modified(|current| {
            if *current == progress {
                false
            } else {
                *current = progress;
                true
            }
        });
    }
}

/// Everything a signed-in session owns: the device database, the
/// dependency ledger and the registered stores. Created on login, closed
/// on logout.
///
/// Every registered store gets a scheduler task, so registration must
/// happen inside a tokio runtime.
pub struct SessionContext {
    store_ctx: StoreContext,
    reachability: watch::Receiver<bool>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    registry: Arc<Registry>,
    sync_requests: watch::Sender<u64>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("store_ctx", &self.store_ctx)
            .field("config", &self.config)
            .field("stores", &self.store_names())
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Creates a session over `db`.
    pub fn new(db: Arc<DeviceDatabase>, reachability: &Reachability, config: SyncConfig) -> SyncResult<Self> {
        let store_ctx = StoreContext::new(db)?;
        let (progress, _) = watch::channel(SessionProgress::default());
        let (sync_requests, _) = watch::channel(0);
        Ok(Self {
            store_ctx,
            reachability: reachability.subscribe(),
            clock: Arc::new(TokioClock),
            config,
            registry: Arc::new(Registry {
                stores: Mutex::new(Vec::new()),
                progress,
            }),
            sync_requests,
            closed: AtomicBool::new(false),
        })
    }

    /// Opens the device database in `dir` and creates a session over it.
    pub fn open(dir: &Path, reachability: &Reachability, config: SyncConfig) -> SyncResult<Self> {
        let db = DeviceDatabase::open(dir)?;
        Self::new(Arc::new(db), reachability, config)
    }

    /// Replaces the clock. Only affects stores registered afterwards.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the error reporter. Only affects stores registered
    /// afterwards.
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.store_ctx = self.store_ctx.clone().with_reporter(reporter);
        self
    }

    /// Collaborators handed to the stores.
    pub fn store_context(&self) -> &StoreContext {
        &self.store_ctx
    }

    /// The dependency ledger shared by the stores.
    pub fn dependencies(&self) -> &Arc<DependenciesService> {
        self.store_ctx.dependencies()
    }

    /// Scheduler settings.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether `close` ran.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Opens `store` and starts scheduling it.
    pub fn register(&self, store: Arc<dyn SyncedStore>) -> SyncResult<()> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        let mut stores = self.registry.stores.lock();
        if stores.iter().any(|r| r.store.name() == store.name()) {
            return Err(SyncError::AlreadyRegistered(store.name().to_string()));
        }
        store.open(&self.store_ctx)?;

        let driver = Driver {
            snapshots: store.watch_snapshot(),
            store: Arc::clone(&store),
            reachability: self.reachability.clone(),
            sync_requests: self.sync_requests.subscribe(),
            clock: Arc::clone(&self.clock),
            schedule: SyncSchedule::new(&self.config),
            registry: Arc::clone(&self.registry),
        };
        let task = tokio::spawn(driver.run());
        info!(store = store.name(), "store registered");
        stores.push(Registered { store, task });
        drop(stores);

        self.registry.publish_progress();
        Ok(())
    }

    /// Names of the registered stores, in registration order.
    pub fn store_names(&self) -> Vec<String> {
        self.registry
            .stores
            .lock()
            .iter()
            .map(|r| r.store.name().to_string())
            .collect()
    }

    /// Starts a pass on every store that can sync, ignoring the interval.
    pub fn sync_now(&self) {
        debug!("sync requested");
        self.sync_requests.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Whether some store runs a pass.
    pub fn sync_in_progress(&self) -> bool {
        self.progress().sync_in_progress
    }

    /// Whether some store holds changes the server has not seen.
    pub fn has_local_changes(&self) -> bool {
        self.progress().has_local_changes
    }

    /// Oldest last successful server read across stores.
    pub fn last_update_from_server(&self) -> Option<i64> {
        self.progress().last_update_from_server
    }

    /// Current aggregate status.
    pub fn progress(&self) -> SessionProgress {
        SessionProgress::from_snapshots(&self.registry.snapshots())
    }

    /// Follows the aggregate status.
    pub fn watch_progress(&self) -> watch::Receiver<SessionProgress> {
        self.registry.progress.subscribe()
    }

    /// Status of every store, in registration order.
    pub fn status(&self) -> Vec<(String, StoreStatus)> {
        self.registry
            .stores
            .lock()
            .iter()
            .map(|r| (r.store.name().to_string(), r.store.snapshot().status))
            .collect()
    }

    /// Stops the scheduler, closes every store and the device database.
    /// Queued store operations are discarded.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let registered = std::mem::take(&mut *self.registry.stores.lock());
        for r in &registered {
            r.task.abort();
        }
        for r in &registered {
            r.store.close();
        }
        self.store_ctx.db().close();
        self.registry.publish_progress();
        info!(stores = registered.len(), "session closed");
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        for r in self.registry.stores.lock().iter() {
            r.task.abort();
        }
    }
}

/// Scheduler task of one store.
struct Driver {
    store: Arc<dyn SyncedStore>,
    snapshots: watch::Receiver<StoreSnapshot>,
    reachability: watch::Receiver<bool>,
    sync_requests: watch::Receiver<u64>,
    clock: Arc<dyn Clock>,
    schedule: SyncSchedule,
    registry: Arc<Registry>,
}

impl Driver {
    async fn run(mut self) {
        let mut reachability_open = true;
        let mut requested = false;
        loop {
            let snapshot = self.snapshots.borrow_and_update().clone();
            let reachable = *self.reachability.borrow_and_update();
            let conditions = Conditions::from_snapshot(&snapshot, reachable);
            self.registry.publish_progress();

            let now = self.clock.now();
            if self.schedule.refresh_due(now) {
                debug!(store = self.store.name(), "refresh from server due");
                self.store.trigger_sync_from_server();
                continue;
            }
            if requested {
                if self.schedule.sync_now(conditions, now) {
                    requested = false;
                    self.pass(&snapshot).await;
                    continue;
                }
                // a draining queue or a running pass only delays the request
                requested = conditions.pending_operations || conditions.in_progress;
            }
            self.schedule.observe(conditions, now);
            if self.schedule.poll(now) {
                self.pass(&snapshot).await;
                continue;
            }

            let wake = self.schedule.next_wake();
            tokio::select! {
                changed = self.snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = self.reachability.changed(), if reachability_open => {
                    if changed.is_err() {
                        debug!(store = self.store.name(), "reachability signal dropped");
                        reachability_open = false;
                    }
                }
                changed = self.sync_requests.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    requested = true;
                }
                _ = tokio::time::sleep_until(wake.unwrap_or(now)), if wake.is_some() => {}
            }
        }
        debug!(store = self.store.name(), "scheduler stopped");
    }

    async fn pass(&mut self, before: &StoreSnapshot) {
        let wanted_pull = before.status.needs_update_from_server();
        debug!(store = self.store.name(), "sync pass starting");

        let store = Arc::clone(&self.store);
        let sync = store.sync();
        tokio::pin!(sync);
        let more_work = loop {
            tokio::select! {
                more_work = &mut sync => break more_work,
                Ok(()) = self.snapshots.changed() => self.registry.publish_progress(),
            }
        };

        let after = self.store.snapshot();
        let pulled = wanted_pull && !after.status.needs_update_from_server();
        self.schedule.finished(more_work, pulled, self.clock.now());
        info!(store = self.store.name(), more_work, pulled, "sync pass finished");
    }
}
