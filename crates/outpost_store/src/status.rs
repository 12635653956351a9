//! Synchronization status of stores.

use serde::Serialize;

/// Pending local work, derived from the store's pending indexes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalWork {
    /// Entities created on the device and not confirmed yet.
    pub creates: bool,
    /// Server entities modified on the device.
    pub updates: bool,
    /// Tombstones waiting for the server.
    pub deletes: bool,
}

/// Status of one store as seen by the engine.
pub trait SyncStatus: Clone + Default + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    /// Whether local updates are pushed to the server (owned stores).
    const TRACKS_UPDATES: bool;

    /// Whether a sync pass has something to do.
    fn needs_sync(&self) -> bool;

    /// Whether the device holds changes the server has not seen.
    fn has_local_changes(&self) -> bool;

    /// Whether a sync pass is running.
    fn in_progress(&self) -> bool;

    /// Whether the next pass must ask the server for its state.
    fn needs_update_from_server(&self) -> bool;

    /// Last successful server read, epoch milliseconds.
    fn last_update_from_server(&self) -> Option<i64>;

    /// Replaces the local work flags.
    fn set_local_work(&mut self, work: LocalWork);

    /// Marks a pass as running or finished.
    fn set_in_progress(&mut self, in_progress: bool);

    /// Raises or clears the server read flag.
    fn set_needs_update_from_server(&mut self, needed: bool);

    /// Records whether the server quota for new entities is used up.
    fn set_quota_reached(&mut self, reached: bool);

    /// Records the last successful server read.
    fn set_last_update_from_server(&mut self, millis: i64);

    /// Tagged copy for the scheduler.
    fn to_store_status(&self) -> StoreStatus;
}

/// Status of an owned (versioned) store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedSyncStatus {
    /// Entities created on the device and not confirmed yet.
    pub local_creates: bool,
    /// Server entities modified on the device.
    pub local_updates: bool,
    /// Tombstones waiting for the server.
    pub local_deletes: bool,
    /// The next pass must pull updates.
    pub needs_update_from_server: bool,
    /// A pass is running.
    pub in_progress: bool,
    /// Last successful pull, epoch milliseconds.
    pub last_update_from_server: Option<i64>,
    /// The server refuses new entities of this kind.
    pub quota_reached: bool,
}

impl Default for OwnedSyncStatus {
    fn default() -> Self {
        Self {
            local_creates: false,
            local_updates: false,
            local_deletes: false,
            needs_update_from_server: true,
            in_progress: false,
            last_update_from_server: None,
            quota_reached: false,
        }
    }
}

impl SyncStatus for OwnedSyncStatus {
    const TRACKS_UPDATES: bool = true;

    fn needs_sync(&self) -> bool {
        (self.local_creates && !self.quota_reached)
            || self.local_updates
            || self.local_deletes
            || self.needs_update_from_server
    }

    fn has_local_changes(&self) -> bool {
        self.local_creates || self.local_updates || self.local_deletes
    }

    fn in_progress(&self) -> bool {
        self.in_progress
    }

    fn needs_update_from_server(&self) -> bool {
        self.needs_update_from_server
    }

    fn last_update_from_server(&self) -> Option<i64> {
        self.last_update_from_server
    }

    fn set_local_work(&mut self, work: LocalWork) {
        self.local_creates = work.creates;
        self.local_updates = work.updates;
        self.local_deletes = work.deletes;
    }

    fn set_in_progress(&mut self, in_progress: bool) {
        self.in_progress = in_progress;
    }

    fn set_needs_update_from_server(&mut self, needed: bool) {
        self.needs_update_from_server = needed;
    }

    fn set_quota_reached(&mut self, reached: bool) {
        self.quota_reached = reached;
    }

    fn set_last_update_from_server(&mut self, millis: i64) {
        self.last_update_from_server = Some(millis);
    }

    fn to_store_status(&self) -> StoreStatus {
        StoreStatus::Owned(self.clone())
    }
}

/// Status of a simple (full list) store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleSyncStatus {
    /// Entities created on the device and not confirmed yet.
    pub local_creates: bool,
    /// Tombstones waiting for the server.
    pub local_deletes: bool,
    /// The next pass must fetch the server listing.
    pub needs_update_from_server: bool,
    /// A pass is running.
    pub in_progress: bool,
    /// Last successful listing, epoch milliseconds.
    pub last_update_from_server: Option<i64>,
    /// The server refuses new entities of this kind.
    pub quota_reached: bool,
}

impl Default for SimpleSyncStatus {
    fn default() -> Self {
        Self {
            local_creates: false,
            local_deletes: false,
            needs_update_from_server: true,
            in_progress: false,
            last_update_from_server: None,
            quota_reached: false,
        }
    }
}

impl SyncStatus for SimpleSyncStatus {
    const TRACKS_UPDATES: bool = false;

    fn needs_sync(&self) -> bool {
        (self.local_creates && !self.quota_reached)
            || self.local_deletes
            || self.needs_update_from_server
    }

    fn has_local_changes(&self) -> bool {
        self.local_creates || self.local_deletes
    }

    fn in_progress(&self) -> bool {
        self.in_progress
    }

    fn needs_update_from_server(&self) -> bool {
        self.needs_update_from_server
    }

    fn last_update_from_server(&self) -> Option<i64> {
        self.last_update_from_server
    }

    fn set_local_work(&mut self, work: LocalWork) {
        self.local_creates = work.creates;
        self.local_deletes = work.deletes;
    }

    fn set_in_progress(&mut self, in_progress: bool) {
        self.in_progress = in_progress;
    }

    fn set_needs_update_from_server(&mut self, needed: bool) {
        self.needs_update_from_server = needed;
    }

    fn set_quota_reached(&mut self, reached: bool) {
        self.quota_reached = reached;
    }

    fn set_last_update_from_server(&mut self, millis: i64) {
        self.last_update_from_server = Some(millis);
    }

    fn to_store_status(&self) -> StoreStatus {
        StoreStatus::Simple(self.clone())
    }
}

/// Status of any store, as aggregated by the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StoreStatus {
    /// An owned store.
    Owned(OwnedSyncStatus),
    /// A simple store.
    Simple(SimpleSyncStatus),
}

impl StoreStatus {
    /// Whether a sync pass has something to do.
    pub fn needs_sync(&self) -> bool {
        match self {
            Self::Owned(s) => s.needs_sync(),
            Self::Simple(s) => s.needs_sync(),
        }
    }

    /// Whether the device holds changes the server has not seen.
    pub fn has_local_changes(&self) -> bool {
        match self {
            Self::Owned(s) => s.has_local_changes(),
            Self::Simple(s) => s.has_local_changes(),
        }
    }

    /// Whether a sync pass is running.
    pub fn in_progress(&self) -> bool {
        match self {
            Self::Owned(s) => s.in_progress,
            Self::Simple(s) => s.in_progress,
        }
    }

    /// Whether the next pass asks the server for its state.
    pub fn needs_update_from_server(&self) -> bool {
        match self {
            Self::Owned(s) => s.needs_update_from_server,
            Self::Simple(s) => s.needs_update_from_server,
        }
    }

    /// Last successful server read, epoch milliseconds.
    pub fn last_update_from_server(&self) -> Option<i64> {
        match self {
            Self::Owned(s) => s.last_update_from_server,
            Self::Simple(s) => s.last_update_from_server,
        }
    }
}

/// Everything the scheduler needs to know about one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSnapshot {
    /// The initial load completed.
    pub loaded: bool,
    /// Queued operations have not run yet.
    pub pending_operations: bool,
    /// Current synchronization status.
    pub status: StoreStatus,
}
