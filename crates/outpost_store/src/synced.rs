//! Object-safe view of a store, used by the session orchestrator.

use crate::context::StoreContext;
use crate::error::StoreResult;
use crate::status::StoreSnapshot;
use async_trait::async_trait;
use tokio::sync::watch;

/// A store the session can open, sync and close without knowing its
/// entity type.
#[async_trait]
pub trait SyncedStore: Send + Sync {
    /// Table name of the store.
    fn name(&self) -> &str;

    /// Loads the device table.
    fn open(&self, ctx: &StoreContext) -> StoreResult<()>;

    /// Drops in-memory state and invalidates running work.
    fn close(&self);

    /// Runs one sync pass; `true` when local work is left over.
    async fn sync(&self) -> bool;

    /// Current aggregate snapshot.
    fn snapshot(&self) -> StoreSnapshot;

    /// Follows the aggregate snapshot.
    fn watch_snapshot(&self) -> watch::Receiver<StoreSnapshot>;

    /// Asks the next pass to pull from the server.
    fn trigger_sync_from_server(&self);

    /// Resolves once queued operations have run.
    async fn flush(&self);
}
