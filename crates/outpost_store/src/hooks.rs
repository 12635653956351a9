//! Entity-specific behaviour plugged into a store.

use crate::api::DeletedItem;
use async_trait::async_trait;
use outpost_storage::StoredRecord;
use std::time::Duration;

/// Customisation points of a store. Every method has a default.
#[async_trait]
pub trait StoreHooks<E: Send + Sync + 'static>: Send + Sync {
    /// Whether `item` can be sent now, typically because every entity it
    /// references is already confirmed by the server.
    fn ready_to_save(&self, _item: &E) -> bool {
        true
    }

    /// Resolves to `true` once `item` is ready. The caller bounds the wait.
    async fn wait_ready(&self, item: &E, poll_interval: Duration) -> bool {
        loop {
            if self.ready_to_save(item) {
                return true;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Whether an entity created on the device that is still not ready can
    /// stop being scheduled for creation.
    async fn created_locally_can_be_removed(&self, _item: &E) -> bool {
        false
    }

    /// Called after the server reported or confirmed deletions.
    fn signal_deleted(&self, _deleted: &[DeletedItem]) {}

    /// Whether the server quota for new entities is used up.
    fn is_quota_reached(&self) -> bool {
        false
    }

    /// Simple stores: replace known entities with the server copy on each
    /// listing.
    fn update_entity_from_server(&self) -> bool {
        false
    }

    /// Current schema version of the device table.
    fn schema_version(&self) -> u32 {
        0
    }

    /// Upgrades a record written under `from_version`; `None` drops it.
    fn migrate(&self, _from_version: u32, record: StoredRecord) -> Option<StoredRecord> {
        Some(record)
    }
}

/// Hooks keeping every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl<E: Send + Sync + 'static> StoreHooks<E> for DefaultHooks {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct Flag(Arc<AtomicBool>);

    impl StoreHooks<u32> for Flag {
        fn ready_to_save(&self, _item: &u32) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn default_wait_ready_polls() {
        let flag = Arc::new(AtomicBool::new(false));
        let hooks = Flag(Arc::clone(&flag));
        let waiting = tokio::spawn(async move { hooks.wait_ready(&1, Duration::from_millis(250)).await });

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!waiting.is_finished());
        flag.store(true, Ordering::SeqCst);
        assert!(waiting.await.unwrap());
    }

    #[test]
    fn defaults() {
        let hooks = DefaultHooks;
        assert!(StoreHooks::<u32>::ready_to_save(&hooks, &1));
        assert!(!StoreHooks::<u32>::is_quota_reached(&hooks));
        assert_eq!(StoreHooks::<u32>::schema_version(&hooks), 0);
    }
}
