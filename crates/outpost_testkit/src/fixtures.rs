//! Session fixtures over in-memory or temporary on-disk databases.

use outpost_storage::DeviceDatabase;
use outpost_store::{RecordingReporter, StoreContext};
use std::sync::Arc;
use tempfile::TempDir;

/// Owner used by the sample entities.
pub const OWNER: &str = "hiker@example.com";

/// A store context with a recording reporter and automatic cleanup.
pub struct TestContext {
    /// The context handed to stores.
    pub ctx: StoreContext,
    /// Reporter capturing network errors.
    pub reporter: Arc<RecordingReporter>,
    dir: Option<TempDir>,
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext").field("ctx", &self.ctx).finish_non_exhaustive()
    }
}

impl TestContext {
    /// A context over an in-memory database.
    pub fn memory() -> Self {
        Self::over(Arc::new(DeviceDatabase::open_in_memory()), None)
    }

    /// A context over a database in a fresh temporary directory.
    pub fn file() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let db = DeviceDatabase::open(dir.path()).expect("Failed to open device database");
        Self::over(Arc::new(db), Some(dir))
    }

    fn over(db: Arc<DeviceDatabase>, dir: Option<TempDir>) -> Self {
        let reporter = Arc::new(RecordingReporter::new());
        let ctx = StoreContext::new(db)
            .expect("Failed to open dependency ledger")
            .with_reporter(reporter.clone());
        Self { ctx, reporter, dir }
    }

    /// Simulates an app restart: closes the database and opens a new one
    /// over the same directory. In-memory contexts keep their database.
    pub fn restart(self) -> Self {
        match self.dir {
            Some(dir) => {
                self.ctx.db().close();
                let db = DeviceDatabase::open(dir.path()).expect("Failed to reopen device database");
                Self::over(Arc::new(db), Some(dir))
            }
            None => self,
        }
    }
}

/// Runs `f` with an in-memory context.
pub fn with_memory_context<F, R>(f: F) -> R
where
    F: FnOnce(&TestContext) -> R,
{
    f(&TestContext::memory())
}
