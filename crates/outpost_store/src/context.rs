//! Collaborators shared by the stores of one session.

use crate::dependencies::DependenciesService;
use crate::error::StoreResult;
use crate::reporter::{ErrorReporter, TracingReporter};
use outpost_storage::DeviceDatabase;
use std::sync::Arc;

/// Device database, dependency ledger and error reporter of a signed-in
/// session. Stores receive it when they are opened.
#[derive(Clone)]
pub struct StoreContext {
    db: Arc<DeviceDatabase>,
    dependencies: Arc<DependenciesService>,
    reporter: Arc<dyn ErrorReporter>,
}

impl std::fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreContext")
            .field("db", &self.db)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

impl StoreContext {
    /// Creates a context over `db`, opening its dependency ledger.
    pub fn new(db: Arc<DeviceDatabase>) -> StoreResult<Self> {
        let dependencies = Arc::new(DependenciesService::open(&db)?);
        Ok(Self {
            db,
            dependencies,
            reporter: Arc::new(TracingReporter),
        })
    }

    /// Creates a context over a fresh in-memory database.
    pub fn in_memory() -> StoreResult<Self> {
        Self::new(Arc::new(DeviceDatabase::open_in_memory()))
    }

    /// Replaces the error reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// The device database.
    pub fn db(&self) -> &Arc<DeviceDatabase> {
        &self.db
    }

    /// The dependency ledger.
    pub fn dependencies(&self) -> &Arc<DependenciesService> {
        &self.dependencies
    }

    /// The error reporter.
    pub fn reporter(&self) -> &Arc<dyn ErrorReporter> {
        &self.reporter
    }
}
