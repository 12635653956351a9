//! # Outpost Store
//!
//! Offline stores that keep a reactive in-memory collection, a durable
//! device table and a set of pending local changes, and reconcile them
//! with a REST backend.
//!
//! ## Store kinds
//!
//! - [`OwnedStore`] - entities owned by a user and versioned by the server,
//!   synced with create, delete, pull and push phases
//! - [`SimpleStore`] - unversioned entities reconciled against the full
//!   server list
//!
//! Both wrap a [`StoreEngine`], which queues local operations and applies
//! them one at a time, and implement [`SyncedStore`] so a session can drive
//! them without knowing their entity type.
//!
//! ## Cross-store ordering
//!
//! The [`DependenciesService`] records that an operation on one entity has
//! to wait for an operation on another (a link is only sent once both ends
//! exist on the server). [`SynchronizationLocks`] keep sync passes away
//! from entities that are being edited.
//!
//! ## Example
//!
//! ```rust,ignore
//! let ctx = StoreContext::in_memory()?;
//! let tags = OwnedStore::<Tag>::new("tags", api);
//! tags.open(&ctx)?;
//! let slot = tags.create(tag);
//! tags.flush().await;
//! let more_work = tags.sync().await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod collection;
mod config;
mod context;
mod dependencies;
mod engine;
mod error;
mod hooks;
mod http;
mod item;
mod locks;
mod owned;
mod reporter;
mod simple;
mod status;
mod synced;

pub use api::{DeletedItem, KnownVersion, OwnedApi, SimpleApi, UpdatesResponse};
pub use collection::{Collection, Slot};
pub use config::StoreConfig;
pub use context::StoreContext;
pub use dependencies::{
    DependenciesService, DependencyRecord, DependencyTarget, Operation, OperationDependencies,
    DEPENDENCIES_TABLE,
};
pub use engine::StoreEngine;
pub use error::{ApiError, ApiResult, StoreError, StoreResult};
pub use hooks::{DefaultHooks, StoreHooks};
pub use http::{HttpClient, HttpOwnedApi, HttpSimpleApi};
pub use item::{now_millis, owned_key, split_owned_key, OwnedEntity, SimpleEntity, StoreItem};
pub use locks::{ItemLock, SynchronizationLocks};
pub use owned::OwnedStore;
pub use reporter::{
    ErrorReporter, RecordingReporter, ReportedError, TracingReporter, CREATE_ITEMS, DELETE_ITEMS,
    GET_UPDATES, SEND_UPDATES,
};
pub use simple::SimpleStore;
pub use status::{LocalWork, OwnedSyncStatus, SimpleSyncStatus, StoreSnapshot, StoreStatus, SyncStatus};
pub use synced::SyncedStore;
