//! Entity traits.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// An entity held by a store.
///
/// Entities are converted to a serde DTO for the device table and the
/// server. `from_dto(to_dto(e))` must give back an equal entity.
pub trait StoreItem: Clone + Debug + Send + Sync + 'static {
    /// Wire and storage representation.
    type Dto: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static;

    /// Stable identity of the entity inside its store.
    fn key(&self) -> String;

    /// Converts the entity to its DTO.
    fn to_dto(&self) -> Self::Dto;

    /// Builds an entity from its DTO.
    fn from_dto(dto: Self::Dto) -> Self;
}

/// An entity owned by a user and versioned by the server.
///
/// The key of an owned entity must be [`owned_key`]`(uuid, owner)`.
pub trait OwnedEntity: StoreItem {
    /// Identifier, unique per owner.
    fn uuid(&self) -> &str;

    /// Owner (user email).
    fn owner(&self) -> &str;

    /// Server version. `0` or below means the server has never seen it.
    fn version(&self) -> i64;

    /// Sets the server version.
    fn set_version(&mut self, version: i64);

    /// Creation time, epoch milliseconds.
    fn created_at(&self) -> i64;

    /// Last modification time, epoch milliseconds.
    fn updated_at(&self) -> i64;

    /// Stamps the last modification time.
    fn set_updated_at(&mut self, millis: i64);

    /// Whether the server has not confirmed this entity yet.
    fn is_created_locally(&self) -> bool {
        self.version() <= 0
    }
}

/// An unversioned entity reconciled against the full server listing.
///
/// Its [`StoreItem::key`] is usually a composite of the fields that make
/// it unique (e.g. `tag uuid` + `trail uuid`).
pub trait SimpleEntity: StoreItem {}

/// Key of an owned entity: `<uuid>#<owner>`.
pub fn owned_key(uuid: &str, owner: &str) -> String {
    format!("{uuid}#{owner}")
}

/// Splits an owned key into `(uuid, owner)`.
///
/// The owner may itself contain `#`; the split happens at the first one.
pub fn split_owned_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('#')
}

/// Current wall clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
