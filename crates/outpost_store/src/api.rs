//! Server seams of owned and simple stores.

use crate::error::ApiResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Version of an entity the device already holds, sent to the pull endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownVersion {
    /// Entity uuid.
    pub uuid: String,
    /// Entity owner.
    pub owner: String,
    /// Version held by the device.
    pub version: i64,
}

/// Identity of an entity deleted on the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeletedItem {
    /// Entity uuid.
    pub uuid: String,
    /// Entity owner.
    pub owner: String,
}

impl DeletedItem {
    /// Creates an identity.
    pub fn new(uuid: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            owner: owner.into(),
        }
    }
}

/// Answer of the pull endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "D: Deserialize<'de>"))]
pub struct UpdatesResponse<D> {
    /// Known entities the server no longer has.
    #[serde(default)]
    pub deleted: Vec<DeletedItem>,
    /// Known entities with a newer version.
    #[serde(default = "Vec::new")]
    pub updated: Vec<D>,
    /// Entities the device does not know yet.
    #[serde(default = "Vec::new")]
    pub created: Vec<D>,
}

impl<D> Default for UpdatesResponse<D> {
    fn default() -> Self {
        Self {
            deleted: Vec::new(),
            updated: Vec::new(),
            created: Vec::new(),
        }
    }
}

/// Server endpoints of a versioned entity type.
#[async_trait]
pub trait OwnedApi<D: Send + 'static>: Send + Sync {
    /// Creates entities; returns the server copies of those accepted.
    async fn create_on_server(&self, dtos: Vec<D>) -> ApiResult<Vec<D>>;

    /// Returns what changed on the server relative to `known`.
    async fn get_updates_from_server(&self, known: Vec<KnownVersion>) -> ApiResult<UpdatesResponse<D>>;

    /// Pushes local modifications; returns the server copies it changed.
    async fn send_updates_to_server(&self, dtos: Vec<D>) -> ApiResult<Vec<D>>;

    /// Deletes entities of the signed-in user by uuid.
    async fn delete_from_server(&self, uuids: Vec<String>) -> ApiResult<()>;
}

/// Server endpoints of an unversioned entity type.
#[async_trait]
pub trait SimpleApi<D: Send + 'static>: Send + Sync {
    /// Full listing of the user's entities.
    async fn get_all(&self) -> ApiResult<Vec<D>>;

    /// Creates entities; returns those accepted.
    async fn create_on_server(&self, dtos: Vec<D>) -> ApiResult<Vec<D>>;

    /// Deletes entities.
    async fn delete_from_server(&self, dtos: Vec<D>) -> ApiResult<()>;
}
