//! Sample entities: an owned `Tag` and a simple `TrailTag` linking a tag
//! to a trail.

use outpost_store::{now_millis, owned_key, OwnedEntity, SimpleEntity, StoreItem};
use serde::{Deserialize, Serialize};

/// A user tag, versioned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Identifier.
    pub uuid: String,
    /// Owner email.
    pub owner: String,
    /// Server version, `0` until confirmed.
    pub version: i64,
    /// Display name.
    pub name: String,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    /// Last modification time, epoch milliseconds.
    pub updated_at: i64,
}

/// Wire form of [`Tag`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagDto {
    /// Identifier.
    pub uuid: String,
    /// Owner email.
    pub owner: String,
    /// Server version.
    #[serde(default)]
    pub version: i64,
    /// Display name.
    pub name: String,
    /// Creation time.
    #[serde(default)]
    pub created_at: i64,
    /// Last modification time.
    #[serde(default)]
    pub updated_at: i64,
}

impl Tag {
    /// A new, unconfirmed tag with a random uuid.
    pub fn new(owner: &str, name: &str) -> Self {
        Self::with_uuid(&uuid::Uuid::new_v4().to_string(), owner, name)
    }

    /// A new, unconfirmed tag.
    pub fn with_uuid(uuid: &str, owner: &str, name: &str) -> Self {
        let now = now_millis();
        Self {
            uuid: uuid.to_string(),
            owner: owner.to_string(),
            version: 0,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The same tag at another version.
    pub fn at_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// The same tag under another name.
    pub fn renamed(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

impl StoreItem for Tag {
    type Dto = TagDto;

    fn key(&self) -> String {
        owned_key(&self.uuid, &self.owner)
    }

    fn to_dto(&self) -> TagDto {
        TagDto {
            uuid: self.uuid.clone(),
            owner: self.owner.clone(),
            version: self.version,
            name: self.name.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn from_dto(dto: TagDto) -> Self {
        Self {
            uuid: dto.uuid,
            owner: dto.owner,
            version: dto.version,
            name: dto.name,
            created_at: dto.created_at,
            updated_at: dto.updated_at,
        }
    }
}

impl OwnedEntity for Tag {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn owner(&self) -> &str {
        &self.owner
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn set_updated_at(&mut self, millis: i64) {
        self.updated_at = millis;
    }
}

/// Link between a tag and a trail. Both ends must exist on the server
/// before the link can be created there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailTag {
    /// Linked tag.
    pub tag_uuid: String,
    /// Linked trail.
    pub trail_uuid: String,
    /// Owner email.
    pub owner: String,
}

impl TrailTag {
    /// A link between `tag_uuid` and `trail_uuid`.
    pub fn new(tag_uuid: &str, trail_uuid: &str, owner: &str) -> Self {
        Self {
            tag_uuid: tag_uuid.to_string(),
            trail_uuid: trail_uuid.to_string(),
            owner: owner.to_string(),
        }
    }
}

impl StoreItem for TrailTag {
    type Dto = TrailTag;

    fn key(&self) -> String {
        format!("{}_{}", self.tag_uuid, self.trail_uuid)
    }

    fn to_dto(&self) -> TrailTag {
        self.clone()
    }

    fn from_dto(dto: TrailTag) -> Self {
        dto
    }
}

impl SimpleEntity for TrailTag {}
