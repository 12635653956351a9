//! Scripted in-process servers implementing the store API traits.
//!
//! Both servers keep their entities in memory, journal every call and can
//! be told to fail the next calls to an endpoint.

use crate::entities::{TagDto, TrailTag};
use async_trait::async_trait;
use outpost_store::{
    ApiError, ApiResult, DeletedItem, KnownVersion, OwnedApi, SimpleApi, UpdatesResponse,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Server endpoint, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `_bulkCreate`.
    Create,
    /// `_bulkGetUpdates`.
    GetUpdates,
    /// `_bulkUpdate`.
    SendUpdates,
    /// `_bulkDelete` / `delete`.
    Delete,
    /// Full listing of a simple entity.
    GetAll,
}

/// A journaled call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Creation of the listed keys.
    Create(Vec<String>),
    /// Pull with this many known versions.
    GetUpdates(usize),
    /// Push of the listed keys.
    SendUpdates(Vec<String>),
    /// Deletion of the listed keys.
    Delete(Vec<String>),
    /// Full listing.
    GetAll,
}

impl Call {
    /// Endpoint of the call.
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Call::Create(_) => Endpoint::Create,
            Call::GetUpdates(_) => Endpoint::GetUpdates,
            Call::SendUpdates(_) => Endpoint::SendUpdates,
            Call::Delete(_) => Endpoint::Delete,
            Call::GetAll => Endpoint::GetAll,
        }
    }
}

#[derive(Default)]
struct Faults {
    next: HashMap<Endpoint, VecDeque<ApiError>>,
    always: HashMap<Endpoint, ApiError>,
}

impl Faults {
    fn take(&mut self, endpoint: Endpoint) -> Option<ApiError> {
        if let Some(error) = self.next.get_mut(&endpoint).and_then(VecDeque::pop_front) {
            return Some(error);
        }
        self.always.get(&endpoint).cloned()
    }
}

#[derive(Default)]
struct OwnedState {
    items: BTreeMap<String, TagDto>,
    calls: Vec<Call>,
    faults: Faults,
    scripted_updates: VecDeque<UpdatesResponse<TagDto>>,
    create_limit: Option<usize>,
}

/// In-memory tag server with server-side versioning.
///
/// Creation assigns version 1 and is idempotent per uuid, updates bump the
/// version (last write wins), deletion is by uuid.
#[derive(Default)]
pub struct ScriptedOwnedServer {
    state: Mutex<OwnedState>,
}

impl std::fmt::Debug for ScriptedOwnedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ScriptedOwnedServer")
            .field("items", &state.items.len())
            .field("calls", &state.calls.len())
            .finish()
    }
}

impl ScriptedOwnedServer {
    /// An empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `dto` as is, as if another device had synced it.
    pub fn seed(&self, dto: TagDto) {
        self.state.lock().items.insert(dto.uuid.clone(), dto);
    }

    /// Edits an entity server side, bumping its version.
    pub fn edit(&self, uuid: &str, name: &str) {
        let mut state = self.state.lock();
        if let Some(item) = state.items.get_mut(uuid) {
            item.name = name.to_string();
            item.version += 1;
        }
    }

    /// Deletes an entity server side.
    pub fn remove(&self, uuid: &str) {
        self.state.lock().items.remove(uuid);
    }

    /// Server copy of `uuid`.
    pub fn item(&self, uuid: &str) -> Option<TagDto> {
        self.state.lock().items.get(uuid).cloned()
    }

    /// Every server entity, ordered by uuid.
    pub fn items(&self) -> Vec<TagDto> {
        self.state.lock().items.values().cloned().collect()
    }

    /// Journal of calls so far.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Number of calls to `endpoint`.
    pub fn calls_to(&self, endpoint: Endpoint) -> usize {
        self.state.lock().calls.iter().filter(|c| c.endpoint() == endpoint).count()
    }

    /// Fails the next call to `endpoint` with `error`.
    pub fn fail_next(&self, endpoint: Endpoint, error: ApiError) {
        self.state.lock().faults.next.entry(endpoint).or_default().push_back(error);
    }

    /// Fails every call to `endpoint` until [`recover`](Self::recover).
    pub fn fail_always(&self, endpoint: Endpoint, error: ApiError) {
        self.state.lock().faults.always.insert(endpoint, error);
    }

    /// Stops failing calls to `endpoint`.
    pub fn recover(&self, endpoint: Endpoint) {
        self.state.lock().faults.always.remove(&endpoint);
    }

    /// Drops every injected fault.
    pub fn clear_faults(&self) {
        self.state.lock().faults = Faults::default();
    }

    /// Answers the next pull with `response` instead of computing it.
    pub fn script_updates(&self, response: UpdatesResponse<TagDto>) {
        self.state.lock().scripted_updates.push_back(response);
    }

    /// Accepts at most `limit` entities per creation call.
    pub fn limit_creates(&self, limit: usize) {
        self.state.lock().create_limit = Some(limit);
    }
}

fn owned_keys<'a>(items: impl Iterator<Item = &'a TagDto>) -> Vec<String> {
    items.map(|d| format!("{}#{}", d.uuid, d.owner)).collect()
}

#[async_trait]
impl OwnedApi<TagDto> for ScriptedOwnedServer {
    async fn create_on_server(&self, dtos: Vec<TagDto>) -> ApiResult<Vec<TagDto>> {
        let mut state = self.state.lock();
        state.calls.push(Call::Create(owned_keys(dtos.iter())));
        if let Some(error) = state.faults.take(Endpoint::Create) {
            return Err(error);
        }
        let limit = state.create_limit.unwrap_or(usize::MAX);
        let mut created = Vec::new();
        for mut dto in dtos.into_iter().take(limit) {
            let stored = state.items.entry(dto.uuid.clone()).or_insert_with(|| {
                dto.version = 1;
                dto
            });
            created.push(stored.clone());
        }
        Ok(created)
    }

    async fn get_updates_from_server(&self, known: Vec<KnownVersion>) -> ApiResult<UpdatesResponse<TagDto>> {
        let mut state = self.state.lock();
        state.calls.push(Call::GetUpdates(known.len()));
        if let Some(error) = state.faults.take(Endpoint::GetUpdates) {
            return Err(error);
        }
        if let Some(response) = state.scripted_updates.pop_front() {
            return Ok(response);
        }
        let mut response = UpdatesResponse::default();
        for k in &known {
            match state.items.get(&k.uuid) {
                None => response.deleted.push(DeletedItem::new(&k.uuid, &k.owner)),
                Some(item) if item.version > k.version => response.updated.push(item.clone()),
                Some(_) => {}
            }
        }
        response.created = state
            .items
            .values()
            .filter(|item| !known.iter().any(|k| k.uuid == item.uuid))
            .cloned()
            .collect();
        Ok(response)
    }

    async fn send_updates_to_server(&self, dtos: Vec<TagDto>) -> ApiResult<Vec<TagDto>> {
        let mut state = self.state.lock();
        state.calls.push(Call::SendUpdates(owned_keys(dtos.iter())));
        if let Some(error) = state.faults.take(Endpoint::SendUpdates) {
            return Err(error);
        }
        let mut updated = Vec::new();
        for dto in dtos {
            if let Some(item) = state.items.get_mut(&dto.uuid) {
                if item.name == dto.name {
                    continue;
                }
                item.name = dto.name;
                item.updated_at = dto.updated_at;
                item.version += 1;
                updated.push(item.clone());
            }
        }
        Ok(updated)
    }

    async fn delete_from_server(&self, uuids: Vec<String>) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Delete(uuids.clone()));
        if let Some(error) = state.faults.take(Endpoint::Delete) {
            return Err(error);
        }
        for uuid in uuids {
            state.items.remove(&uuid);
        }
        Ok(())
    }
}

#[derive(Default)]
struct SimpleState {
    items: Vec<TrailTag>,
    calls: Vec<Call>,
    faults: Faults,
}

/// In-memory trail-tag server.
#[derive(Default)]
pub struct ScriptedSimpleServer {
    state: Mutex<SimpleState>,
}

impl std::fmt::Debug for ScriptedSimpleServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ScriptedSimpleServer")
            .field("items", &state.items.len())
            .field("calls", &state.calls.len())
            .finish()
    }
}

fn link_key(link: &TrailTag) -> String {
    format!("{}_{}", link.tag_uuid, link.trail_uuid)
}

impl ScriptedSimpleServer {
    /// An empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a link as if another device had synced it.
    pub fn seed(&self, link: TrailTag) {
        let mut state = self.state.lock();
        if !state.items.contains(&link) {
            state.items.push(link);
        }
    }

    /// Deletes a link server side.
    pub fn remove(&self, link: &TrailTag) {
        self.state.lock().items.retain(|l| l != link);
    }

    /// Every server link.
    pub fn items(&self) -> Vec<TrailTag> {
        self.state.lock().items.clone()
    }

    /// Journal of calls so far.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Number of calls to `endpoint`.
    pub fn calls_to(&self, endpoint: Endpoint) -> usize {
        self.state.lock().calls.iter().filter(|c| c.endpoint() == endpoint).count()
    }

    /// Fails the next call to `endpoint` with `error`.
    pub fn fail_next(&self, endpoint: Endpoint, error: ApiError) {
        self.state.lock().faults.next.entry(endpoint).or_default().push_back(error);
    }
}

#[async_trait]
impl SimpleApi<TrailTag> for ScriptedSimpleServer {
    async fn get_all(&self) -> ApiResult<Vec<TrailTag>> {
        let mut state = self.state.lock();
        state.calls.push(Call::GetAll);
        if let Some(error) = state.faults.take(Endpoint::GetAll) {
            return Err(error);
        }
        Ok(state.items.clone())
    }

    async fn create_on_server(&self, dtos: Vec<TrailTag>) -> ApiResult<Vec<TrailTag>> {
        let mut state = self.state.lock();
        state.calls.push(Call::Create(dtos.iter().map(link_key).collect()));
        if let Some(error) = state.faults.take(Endpoint::Create) {
            return Err(error);
        }
        for link in &dtos {
            if !state.items.contains(link) {
                state.items.push(link.clone());
            }
        }
        Ok(dtos)
    }

    async fn delete_from_server(&self, dtos: Vec<TrailTag>) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Delete(dtos.iter().map(link_key).collect()));
        if let Some(error) = state.faults.take(Endpoint::Delete) {
            return Err(error);
        }
        state.items.retain(|l| !dtos.contains(l));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Tag;
    use outpost_store::StoreItem;

    fn dto(uuid: &str, version: i64) -> TagDto {
        Tag::with_uuid(uuid, "a@example.com", uuid).at_version(version).to_dto()
    }

    #[tokio::test]
    async fn create_is_idempotent_and_versions_from_one() {
        let server = ScriptedOwnedServer::new();
        let first = server.create_on_server(vec![dto("t1", 0)]).await.unwrap();
        let again = server.create_on_server(vec![dto("t1", 0)]).await.unwrap();
        assert_eq!(first[0].version, 1);
        assert_eq!(again, first);
        assert_eq!(server.items().len(), 1);
    }

    #[tokio::test]
    async fn pull_reports_changes_relative_to_known() {
        let server = ScriptedOwnedServer::new();
        server.seed(dto("t1", 2));
        server.seed(dto("t2", 1));
        let known = vec![
            KnownVersion { uuid: "t1".into(), owner: "a@example.com".into(), version: 1 },
            KnownVersion { uuid: "gone".into(), owner: "a@example.com".into(), version: 1 },
        ];
        let response = server.get_updates_from_server(known).await.unwrap();
        assert_eq!(response.updated.len(), 1);
        assert_eq!(response.deleted, vec![DeletedItem::new("gone", "a@example.com")]);
        assert_eq!(response.created[0].uuid, "t2");
    }

    #[tokio::test]
    async fn faults_fire_once_then_clear() {
        let server = ScriptedOwnedServer::new();
        server.fail_next(Endpoint::Delete, ApiError::transport_retryable("offline"));
        assert!(server.delete_from_server(vec!["t1".into()]).await.is_err());
        assert!(server.delete_from_server(vec!["t1".into()]).await.is_ok());
        assert_eq!(server.calls_to(Endpoint::Delete), 2);
    }

    #[tokio::test]
    async fn simple_server_lists_created_links() {
        let server = ScriptedSimpleServer::new();
        let link = TrailTag::new("t1", "r1", "a@example.com");
        server.create_on_server(vec![link.clone()]).await.unwrap();
        assert_eq!(server.get_all().await.unwrap(), vec![link.clone()]);
        server.delete_from_server(vec![link]).await.unwrap();
        assert!(server.items().is_empty());
        assert_eq!(server.calls().last(), Some(&Call::Delete(vec!["t1_r1".into()])));
    }
}
