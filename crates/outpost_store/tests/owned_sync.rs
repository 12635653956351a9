//! Sync passes of an owned store against a scripted server.

use async_trait::async_trait;
use outpost_store::*;
use outpost_testkit::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn tags_over(server: &Arc<ScriptedOwnedServer>) -> Arc<OwnedStore<Tag>> {
    OwnedStore::<Tag>::new("tags", server.clone())
}

fn confirmed(uuid: &str, name: &str, version: i64) -> TagDto {
    Tag::with_uuid(uuid, OWNER, name).at_version(version).to_dto()
}

#[tokio::test]
async fn offline_create_is_confirmed_at_version_one() {
    let context = TestContext::memory();
    let server = Arc::new(ScriptedOwnedServer::new());
    let tags = tags_over(&server);
    tags.open(&context.ctx).unwrap();

    let slot = tags.create(Tag::with_uuid("t1", OWNER, "hike"));
    tags.flush().await;
    assert!(tags.status().local_creates);

    assert!(!tags.sync().await);

    let tag = slot.get().unwrap();
    assert_eq!(tag.version, 1);
    assert_eq!(tags.local_creates_count(), 0);
    assert!(!tags.status().needs_sync());
    assert!(tags.status().last_update_from_server.is_some());
    assert_eq!(server.item("t1").unwrap().version, 1);

    let stored = context.ctx.db().table("tags").unwrap().get(&tag.key()).unwrap().unwrap();
    assert!(!stored.has_pending_work());
    assert_eq!(stored.item["version"], 1);
}

#[tokio::test]
async fn duplicate_creates_reach_the_server_once() {
    let context = TestContext::memory();
    let server = Arc::new(ScriptedOwnedServer::new());
    let tags = tags_over(&server);
    tags.open(&context.ctx).unwrap();

    let first = tags.create(Tag::with_uuid("t1", OWNER, "hike"));
    let second = tags.create(Tag::with_uuid("t1", OWNER, "other"));
    assert!(first.same_slot(&second));
    tags.sync().await;

    assert_eq!(server.calls()[0], Call::Create(vec![format!("t1#{OWNER}")]));
    assert_eq!(server.calls_to(Endpoint::Create), 1);
    assert_eq!(tags.items().len(), 1);
}

#[tokio::test]
async fn failed_create_is_retried_on_the_next_pass() {
    let context = TestContext::memory();
    let server = Arc::new(ScriptedOwnedServer::new());
    let tags = tags_over(&server);
    tags.open(&context.ctx).unwrap();
    server.fail_next(Endpoint::Create, ApiError::transport_retryable("offline"));

    tags.create(Tag::with_uuid("t1", OWNER, "hike"));
    assert!(tags.sync().await);
    assert_eq!(context.reporter.contexts(), vec![CREATE_ITEMS]);
    assert_eq!(tags.local_creates_count(), 1);
    assert!(tags.status().last_update_from_server.is_some());

    assert!(!tags.sync().await);
    assert_eq!(server.items().len(), 1);
    assert_eq!(tags.get_item("t1", OWNER).unwrap().version, 1);
}

#[tokio::test]
async fn stale_server_copy_never_regresses_the_version() {
    let context = TestContext::memory();
    let server = Arc::new(ScriptedOwnedServer::new());
    server.seed(confirmed("t1", "hike", 4));
    let tags = tags_over(&server);
    tags.open(&context.ctx).unwrap();
    tags.sync().await;
    assert_eq!(tags.get_item("t1", OWNER).unwrap().version, 4);

    server.script_updates(UpdatesResponse {
        updated: vec![confirmed("t1", "old", 3)],
        ..Default::default()
    });
    tags.trigger_sync_from_server();
    tags.sync().await;

    let tag = tags.get_item("t1", OWNER).unwrap();
    assert_eq!(tag.version, 4);
    assert_eq!(tag.name, "hike");
}

#[tokio::test]
async fn local_delete_wins_over_a_concurrent_pull() {
    let context = TestContext::memory();
    let server = Arc::new(ScriptedOwnedServer::new());
    server.seed(confirmed("t1", "hike", 1));
    let tags = tags_over(&server);
    tags.open(&context.ctx).unwrap();
    tags.sync().await;
    let tag = tags.get_item("t1", OWNER).unwrap();

    server.fail_next(Endpoint::Delete, ApiError::transport_retryable("offline"));
    tags.delete(tag);
    tags.trigger_sync_from_server();
    assert!(tags.sync().await);

    assert!(tags.get_item("t1", OWNER).is_none());
    assert_eq!(tags.engine().local_deletes_count(), 1);
    assert_eq!(context.reporter.contexts(), vec![DELETE_ITEMS]);

    assert!(!tags.sync().await);
    assert!(server.item("t1").is_none());
    assert_eq!(tags.engine().local_deletes_count(), 0);
    assert!(context.ctx.db().table("tags").unwrap().is_empty().unwrap());
}

#[tokio::test]
async fn local_edits_are_pushed_and_server_edits_pulled() {
    let context = TestContext::memory();
    let server = Arc::new(ScriptedOwnedServer::new());
    server.seed(confirmed("t1", "hike", 1));
    let tags = tags_over(&server);
    tags.open(&context.ctx).unwrap();
    tags.sync().await;

    let tag = tags.get_item("t1", OWNER).unwrap();
    tags.update(tag.renamed("summit"));
    tags.flush().await;
    assert!(tags.item_updated_locally("t1", OWNER));
    assert!(tags.status().local_updates);

    assert!(!tags.sync().await);
    assert_eq!(server.item("t1").unwrap().name, "summit");
    let tag = tags.get_item("t1", OWNER).unwrap();
    assert_eq!(tag.version, 2);
    assert!(!tags.item_updated_locally("t1", OWNER));

    server.edit("t1", "peak");
    tags.trigger_sync_from_server();
    tags.sync().await;
    let tag = tags.get_item("t1", OWNER).unwrap();
    assert_eq!((tag.name.as_str(), tag.version), ("peak", 3));
}

#[tokio::test]
async fn pending_edit_survives_a_pull_of_the_same_version() {
    let context = TestContext::memory();
    let server = Arc::new(ScriptedOwnedServer::new());
    server.seed(confirmed("t1", "hike", 1));
    let tags = tags_over(&server);
    tags.open(&context.ctx).unwrap();
    tags.sync().await;

    let tag = tags.get_item("t1", OWNER).unwrap();
    tags.update(tag.renamed("mine"));
    server.script_updates(UpdatesResponse {
        updated: vec![confirmed("t1", "theirs", 1)],
        ..Default::default()
    });
    tags.trigger_sync_from_server();
    tags.sync().await;

    let tag = tags.get_item("t1", OWNER).unwrap();
    assert_eq!((tag.name.as_str(), tag.version), ("mine", 2));
    assert_eq!(server.item("t1").unwrap().name, "mine");
}

#[tokio::test]
async fn pending_create_survives_a_restart() {
    let context = TestContext::file();
    let server = Arc::new(ScriptedOwnedServer::new());
    let tags = tags_over(&server);
    tags.open(&context.ctx).unwrap();
    tags.create(Tag::with_uuid("t1", OWNER, "hike"));
    tags.flush().await;
    tags.close();

    let context = context.restart();
    let tags = tags_over(&server);
    tags.open(&context.ctx).unwrap();
    assert_eq!(tags.local_creates_count(), 1);
    assert!(tags.status().local_creates);

    assert!(!tags.sync().await);
    assert_eq!(server.items().len(), 1);
}

/// Gives every created entity a new uuid, rejecting the first `rejected`.
struct Reassigning {
    rejected: usize,
}

#[async_trait]
impl OwnedApi<TagDto> for Reassigning {
    async fn create_on_server(&self, dtos: Vec<TagDto>) -> ApiResult<Vec<TagDto>> {
        Ok(dtos
            .into_iter()
            .skip(self.rejected)
            .map(|mut dto| {
                dto.uuid = format!("srv-{}", dto.uuid);
                dto.version = 1;
                dto
            })
            .collect())
    }

    async fn get_updates_from_server(&self, _known: Vec<KnownVersion>) -> ApiResult<UpdatesResponse<TagDto>> {
        Ok(UpdatesResponse::default())
    }

    async fn send_updates_to_server(&self, _dtos: Vec<TagDto>) -> ApiResult<Vec<TagDto>> {
        Ok(Vec::new())
    }

    async fn delete_from_server(&self, _uuids: Vec<String>) -> ApiResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn server_assigned_identity_takes_over_the_placeholder() {
    let context = TestContext::memory();
    let tags = OwnedStore::<Tag>::new("tags", Arc::new(Reassigning { rejected: 0 }));
    tags.open(&context.ctx).unwrap();

    let slot = tags.create(Tag::with_uuid("t1", OWNER, "hike"));
    assert!(!tags.sync().await);

    assert_eq!(slot.get().unwrap().uuid, "srv-t1");
    assert!(tags.get_item("t1", OWNER).is_none());
    assert!(tags.get_item("srv-t1", OWNER).is_some());
    assert!(tags.get_all().borrow()[0].same_slot(&slot));

    let table = context.ctx.db().table("tags").unwrap();
    assert!(table.get(&owned_key("t1", OWNER)).unwrap().is_none());
    assert!(table.get(&owned_key("srv-t1", OWNER)).unwrap().is_some());
}

#[tokio::test]
async fn recreating_before_the_delete_is_sent_updates_the_server_copy() {
    let context = TestContext::memory();
    let server = Arc::new(ScriptedOwnedServer::new());
    server.seed(confirmed("t1", "hike", 1));
    let tags = tags_over(&server);
    tags.open(&context.ctx).unwrap();
    tags.sync().await;

    let tag = tags.get_item("t1", OWNER).unwrap();
    tags.delete(tag);
    let slot = tags.create(Tag::with_uuid("t1", OWNER, "again"));
    tags.trigger_sync_from_server();
    assert!(!tags.sync().await);

    assert_eq!(server.calls_to(Endpoint::Create), 0);
    assert_eq!(server.calls_to(Endpoint::Delete), 0);
    assert_eq!(server.item("t1").unwrap().name, "again");
    let tag = slot.get().unwrap();
    assert_eq!((tag.name.as_str(), tag.version), ("again", 2));
    assert!(!tags.status().has_local_changes());
}

#[tokio::test]
async fn partial_acceptance_with_new_identities_keeps_rejected_placeholders() {
    let context = TestContext::memory();
    let tags = OwnedStore::<Tag>::new("tags", Arc::new(Reassigning { rejected: 1 }));
    tags.open(&context.ctx).unwrap();

    let a = tags.create(Tag::with_uuid("a", OWNER, "A"));
    let b = tags.create(Tag::with_uuid("b", OWNER, "B"));
    assert!(tags.sync().await);

    let kept = a.get().unwrap();
    assert_eq!((kept.uuid.as_str(), kept.name.as_str()), ("a", "A"));
    assert_eq!(kept.version, 0);
    assert_eq!(b.get().unwrap().uuid, "b");
    assert_eq!(tags.local_creates_count(), 2);

    let accepted = tags.get_item("srv-b", OWNER).unwrap();
    assert_eq!((accepted.name.as_str(), accepted.version), ("B", 1));

    let table = context.ctx.db().table("tags").unwrap();
    let stored = table.get(&owned_key("a", OWNER)).unwrap().unwrap();
    assert!(stored.created_locally);
    assert_eq!(stored.item["name"], "A");
    assert!(!table.get(&owned_key("srv-b", OWNER)).unwrap().unwrap().has_pending_work());
}

#[tokio::test]
async fn locked_entity_is_left_out_of_the_push() {
    let context = TestContext::memory();
    let server = Arc::new(ScriptedOwnedServer::new());
    server.seed(confirmed("t1", "hike", 1));
    let tags = tags_over(&server);
    tags.open(&context.ctx).unwrap();
    tags.sync().await;

    assert!(tags.lock("t1", OWNER).await);
    let tag = tags.get_item("t1", OWNER).unwrap();
    tags.update(tag.renamed("draft"));
    assert!(tags.sync().await);
    assert_eq!(server.calls_to(Endpoint::SendUpdates), 0);

    tags.unlock("t1", OWNER);
    assert!(!tags.sync().await);
    assert_eq!(server.calls_to(Endpoint::SendUpdates), 1);
    assert_eq!(server.item("t1").unwrap().name, "draft");
}

#[tokio::test]
async fn update_with_lock_stamps_and_persists() {
    let context = TestContext::memory();
    let server = Arc::new(ScriptedOwnedServer::new());
    server.seed(confirmed("t1", "hike", 1));
    let tags = tags_over(&server);
    tags.open(&context.ctx).unwrap();
    tags.sync().await;

    let before = tags.get_item("t1", OWNER).unwrap();
    let after = tags.update_with_lock(before.clone(), |t| t.name = "edited".into()).await;
    assert_eq!(after.name, "edited");
    assert!(after.updated_at >= before.updated_at);

    let stored = context.ctx.db().table("tags").unwrap().get(&before.key()).unwrap().unwrap();
    assert!(stored.updated_locally);
    assert_eq!(stored.item["name"], "edited");
}

struct Waiting {
    removable: bool,
}

#[async_trait]
impl StoreHooks<Tag> for Waiting {
    fn ready_to_save(&self, _item: &Tag) -> bool {
        false
    }

    async fn created_locally_can_be_removed(&self, _item: &Tag) -> bool {
        self.removable
    }
}

fn waiting_store(server: &Arc<ScriptedOwnedServer>, removable: bool) -> Arc<OwnedStore<Tag>> {
    OwnedStore::<Tag>::with_options(
        "tags",
        server.clone(),
        Arc::new(Waiting { removable }),
        StoreConfig::new().with_readiness_timeout(Duration::from_secs(1)),
    )
}

#[tokio::test(start_paused = true)]
async fn unready_creations_wait_for_a_later_pass() {
    let context = TestContext::memory();
    let server = Arc::new(ScriptedOwnedServer::new());
    let tags = waiting_store(&server, false);
    tags.open(&context.ctx).unwrap();

    tags.create(Tag::with_uuid("t1", OWNER, "hike"));
    assert!(tags.sync().await);
    assert_eq!(server.calls_to(Endpoint::Create), 0);
    assert_eq!(tags.local_creates_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn abandoned_creations_are_dropped_by_the_next_pull() {
    let context = TestContext::memory();
    let server = Arc::new(ScriptedOwnedServer::new());
    server.fail_next(Endpoint::GetUpdates, ApiError::transport_retryable("offline"));
    let tags = waiting_store(&server, true);
    tags.open(&context.ctx).unwrap();

    tags.create(Tag::with_uuid("t1", OWNER, "hike"));
    tags.sync().await;
    assert_eq!(server.calls_to(Endpoint::Create), 0);
    assert_eq!(tags.local_creates_count(), 0);
    assert!(!tags.status().local_creates);
    assert!(tags.get_item("t1", OWNER).is_some());

    let table = context.ctx.db().table("tags").unwrap();
    assert!(table.get(&owned_key("t1", OWNER)).unwrap().unwrap().created_locally);

    tags.sync().await;
    assert_eq!(server.calls_to(Endpoint::Create), 0);
    assert!(tags.get_item("t1", OWNER).is_none());
    assert!(table.get(&owned_key("t1", OWNER)).unwrap().is_none());
}

struct QuotaReached;

impl StoreHooks<Tag> for QuotaReached {
    fn is_quota_reached(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn reached_quota_silences_pending_creates() {
    let context = TestContext::memory();
    let server = Arc::new(ScriptedOwnedServer::new());
    server.fail_always(Endpoint::Create, ApiError::status(403, Some("quota-exceeded-tags")));
    let tags =
        OwnedStore::<Tag>::with_options("tags", server.clone(), Arc::new(QuotaReached), StoreConfig::default());
    tags.open(&context.ctx).unwrap();

    tags.create(Tag::with_uuid("t1", OWNER, "hike"));
    assert!(!tags.sync().await);
    assert!(tags.status().quota_reached);
    assert!(tags.status().local_creates);
    assert!(!tags.status().needs_sync());
    assert!(context.reporter.reports()[0].error.is_quota());
}

#[derive(Default)]
struct Stalled {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl OwnedApi<TagDto> for Stalled {
    async fn create_on_server(&self, dtos: Vec<TagDto>) -> ApiResult<Vec<TagDto>> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(dtos
            .into_iter()
            .map(|mut dto| {
                dto.version = 1;
                dto
            })
            .collect())
    }

    async fn get_updates_from_server(&self, _known: Vec<KnownVersion>) -> ApiResult<UpdatesResponse<TagDto>> {
        Ok(UpdatesResponse::default())
    }

    async fn send_updates_to_server(&self, dtos: Vec<TagDto>) -> ApiResult<Vec<TagDto>> {
        Ok(dtos)
    }

    async fn delete_from_server(&self, _uuids: Vec<String>) -> ApiResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn close_during_a_pass_discards_its_results() {
    let context = TestContext::memory();
    let api = Arc::new(Stalled::default());
    let tags = OwnedStore::<Tag>::new("tags", api.clone());
    tags.open(&context.ctx).unwrap();
    tags.create(Tag::with_uuid("t1", OWNER, "hike"));
    tags.flush().await;

    let store = tags.clone();
    let pass = tokio::spawn(async move { store.sync().await });
    api.entered.notified().await;
    tags.close();
    api.release.notify_one();

    assert!(!pass.await.unwrap());
    assert!(tags.items().is_empty());
    assert!(!tags.status().in_progress);

    tags.open(&context.ctx).unwrap();
    assert_eq!(tags.local_creates_count(), 1);
    assert_eq!(tags.get_item("t1", OWNER).unwrap().version, 0);
}
