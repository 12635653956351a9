//! Random local histories end with the server matching the device.

use outpost_store::*;
use outpost_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

fn run(ops: Vec<LocalOp>, flaky: bool) -> (BTreeMap<String, String>, BTreeMap<String, String>, BTreeMap<String, String>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async move {
        let context = TestContext::memory();
        let server = Arc::new(ScriptedOwnedServer::new());
        let tags = OwnedStore::<Tag>::new("tags", server.clone());
        tags.open(&context.ctx).unwrap();

        let mut model: BTreeMap<String, String> = BTreeMap::new();
        for (step, op) in ops.into_iter().enumerate() {
            match op {
                LocalOp::Create(i) => {
                    let uuid = pool_uuid(i);
                    if !model.contains_key(&uuid) {
                        model.insert(uuid.clone(), "new".to_string());
                        tags.create(Tag::with_uuid(&uuid, OWNER, "new"));
                    }
                }
                LocalOp::Rename(i, name) => {
                    let uuid = pool_uuid(i);
                    if model.contains_key(&uuid) {
                        tags.flush().await;
                        let tag = tags.get_item(&uuid, OWNER).unwrap();
                        tags.update(tag.renamed(&name));
                        model.insert(uuid, name);
                    }
                }
                LocalOp::Delete(i) => {
                    let uuid = pool_uuid(i);
                    if model.remove(&uuid).is_some() {
                        tags.flush().await;
                        tags.delete(tags.get_item(&uuid, OWNER).unwrap());
                    }
                }
                LocalOp::Sync => {
                    if flaky && step % 2 == 0 {
                        server.fail_next(Endpoint::Create, ApiError::transport_retryable("offline"));
                        server.fail_next(Endpoint::Delete, ApiError::transport_retryable("offline"));
                        server.fail_next(Endpoint::SendUpdates, ApiError::transport_retryable("offline"));
                    }
                    tags.sync().await;
                }
            }
        }

        server.clear_faults();
        for _ in 0..4 {
            if !tags.sync().await {
                break;
            }
        }

        let local = tags.items().into_iter().map(|t| (t.uuid, t.name)).collect();
        let remote = server.items().into_iter().map(|t| (t.uuid, t.name)).collect();
        (model, local, remote)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn server_converges_to_local_state(ops in local_ops_strategy(4, 24)) {
        let (model, local, remote) = run(ops, false);
        prop_assert_eq!(&local, &model);
        prop_assert_eq!(&remote, &model);
    }

    #[test]
    fn failed_passes_lose_nothing(ops in local_ops_strategy(4, 24)) {
        let (model, local, remote) = run(ops, true);
        prop_assert_eq!(&local, &model);
        prop_assert_eq!(&remote, &model);
    }
}
