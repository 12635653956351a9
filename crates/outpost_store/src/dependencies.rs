//! Cross-store ordering of server operations.
//!
//! An edge says "operation O on item A must wait until operation P on item B
//! has reached the server". Edges are persisted in the `dependencies` table,
//! one record per `(store, item)` keyed `<store>;<item key>`. Event gates are
//! kept in memory only and vanish with the session.

use crate::error::StoreResult;
use outpost_storage::{DeviceDatabase, StoredRecord, Table};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name of the table holding dependency records.
pub const DEPENDENCIES_TABLE: &str = "dependencies";

/// A server operation an item can wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Creation on the server.
    Create,
    /// Update pushed to the server.
    Update,
    /// Deletion on the server.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// The far end of a dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyTarget {
    /// Store holding the awaited item.
    pub store_name: String,
    /// Key of the awaited item.
    pub item_key: String,
    /// Operation that must complete first.
    pub operation: Operation,
}

impl DependencyTarget {
    /// Creates a target.
    pub fn new(store_name: impl Into<String>, item_key: impl Into<String>, operation: Operation) -> Self {
        Self {
            store_name: store_name.into(),
            item_key: item_key.into(),
            operation,
        }
    }
}

/// Edges blocking one operation of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDependencies {
    /// The blocked operation.
    pub operation: Operation,
    /// What it waits for.
    pub dependencies: Vec<DependencyTarget>,
}

/// All edges leaving one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    /// `<store>;<item key>`.
    pub key: String,
    /// Blocked operations of the item.
    pub operations: Vec<OperationDependencies>,
}

/// Ledger of dependency edges and event gates.
pub struct DependenciesService {
    table: Arc<dyn Table>,
    events: Mutex<HashMap<String, Vec<(String, String, Operation)>>>,
    /// Serializes read-modify-write cycles on `table`.
    write: Mutex<()>,
}

impl fmt::Debug for DependenciesService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependenciesService")
            .field("table", &self.table.name())
            .field("events", &self.events.lock().len())
            .finish()
    }
}

fn record_key(store: &str, item_key: &str) -> String {
    format!("{store};{item_key}")
}

impl DependenciesService {
    /// Opens the ledger stored in `db`.
    pub fn open(db: &DeviceDatabase) -> StoreResult<Self> {
        Ok(Self::with_table(db.table(DEPENDENCIES_TABLE)?))
    }

    /// Uses `table` as the ledger.
    pub fn with_table(table: Arc<dyn Table>) -> Self {
        Self {
            table,
            events: Mutex::new(HashMap::new()),
            write: Mutex::new(()),
        }
    }

    fn load(&self, key: &str) -> StoreResult<Option<DependencyRecord>> {
        match self.table.get(key)? {
            Some(record) => Ok(Some(serde_json::from_value(record.item)?)),
            None => Ok(None),
        }
    }

    fn to_stored(record: &DependencyRecord) -> StoreResult<StoredRecord> {
        Ok(StoredRecord::pristine(
            record.key.clone(),
            serde_json::to_value(record)?,
        ))
    }

    /// Declares that `operation` on `item_key` of `store` waits for `deps`.
    ///
    /// Edges already present are not duplicated.
    pub fn add_dependencies(
        &self,
        store: &str,
        item_key: &str,
        operation: Operation,
        deps: Vec<DependencyTarget>,
    ) -> StoreResult<()> {
        if deps.is_empty() {
            return Ok(());
        }
        tracing::info!(store, item_key, %operation, count = deps.len(), "adding dependencies");
        let key = record_key(store, item_key);
        let _write = self.write.lock();
        let mut record = self.load(&key)?.unwrap_or_else(|| DependencyRecord {
            key: key.clone(),
            operations: Vec::new(),
        });
        match record.operations.iter_mut().find(|o| o.operation == operation) {
            Some(existing) => {
                for dep in deps {
                    if !existing.dependencies.contains(&dep) {
                        existing.dependencies.push(dep);
                    }
                }
            }
            None => {
                let mut unique: Vec<DependencyTarget> = Vec::with_capacity(deps.len());
                for dep in deps {
                    if !unique.contains(&dep) {
                        unique.push(dep);
                    }
                }
                record.operations.push(OperationDependencies {
                    operation,
                    dependencies: unique,
                });
            }
        }
        self.table.put(Self::to_stored(&record)?)?;
        Ok(())
    }

    /// Records that `operation` reached the server for `items` of `store`.
    ///
    /// Removes edges targeting those items with the same operation, or with
    /// any operation when `operation` is a delete. Deleted items also lose
    /// their own record.
    pub fn operation_done(&self, store: &str, operation: Operation, items: &[String]) -> StoreResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let deleted_records: Vec<String> = if operation == Operation::Delete {
            items.iter().map(|item| record_key(store, item)).collect()
        } else {
            Vec::new()
        };

        let _write = self.write.lock();
        let mut to_remove = Vec::new();
        let mut to_save = Vec::new();
        for stored in self.table.all()? {
            if deleted_records.contains(&stored.key) {
                tracing::info!(key = %stored.key, "item deleted on server, dropping its dependencies");
                to_remove.push(stored.key);
                continue;
            }
            let mut record: DependencyRecord = serde_json::from_value(stored.item)?;
            let mut changed = false;
            for op in &mut record.operations {
                let before = op.dependencies.len();
                op.dependencies.retain(|dep| {
                    let targeted = dep.store_name == store && items.contains(&dep.item_key);
                    !(targeted && (operation == Operation::Delete || operation == dep.operation))
                });
                changed |= op.dependencies.len() != before;
            }
            if !changed {
                continue;
            }
            record.operations.retain(|op| {
                if op.dependencies.is_empty() {
                    tracing::info!(key = %stored.key, operation = %op.operation, "no more dependency");
                }
                !op.dependencies.is_empty()
            });
            if record.operations.is_empty() {
                to_remove.push(record.key);
            } else {
                to_save.push(Self::to_stored(&record)?);
            }
        }
        if !to_remove.is_empty() {
            self.table.delete_many(&to_remove)?;
        }
        if !to_save.is_empty() {
            self.table.put_many(to_save)?;
        }
        Ok(())
    }

    /// Filters `items` down to those allowed to perform `operation` now.
    pub fn can_do(&self, store: &str, operation: Operation, items: &[String]) -> StoreResult<Vec<String>> {
        let gated: Vec<String> = {
            let events = self.events.lock();
            events
                .values()
                .flatten()
                .filter(|(s, _, op)| s == store && *op == operation)
                .map(|(_, item, _)| item.clone())
                .collect()
        };
        let mut allowed = Vec::with_capacity(items.len());
        for item in items {
            if gated.contains(item) {
                continue;
            }
            let blocked = self
                .load(&record_key(store, item))?
                .is_some_and(|record| record.operations.iter().any(|o| o.operation == operation));
            if !blocked {
                allowed.push(item.clone());
            }
        }
        Ok(allowed)
    }

    /// Holds `operation` on `item_key` until [`fire_event`](Self::fire_event)
    /// is called with `event_id`.
    pub fn add_event_dependency(&self, store: &str, item_key: &str, operation: Operation, event_id: &str) {
        tracing::info!(store, item_key, %operation, event_id, "adding event dependency");
        self.events
            .lock()
            .entry(event_id.to_string())
            .or_default()
            .push((store.to_string(), item_key.to_string(), operation));
    }

    /// Releases every gate registered under `event_id`.
    pub fn fire_event(&self, event_id: &str) {
        tracing::info!(event_id, "releasing event dependencies");
        self.events.lock().remove(event_id);
    }

    /// Dependency records of `store`, or of every store when `None`.
    pub fn pending(&self, store: Option<&str>) -> StoreResult<Vec<DependencyRecord>> {
        let prefix = store.map(|s| format!("{s};"));
        let mut records = Vec::new();
        for stored in self.table.all()? {
            if prefix.as_deref().is_some_and(|p| !stored.key.starts_with(p)) {
                continue;
            }
            records.push(serde_json::from_value(stored.item)?);
        }
        Ok(records)
    }

    /// Forgets every edge and event gate.
    pub fn clear(&self) -> StoreResult<()> {
        self.events.lock().clear();
        let _write = self.write.lock();
        self.table.clear()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> DependenciesService {
        DependenciesService::open(&DeviceDatabase::open_in_memory()).unwrap()
    }

    fn keys(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn blocked_until_operation_done() {
        let deps = service();
        deps.add_dependencies(
            "trails",
            "t1#a",
            Operation::Create,
            vec![DependencyTarget::new("tracks", "k1#a", Operation::Create)],
        )
        .unwrap();

        let items = keys(&["t1#a", "t2#a"]);
        assert_eq!(deps.can_do("trails", Operation::Create, &items).unwrap(), keys(&["t2#a"]));
        assert_eq!(deps.can_do("trails", Operation::Update, &items).unwrap(), items);

        deps.operation_done("tracks", Operation::Update, &keys(&["k1#a"])).unwrap();
        assert_eq!(deps.can_do("trails", Operation::Create, &items).unwrap().len(), 1);

        deps.operation_done("tracks", Operation::Create, &keys(&["k1#a"])).unwrap();
        assert_eq!(deps.can_do("trails", Operation::Create, &items).unwrap(), items);
        assert!(deps.pending(None).unwrap().is_empty());
    }

    #[test]
    fn edges_are_merged_without_duplicates() {
        let deps = service();
        let target = DependencyTarget::new("tracks", "k1#a", Operation::Create);
        let other = DependencyTarget::new("tracks", "k2#a", Operation::Create);
        deps.add_dependencies("trails", "t1#a", Operation::Create, vec![target.clone(), target.clone()])
            .unwrap();
        deps.add_dependencies("trails", "t1#a", Operation::Create, vec![target, other])
            .unwrap();
        deps.add_dependencies(
            "trails",
            "t1#a",
            Operation::Delete,
            vec![DependencyTarget::new("photos", "p#a", Operation::Delete)],
        )
        .unwrap();

        let records = deps.pending(Some("trails")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "trails;t1#a");
        assert_eq!(records[0].operations.len(), 2);
        assert_eq!(records[0].operations[0].dependencies.len(), 2);
    }

    #[test]
    fn server_delete_purges_every_edge() {
        let deps = service();
        deps.add_dependencies(
            "trails",
            "t1#a",
            Operation::Update,
            vec![
                DependencyTarget::new("tracks", "k1#a", Operation::Create),
                DependencyTarget::new("tags", "g#a", Operation::Create),
            ],
        )
        .unwrap();
        deps.add_dependencies(
            "tracks",
            "k1#a",
            Operation::Create,
            vec![DependencyTarget::new("tags", "g#a", Operation::Create)],
        )
        .unwrap();

        deps.operation_done("tracks", Operation::Delete, &keys(&["k1#a"])).unwrap();

        let records = deps.pending(None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "trails;t1#a");
        assert_eq!(
            records[0].operations[0].dependencies,
            vec![DependencyTarget::new("tags", "g#a", Operation::Create)]
        );
    }

    #[test]
    fn event_gates_are_in_memory() {
        let deps = service();
        deps.add_event_dependency("trails", "t1#a", Operation::Create, "copy-42");
        let items = keys(&["t1#a"]);
        assert!(deps.can_do("trails", Operation::Create, &items).unwrap().is_empty());
        assert_eq!(deps.can_do("trails", Operation::Delete, &items).unwrap(), items);

        deps.fire_event("copy-42");
        assert_eq!(deps.can_do("trails", Operation::Create, &items).unwrap(), items);
    }

    #[test]
    fn ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = DeviceDatabase::open(dir.path()).unwrap();
            let deps = DependenciesService::open(&db).unwrap();
            deps.add_dependencies(
                "trails",
                "t1#a",
                Operation::Create,
                vec![DependencyTarget::new("tracks", "k#a", Operation::Create)],
            )
            .unwrap();
            deps.add_event_dependency("trails", "t2#a", Operation::Create, "evt");
            db.close();
        }
        let db = DeviceDatabase::open(dir.path()).unwrap();
        let deps = DependenciesService::open(&db).unwrap();
        let items = keys(&["t1#a", "t2#a"]);
        assert_eq!(deps.can_do("trails", Operation::Create, &items).unwrap(), keys(&["t2#a"]));
        deps.clear().unwrap();
        assert!(deps.pending(None).unwrap().is_empty());
    }

    #[test]
    fn concurrent_writers_keep_every_edge() {
        let deps = Arc::new(service());
        let rounds = 200;

        let adder = {
            let deps = Arc::clone(&deps);
            std::thread::spawn(move || {
                for i in 0..rounds {
                    deps.add_dependencies(
                        "trails",
                        "t1#a",
                        Operation::Create,
                        vec![DependencyTarget::new("tracks", format!("k{i}#a"), Operation::Create)],
                    )
                    .unwrap();
                }
            })
        };
        let churner = {
            let deps = Arc::clone(&deps);
            std::thread::spawn(move || {
                for i in 0..rounds {
                    deps.add_dependencies(
                        "trails",
                        "t1#a",
                        Operation::Update,
                        vec![DependencyTarget::new("photos", format!("p{i}#a"), Operation::Create)],
                    )
                    .unwrap();
                    deps.operation_done("photos", Operation::Create, &[format!("p{i}#a")])
                        .unwrap();
                }
            })
        };
        adder.join().unwrap();
        churner.join().unwrap();

        let records = deps.pending(Some("trails")).unwrap();
        assert_eq!(records.len(), 1);
        let creates = records[0]
            .operations
            .iter()
            .find(|o| o.operation == Operation::Create)
            .unwrap();
        assert_eq!(creates.dependencies.len(), rounds);
        assert!(records[0].operations.iter().all(|o| o.operation != Operation::Update));
    }

    #[test]
    fn record_json_shape() {
        let record = DependencyRecord {
            key: "trails;t1#a".into(),
            operations: vec![OperationDependencies {
                operation: Operation::Create,
                dependencies: vec![DependencyTarget::new("tracks", "k#a", Operation::Create)],
            }],
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["operations"][0]["operation"], "create");
        assert_eq!(json["operations"][0]["dependencies"][0]["storeName"], "tracks");
        assert_eq!(json["operations"][0]["dependencies"][0]["itemKey"], "k#a");
    }
}
