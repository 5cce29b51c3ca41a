use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use shared_models::{AppError, ProfessionalId};

use crate::store::{ChangeEvent, Document, DocumentStore, WriteBatch, WriteOp};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Default)]
struct Inner {
    tenants: HashMap<ProfessionalId, Collections>,
    sequence: u64,
}

/// In-process document store with atomic batches and an ordered change feed.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<ChangeEvent>,
    failing_collections: Mutex<HashSet<String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            events,
            failing_collections: Mutex::new(HashSet::new()),
        }
    }

    /// Receive every committed write, across tenants, in commit order.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Make every batch touching `collection` fail with a database error.
    pub fn inject_failure(&self, collection: &str) {
        self.failing_collections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(collection.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_collections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub async fn count(&self, tenant: &ProfessionalId, collection: &str) -> usize {
        let inner = self.inner.read().await;
        inner
            .tenants
            .get(tenant)
            .and_then(|collections| collections.get(collection))
            .map_or(0, |docs| docs.len())
    }

    fn check_injected_failure(&self, batch: &WriteBatch) -> Result<(), AppError> {
        let failing = self.failing_collections.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(op) = batch.writes.iter().find(|op| failing.contains(op.collection())) {
            warn!("Injected failure for collection {}", op.collection());
            return Err(AppError::Database(format!(
                "write to {} unavailable",
                op.collection()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(
        &self,
        tenant: &ProfessionalId,
        collection: &str,
        id: &str,
    ) -> Result<Option<Value>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenants
            .get(tenant)
            .and_then(|collections| collections.get(collection))
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn list(&self, tenant: &ProfessionalId, collection: &str) -> Result<Vec<Document>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .tenants
            .get(tenant)
            .and_then(|collections| collections.get(collection))
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document { id: id.clone(), data: data.clone() })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn commit(&self, tenant: &ProfessionalId, batch: WriteBatch) -> Result<u64, AppError> {
        self.check_injected_failure(&batch)?;

        let mut inner = self.inner.write().await;
        let collections = inner.tenants.entry(tenant.clone()).or_default();

        // Validate every precondition before touching anything.
        for guard in &batch.preconditions {
            let stored = collections
                .get(&guard.collection)
                .and_then(|docs| docs.get(&guard.id));
            if !guard.holds(stored) {
                debug!(
                    "Precondition failed for {}/{}: {} != {}",
                    guard.collection, guard.id, guard.field, guard.equals
                );
                return Err(AppError::Conflict(format!(
                    "{}/{} no longer has {} = {}",
                    guard.collection, guard.id, guard.field, guard.equals
                )));
            }
        }

        for op in &batch.writes {
            if let WriteOp::Create { collection, id, .. } = op {
                let exists = collections
                    .get(collection)
                    .is_some_and(|docs| docs.contains_key(id));
                let repeated = batch
                    .writes
                    .iter()
                    .filter(|other| matches!(other, WriteOp::Create { .. }))
                    .filter(|other| other.collection() == collection && other.id() == id)
                    .count()
                    > 1;
                if exists || repeated {
                    debug!("Create precondition failed for {}/{}", collection, id);
                    return Err(AppError::Conflict(format!("{}/{} already exists", collection, id)));
                }
            }
        }

        for op in &batch.writes {
            match op {
                WriteOp::Create { collection, id, data } | WriteOp::Set { collection, id, data } => {
                    collections
                        .entry(collection.clone())
                        .or_default()
                        .insert(id.clone(), data.clone());
                }
                WriteOp::Delete { collection, id } => {
                    if let Some(docs) = collections.get_mut(collection) {
                        docs.remove(id);
                    }
                }
            }
        }

        inner.sequence += batch.len() as u64;
        for event in batch.into_events(tenant, inner.sequence) {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }

        Ok(inner.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Change;
    use serde_json::json;

    fn tenant() -> ProfessionalId {
        ProfessionalId::new("pro-1")
    }

    #[tokio::test]
    async fn create_conflict_rolls_back_whole_batch() {
        let store = MemoryStore::new();
        store
            .commit(&tenant(), WriteBatch::new().create("slot_claims", "a", json!({})))
            .await
            .unwrap();

        let result = store
            .commit(
                &tenant(),
                WriteBatch::new()
                    .set("appointments", "x", json!({"status": "scheduled"}))
                    .create("slot_claims", "a", json!({})),
            )
            .await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(store.get(&tenant(), "appointments", "x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn stale_precondition_rejects_whole_batch() {
        let store = MemoryStore::new();
        store
            .set(&tenant(), "appointments", "a1", json!({"status": "canceled"}))
            .await
            .unwrap();
        let mut rx = store.subscribe();

        let result = store
            .commit(
                &tenant(),
                WriteBatch::new()
                    .require("appointments", "a1", "status", json!("scheduled"))
                    .set("appointments", "a1", json!({"status": "confirmed"}))
                    .delete("slot_claims", "2024-01-01T09:00"),
            )
            .await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(
            store.get(&tenant(), "appointments", "a1").await.unwrap(),
            Some(json!({"status": "canceled"}))
        );
        assert!(rx.try_recv().is_err());

        let applied = store
            .commit(
                &tenant(),
                WriteBatch::new()
                    .require("appointments", "a1", "status", json!("canceled"))
                    .set("appointments", "a1", json!({"status": "canceled", "paymentStatus": "paid"})),
            )
            .await;
        assert_eq!(applied, Ok(2));
    }

    #[tokio::test]
    async fn events_are_published_in_order() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();

        store
            .commit(
                &tenant(),
                WriteBatch::new()
                    .set("clients", "c1", json!({"name": "Ana"}))
                    .delete("clients", "c0"),
            )
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(first.id, "c1");
        assert_eq!(second.sequence, 2);
        assert_eq!(second.change, Change::Delete);
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let store = MemoryStore::new();
        store.set(&tenant(), "clients", "c1", json!({})).await.unwrap();

        let other = ProfessionalId::new("pro-2");
        assert!(store.list(&other, "clients").await.unwrap().is_empty());
        assert_eq!(store.count(&tenant(), "clients").await, 1);
    }

    #[tokio::test]
    async fn injected_failure_blocks_matching_batches() {
        let store = MemoryStore::new();
        store.inject_failure("clients");

        let result = store.set(&tenant(), "clients", "c1", json!({})).await;
        assert!(matches!(result, Err(AppError::Database(_))));

        store.clear_failures();
        assert!(store.set(&tenant(), "clients", "c1", json!({})).await.is_ok());
    }
}
