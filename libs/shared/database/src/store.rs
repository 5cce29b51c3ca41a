use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use shared_models::{AppError, ProfessionalId};

/// A stored document together with its id inside its collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    /// Fails the whole batch with `AppError::Conflict` if the document exists.
    Create { collection: String, id: String, data: Value },
    Set { collection: String, id: String, data: Value },
    /// Deleting a missing document is not an error.
    Delete { collection: String, id: String },
}

impl WriteOp {
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Create { collection, .. }
            | WriteOp::Set { collection, .. }
            | WriteOp::Delete { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            WriteOp::Create { id, .. } | WriteOp::Set { id, .. } | WriteOp::Delete { id, .. } => id,
        }
    }
}

/// Compare-and-set guard: the stored document's `field` must equal `equals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Precondition {
    pub collection: String,
    pub id: String,
    pub field: String,
    pub equals: Value,
}

impl Precondition {
    /// A missing document never satisfies a precondition.
    pub fn holds(&self, stored: Option<&Value>) -> bool {
        stored.and_then(|doc| doc.get(&self.field)) == Some(&self.equals)
    }
}

/// Writes applied all-or-nothing, in order, once every precondition holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preconditions: Vec<Precondition>,
    pub writes: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the batch with `AppError::Conflict` unless `collection/id` still has `field == equals`.
    pub fn require(mut self, collection: &str, id: impl Into<String>, field: &str, equals: Value) -> Self {
        self.preconditions.push(Precondition {
            collection: collection.to_string(),
            id: id.into(),
            field: field.to_string(),
            equals,
        });
        self
    }

    pub fn create(mut self, collection: &str, id: impl Into<String>, data: Value) -> Self {
        self.writes.push(WriteOp::Create {
            collection: collection.to_string(),
            id: id.into(),
            data,
        });
        self
    }

    pub fn set(mut self, collection: &str, id: impl Into<String>, data: Value) -> Self {
        self.writes.push(WriteOp::Set {
            collection: collection.to_string(),
            id: id.into(),
            data,
        });
        self
    }

    pub fn delete(mut self, collection: &str, id: impl Into<String>) -> Self {
        self.writes.push(WriteOp::Delete {
            collection: collection.to_string(),
            id: id.into(),
        });
        self
    }

    pub fn extend(mut self, other: WriteBatch) -> Self {
        self.preconditions.extend(other.preconditions);
        self.writes.extend(other.writes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Events for a committed batch whose last write got `last_sequence`.
    pub fn into_events(self, tenant: &ProfessionalId, last_sequence: u64) -> Vec<ChangeEvent> {
        let first = (last_sequence + 1).saturating_sub(self.writes.len() as u64);
        self.writes
            .into_iter()
            .enumerate()
            .map(|(offset, op)| {
                let (collection, id, change) = match op {
                    WriteOp::Create { collection, id, data } | WriteOp::Set { collection, id, data } => {
                        (collection, id, Change::Upsert(data))
                    }
                    WriteOp::Delete { collection, id } => (collection, id, Change::Delete),
                };
                ChangeEvent {
                    sequence: first + offset as u64,
                    tenant: tenant.clone(),
                    collection,
                    id,
                    change,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Upsert(Value),
    Delete,
}

/// One committed write as observed by subscribers, in server-assigned order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub sequence: u64,
    pub tenant: ProfessionalId,
    pub collection: String,
    pub id: String,
    pub change: Change,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(
        &self,
        tenant: &ProfessionalId,
        collection: &str,
        id: &str,
    ) -> Result<Option<Value>, AppError>;

    async fn list(&self, tenant: &ProfessionalId, collection: &str) -> Result<Vec<Document>, AppError>;

    /// Apply a batch atomically and return the sequence number of its last write.
    /// Writes in one batch receive consecutive sequence numbers.
    async fn commit(&self, tenant: &ProfessionalId, batch: WriteBatch) -> Result<u64, AppError>;

    async fn set(
        &self,
        tenant: &ProfessionalId,
        collection: &str,
        id: &str,
        data: Value,
    ) -> Result<u64, AppError> {
        self.commit(tenant, WriteBatch::new().set(collection, id, data)).await
    }

    async fn delete(&self, tenant: &ProfessionalId, collection: &str, id: &str) -> Result<u64, AppError> {
        self.commit(tenant, WriteBatch::new().delete(collection, id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn batch_serializes_with_op_tag() {
        let batch = WriteBatch::new()
            .create("slot_claims", "2024-01-02T09:00", json!({}))
            .delete("availability_exceptions", "booked-1");

        let value = serde_json::to_value(&batch).unwrap();
        assert_eq!(value["writes"][0]["op"], "create");
        assert_eq!(value["writes"][1]["op"], "delete");
        assert_eq!(value["writes"][1]["id"], "booked-1");
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn preconditions_compare_a_single_field() {
        let batch = WriteBatch::new().require("appointments", "a1", "status", json!("scheduled"));
        let guard = &batch.preconditions[0];

        assert!(guard.holds(Some(&json!({"status": "scheduled", "price": 10}))));
        assert!(!guard.holds(Some(&json!({"status": "canceled"}))));
        assert!(!guard.holds(Some(&json!({}))));
        assert!(!guard.holds(None));
        assert!(batch.is_empty());

        let value = serde_json::to_value(&batch).unwrap();
        assert_eq!(value["preconditions"][0]["field"], "status");
    }

    #[test]
    fn committed_batch_maps_to_consecutive_events() {
        let tenant = ProfessionalId::new("pro-1");
        let events = WriteBatch::new()
            .set("appointments", "a1", json!({"status": "scheduled"}))
            .delete("slot_claims", "2024-01-02T09:00")
            .into_events(&tenant, 7);

        assert_eq!(events[0].sequence, 6);
        assert_eq!(events[1].sequence, 7);
        assert_eq!(events[1].change, Change::Delete);
        assert_eq!(events[0].tenant, tenant);
    }
}
