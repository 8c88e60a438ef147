use super::{InversePatch, RequestBody};
use crate::domain::value_objects::{
    CollectionName, EntityKey, MutationId, MutationKind, MutationStatus,
};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// One create/update/delete/reorder travelling through the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub id: MutationId,
    pub collection: CollectionName,
    pub target: EntityKey,
    pub kind: MutationKind,
    /// Optimistic field values (or the reorder list) shown to the UI.
    pub payload: Value,
    pub body: Option<RequestBody>,
    pub status: MutationStatus,
    pub inverse: Option<InversePatch>,
    pub retry_count: u32,
    pub retryable: bool,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl MutationRecord {
    pub fn new(
        collection: CollectionName,
        target: EntityKey,
        kind: MutationKind,
        payload: Value,
        body: Option<RequestBody>,
    ) -> Self {
        Self {
            id: MutationId::generate(),
            collection,
            target,
            kind,
            payload,
            body,
            status: MutationStatus::Pending,
            inverse: None,
            retry_count: 0,
            retryable: false,
            created_at: Utc::now(),
            settled_at: None,
            error_message: None,
        }
    }

    pub fn confirm(&mut self, target: EntityKey) {
        self.target = target;
        self.status = MutationStatus::Confirmed;
        self.settled_at = Some(Utc::now());
        self.error_message = None;
    }

    pub fn fail(&mut self, message: String, retryable: bool) {
        self.status = MutationStatus::Failed;
        self.settled_at = Some(Utc::now());
        self.error_message = Some(message);
        self.retryable = retryable;
    }
}
