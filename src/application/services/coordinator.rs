use super::mutation_journal::MutationJournal;
use super::mutation_queue::{MutationQueue, MutationTicket};
use super::optimistic::PatchApplier;
use super::resource_store::ResourceStore;
use crate::application::ports::{ApiAck, RemoteApi};
use crate::domain::entities::{
    Entity, FilePart, InversePatch, MutationRecord, Page, Patch, PatchOp, RequestBody,
};
use crate::domain::value_objects::{
    CollectionName, EntityKey, MutationId, MutationKind, MutationPolicy, MutationStatus,
    PageRequest, ResourceStatus, StatusScope,
};
use crate::shared::config::MutationConfig;
use crate::shared::error::{AppError, MutationError};
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// Caller's view of a submitted mutation. Dropping it detaches the caller;
/// the mutation still settles and commits to the store.
#[derive(Debug)]
pub struct MutationHandle {
    id: MutationId,
    key: EntityKey,
    ticket: MutationTicket<EntityKey>,
}

impl MutationHandle {
    pub fn id(&self) -> MutationId {
        self.id
    }

    /// Key of the optimistic entry (a temp key for creates).
    pub fn key(&self) -> EntityKey {
        self.key
    }

    /// Resolves to the confirmed key once the store has been committed or
    /// rolled back.
    pub async fn outcome(self) -> Result<EntityKey, MutationError> {
        self.ticket.outcome().await
    }
}

#[derive(Debug, Clone)]
enum Intent {
    Create {
        fields: Map<String, Value>,
        files: Vec<FilePart>,
    },
    Update {
        fields: Map<String, Value>,
        files: Vec<FilePart>,
    },
    Delete {
        body: Option<Value>,
    },
    Reorder {
        keys: Vec<EntityKey>,
        order_field: String,
    },
}

impl Intent {
    fn kind(&self) -> MutationKind {
        match self {
            Intent::Create { .. } => MutationKind::Create,
            Intent::Update { .. } => MutationKind::Update,
            Intent::Delete { .. } => MutationKind::Delete,
            Intent::Reorder { .. } => MutationKind::Reorder,
        }
    }

    fn payload(&self) -> Value {
        match self {
            Intent::Create { fields, .. } | Intent::Update { fields, .. } => {
                Value::Object(fields.clone())
            }
            Intent::Delete { body } => body.clone().unwrap_or(Value::Null),
            Intent::Reorder { keys, order_field } => json!({
                "keys": keys,
                "orderField": order_field,
            }),
        }
    }

    fn body(&self) -> Option<RequestBody> {
        match self {
            Intent::Create { fields, files } | Intent::Update { fields, files } => {
                Some(RequestBody::from_fields(fields, files.clone()))
            }
            Intent::Delete { body } => body.clone().map(RequestBody::Json),
            Intent::Reorder { .. } => None,
        }
    }

    /// Entities besides the target whose lanes the mutation holds.
    fn touched(&self) -> Vec<EntityKey> {
        match self {
            Intent::Reorder { keys, .. } => keys.clone(),
            _ => Vec::new(),
        }
    }

    fn patch(
        &self,
        collection: &CollectionName,
        target: EntityKey,
        queue: &MutationQueue,
    ) -> Patch {
        let op = match self {
            Intent::Create { fields, .. } => PatchOp::Insert {
                entity: Entity::new(target, fields.clone()),
            },
            Intent::Update { fields, .. } => PatchOp::Merge {
                key: target,
                fields: fields.clone(),
            },
            Intent::Delete { .. } => PatchOp::Remove { key: target },
            Intent::Reorder { keys, order_field } => PatchOp::Reorder {
                keys: keys.iter().map(|key| queue.resolve(*key)).collect(),
                order_field: order_field.clone(),
            },
        };
        Patch::new(collection.clone(), op)
    }

    /// Rebuilds the intent of a failed record for a retry.
    fn from_record(record: &MutationRecord) -> Option<Self> {
        let files = match &record.body {
            Some(RequestBody::Multipart(form)) => form.files.clone(),
            _ => Vec::new(),
        };
        match (record.kind, &record.payload) {
            (MutationKind::Create, Value::Object(fields)) => Some(Intent::Create {
                fields: fields.clone(),
                files,
            }),
            (MutationKind::Update, Value::Object(fields)) => Some(Intent::Update {
                fields: fields.clone(),
                files,
            }),
            (MutationKind::Delete, Value::Null) => Some(Intent::Delete { body: None }),
            (MutationKind::Delete, body) => Some(Intent::Delete {
                body: Some(body.clone()),
            }),
            _ => None,
        }
    }
}

/// Entry point for reads and writes against the remote API. Reads reconcile
/// into the store; writes go through the queue with an optimistic patch and
/// always roll back before a failure reaches the caller.
pub struct ResourceCoordinator {
    store: Arc<ResourceStore>,
    applier: PatchApplier,
    queue: MutationQueue,
    api: Arc<dyn RemoteApi>,
    journal: Arc<MutationJournal>,
    max_retries: u32,
    language: String,
}

impl ResourceCoordinator {
    pub fn new(
        store: Arc<ResourceStore>,
        api: Arc<dyn RemoteApi>,
        config: &MutationConfig,
        language: impl Into<String>,
    ) -> Self {
        Self {
            applier: PatchApplier::new(store.clone()),
            store,
            queue: MutationQueue::new(config.timeout()),
            api,
            journal: Arc::new(MutationJournal::new(config.journal_capacity)),
            max_retries: config.max_retries,
            language: language.into(),
        }
    }

    pub fn store(&self) -> &Arc<ResourceStore> {
        &self.store
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn journal(&self) -> &MutationJournal {
        &self.journal
    }

    /// Loads one page into the store. Entities with a mutation in flight keep
    /// their optimistic state.
    pub async fn fetch_page(
        &self,
        collection: &CollectionName,
        page: PageRequest,
    ) -> Result<Page<Entity>, AppError> {
        self.store
            .set_status(collection, StatusScope::Collection, ResourceStatus::Loading);

        match self.api.list(collection, page).await {
            Ok(listing) => {
                for entity in &listing.items {
                    if self.queue.in_flight(entity.key) > 0 {
                        tracing::debug!(
                            target: "sync::coordinator",
                            collection = %collection,
                            key = %entity.key,
                            "kept optimistic entry over listing"
                        );
                        continue;
                    }
                    self.store.reconcile(collection, entity.clone());
                }
                self.store.record_total(collection, listing.total_count);
                self.store
                    .set_status(collection, StatusScope::Collection, ResourceStatus::Success);
                tracing::info!(
                    target: "sync::coordinator",
                    collection = %collection,
                    page = page.page,
                    items = listing.items.len(),
                    total = listing.total_count,
                    "fetched page"
                );
                Ok(listing)
            }
            Err(err) => {
                self.store.set_status(
                    collection,
                    StatusScope::Collection,
                    ResourceStatus::Error(err.to_string()),
                );
                tracing::warn!(
                    target: "sync::coordinator",
                    collection = %collection,
                    error = %err,
                    "failed to fetch page"
                );
                Err(err.into())
            }
        }
    }

    pub async fn fetch_one(
        &self,
        collection: &CollectionName,
        id: i64,
    ) -> Result<Entity, AppError> {
        let key = EntityKey::Server(id);
        self.store
            .set_status(collection, StatusScope::Entity(key), ResourceStatus::Loading);

        match self.api.fetch(collection, id).await {
            Ok(entity) => {
                self.store.reconcile(collection, entity.clone());
                self.store
                    .set_status(collection, StatusScope::Entity(key), ResourceStatus::Success);
                Ok(self.store.get(collection, &key).unwrap_or(entity))
            }
            Err(err) => {
                self.store.set_status(
                    collection,
                    StatusScope::Entity(key),
                    ResourceStatus::Error(err.to_string()),
                );
                Err(err.into())
            }
        }
    }

    /// Inserts the entity under a temp key right away and swaps in the server
    /// id once the create is confirmed.
    pub fn create(
        &self,
        collection: &CollectionName,
        fields: Map<String, Value>,
        files: Vec<FilePart>,
    ) -> MutationHandle {
        let intent = Intent::Create { fields, files };
        let record = self.record(collection, EntityKey::new_temp(), &intent);
        self.submit(record, MutationPolicy::Serialize, intent)
    }

    /// Edits an entity, failing fast with a conflict if another edit of the
    /// same entity is still in flight.
    pub fn update(
        &self,
        collection: &CollectionName,
        key: EntityKey,
        fields: Map<String, Value>,
    ) -> Result<MutationHandle, AppError> {
        self.update_with_policy(
            collection,
            key,
            fields,
            Vec::new(),
            MutationPolicy::RejectOverlapping,
        )
    }

    pub fn update_with_policy(
        &self,
        collection: &CollectionName,
        key: EntityKey,
        fields: Map<String, Value>,
        files: Vec<FilePart>,
        policy: MutationPolicy,
    ) -> Result<MutationHandle, AppError> {
        let key = self.ensure_known(collection, key)?;
        let intent = Intent::Update { fields, files };
        let record = self.record(collection, key, &intent);
        Ok(self.submit(record, policy, intent))
    }

    pub fn delete(
        &self,
        collection: &CollectionName,
        key: EntityKey,
    ) -> Result<MutationHandle, AppError> {
        let key = self.ensure_known(collection, key)?;
        let intent = Intent::Delete { body: None };
        let record = self.record(collection, key, &intent);
        Ok(self.submit(record, MutationPolicy::RejectOverlapping, intent))
    }

    /// Delete for endpoints that expect `{ id, language }` in the body.
    pub fn delete_with_language(
        &self,
        collection: &CollectionName,
        key: EntityKey,
    ) -> Result<MutationHandle, AppError> {
        let key = self.ensure_known(collection, key)?;
        let Some(id) = key.server_id() else {
            return Err(AppError::InvalidInput(format!(
                "{collection} {key} has not been saved yet"
            )));
        };
        let intent = Intent::Delete {
            body: Some(json!({ "id": id, "language": self.language })),
        };
        let record = self.record(collection, key, &intent);
        Ok(self.submit(record, MutationPolicy::RejectOverlapping, intent))
    }

    /// Writes `order_field = index` onto every listed entity as one mutation.
    /// It waits for earlier mutations of the scope and of every listed
    /// entity, and holds their lanes until it settles.
    pub fn reorder(
        &self,
        collection: &CollectionName,
        scope: EntityKey,
        keys: Vec<EntityKey>,
        order_field: impl Into<String>,
    ) -> Result<MutationHandle, AppError> {
        if keys.is_empty() {
            return Err(AppError::InvalidInput("Nothing to reorder".to_string()));
        }
        for key in &keys {
            self.ensure_known(collection, *key)?;
        }
        let intent = Intent::Reorder {
            keys,
            order_field: order_field.into(),
        };
        let record = self.record(collection, scope, &intent);
        Ok(self.submit(record, MutationPolicy::Serialize, intent))
    }

    /// Re-submits a failed create, update or delete whose error was a
    /// transport failure.
    pub fn retry(&self, id: MutationId) -> Result<MutationHandle, AppError> {
        let Some(previous) = self.journal.get(id) else {
            return Err(AppError::NotFound(format!("mutation {id}")));
        };
        if previous.status != MutationStatus::Failed || !previous.retryable {
            return Err(AppError::InvalidInput(format!(
                "mutation {id} cannot be retried"
            )));
        }
        if previous.retry_count >= self.max_retries {
            return Err(AppError::InvalidInput(format!(
                "mutation {id} exhausted its {} retries",
                self.max_retries
            )));
        }
        let Some(intent) = Intent::from_record(&previous) else {
            return Err(AppError::InvalidInput(format!(
                "{} mutations cannot be retried",
                previous.kind
            )));
        };

        let policy = match intent {
            Intent::Create { .. } => MutationPolicy::Serialize,
            _ => MutationPolicy::RejectOverlapping,
        };
        let mut record = self.record(&previous.collection, previous.target, &intent);
        record.retry_count = previous.retry_count + 1;
        self.journal.acknowledge(id);

        tracing::info!(
            target: "sync::coordinator",
            previous = %id,
            mutation = %record.id,
            attempt = record.retry_count,
            "retrying mutation"
        );
        Ok(self.submit(record, policy, intent))
    }

    fn ensure_known(
        &self,
        collection: &CollectionName,
        key: EntityKey,
    ) -> Result<EntityKey, AppError> {
        let resolved = self.queue.resolve(key);
        if self.store.contains(collection, &resolved) {
            Ok(resolved)
        } else {
            Err(AppError::NotFound(format!("{collection} {key}")))
        }
    }

    fn record(
        &self,
        collection: &CollectionName,
        target: EntityKey,
        intent: &Intent,
    ) -> MutationRecord {
        MutationRecord::new(
            collection.clone(),
            target,
            intent.kind(),
            intent.payload(),
            intent.body(),
        )
    }

    fn submit(
        &self,
        record: MutationRecord,
        policy: MutationPolicy,
        intent: Intent,
    ) -> MutationHandle {
        let id = record.id;
        let key = record.target;
        let collection = record.collection.clone();
        self.journal.begin(record);

        let touched = intent.touched();

        let prepare = {
            let applier = self.applier.clone();
            let queue = self.queue.clone();
            let journal = self.journal.clone();
            let collection = collection.clone();
            let intent = intent.clone();
            move |target: EntityKey| -> Result<InversePatch, MutationError> {
                match applier.apply_optimistic(&intent.patch(&collection, target, &queue)) {
                    Ok(inverse) => {
                        journal.update(id, |r| {
                            r.target = target;
                            r.inverse = Some(inverse.clone());
                        });
                        Ok(inverse)
                    }
                    Err(err) => {
                        let err = MutationError::Missing(err.to_string());
                        journal.settle(id, |r| r.fail(err.to_string(), false));
                        Err(err)
                    }
                }
            }
        };

        let dispatch = {
            let api = self.api.clone();
            let queue = self.queue.clone();
            let collection = collection.clone();
            let intent = intent.clone();
            move |target: EntityKey, _inverse: InversePatch| async move {
                send(api.as_ref(), &queue, &collection, target, intent).await
            }
        };

        let settle = {
            let applier = self.applier.clone();
            let queue = self.queue.clone();
            let journal = self.journal.clone();
            move |target: EntityKey,
                  inverse: InversePatch,
                  result: Result<ApiAck, MutationError>|
                  -> Result<EntityKey, MutationError> {
                let confirmed = result.and_then(|ack| {
                    confirm(&applier, &queue, &collection, target, &intent, ack)
                });
                match confirmed {
                    Ok(confirmed_key) => {
                        journal.settle(id, |r| r.confirm(confirmed_key));
                        tracing::info!(
                            target: "sync::coordinator",
                            mutation = %id,
                            collection = %collection,
                            key = %confirmed_key,
                            "mutation confirmed"
                        );
                        Ok(confirmed_key)
                    }
                    Err(err) => {
                        applier.rollback(&inverse, &err.to_string());
                        journal.settle(id, |r| r.fail(err.to_string(), err.is_retryable()));
                        tracing::warn!(
                            target: "sync::coordinator",
                            mutation = %id,
                            collection = %collection,
                            key = %target,
                            error = %err,
                            "mutation failed"
                        );
                        Err(err)
                    }
                }
            }
        };

        let ticket = self
            .queue
            .enqueue_spanning(key, &touched, policy, prepare, dispatch, settle);
        if ticket.was_rejected() {
            let message = MutationError::Conflict(ticket.resource().to_string()).to_string();
            self.journal.settle(id, |r| r.fail(message, false));
        }

        MutationHandle { id, key, ticket }
    }
}

fn server_id(queue: &MutationQueue, key: EntityKey) -> Result<i64, MutationError> {
    queue
        .resolve(key)
        .server_id()
        .ok_or_else(|| MutationError::Missing(format!("{key} has no server id yet")))
}

async fn send(
    api: &dyn RemoteApi,
    queue: &MutationQueue,
    collection: &CollectionName,
    target: EntityKey,
    intent: Intent,
) -> Result<ApiAck, MutationError> {
    match intent {
        Intent::Create { fields, files } => {
            api.create(collection, RequestBody::from_fields(&fields, files))
                .await
        }
        Intent::Update { mut fields, files } => {
            let id = server_id(queue, target)?;
            fields.insert("id".to_string(), Value::from(id));
            api.update(collection, Some(id), RequestBody::from_fields(&fields, files))
                .await
        }
        Intent::Delete { body } => {
            let id = server_id(queue, target)?;
            api.delete(collection, id, body).await
        }
        Intent::Reorder { keys, order_field } => {
            let mut items = Vec::with_capacity(keys.len());
            for (index, key) in keys.iter().enumerate() {
                let mut item = Map::new();
                item.insert("id".to_string(), Value::from(server_id(queue, *key)?));
                item.insert(order_field.clone(), Value::from(index as u64));
                items.push(Value::Object(item));
            }
            api.reorder(collection, json!({ "items": items })).await
        }
    }
}

fn confirm(
    applier: &PatchApplier,
    queue: &MutationQueue,
    collection: &CollectionName,
    target: EntityKey,
    intent: &Intent,
    ack: ApiAck,
) -> Result<EntityKey, MutationError> {
    match intent {
        Intent::Create { fields, .. } => {
            let Some(id) = ack.id else {
                return Err(MutationError::rejection(
                    None,
                    Some("The server did not return an id for the new entity".to_string()),
                ));
            };
            let server_key = EntityKey::Server(id);
            applier.commit(collection, target, Entity::new(server_key, fields.clone()));
            if let EntityKey::Temp(temp) = target {
                queue.retarget(temp, id);
            }
            Ok(server_key)
        }
        Intent::Update { .. } => {
            applier.confirm_in_place(collection, target);
            Ok(target)
        }
        Intent::Delete { .. } => {
            applier.confirm_removal(collection, target);
            Ok(target)
        }
        Intent::Reorder { keys, .. } => {
            for key in keys {
                applier.confirm_in_place(collection, queue.resolve(*key));
            }
            Ok(target)
        }
    }
}
