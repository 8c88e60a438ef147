use crate::domain::entities::{Entity, EntityCollection, InversePatch, Patch};
use crate::domain::value_objects::{CollectionName, EntityKey, ResourceStatus, StatusScope};
use crate::shared::error::AppError;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct CollectionState {
    entries: EntityCollection,
    entity_status: HashMap<EntityKey, ResourceStatus>,
    collection_status: ResourceStatus,
    total_count: Option<u64>,
}

/// Normalized in-memory cache of entities, one collection per entity type.
///
/// Every write happens under a single lock acquisition, so readers never see
/// a half-applied change.
#[derive(Debug, Default)]
pub struct ResourceStore {
    collections: RwLock<HashMap<CollectionName, CollectionState>>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<CollectionName, CollectionState>> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CollectionName, CollectionState>> {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// `None` is the not-found sentinel; callers branch on it explicitly.
    pub fn get(&self, collection: &CollectionName, key: &EntityKey) -> Option<Entity> {
        self.read()
            .get(collection)
            .and_then(|state| state.entries.get(key))
            .cloned()
    }

    pub fn contains(&self, collection: &CollectionName, key: &EntityKey) -> bool {
        self.read()
            .get(collection)
            .is_some_and(|state| state.entries.contains_key(key))
    }

    /// Entities of a collection ordered by key.
    pub fn list(&self, collection: &CollectionName) -> Vec<Entity> {
        let guard = self.read();
        let Some(state) = guard.get(collection) else {
            return Vec::new();
        };
        let mut entities: Vec<Entity> = state.entries.values().cloned().collect();
        entities.sort_by_key(|entity| entity.key);
        entities
    }

    pub fn len(&self, collection: &CollectionName) -> usize {
        self.read()
            .get(collection)
            .map_or(0, |state| state.entries.len())
    }

    pub fn is_empty(&self, collection: &CollectionName) -> bool {
        self.len(collection) == 0
    }

    /// Copy of a whole collection, for comparing store states.
    pub fn snapshot(&self, collection: &CollectionName) -> EntityCollection {
        self.read()
            .get(collection)
            .map(|state| state.entries.clone())
            .unwrap_or_default()
    }

    /// Inserts or replaces by key. An entity carrying an origin key replaces
    /// that entry in the same step, so the temp key and the server key never
    /// coexist.
    pub fn upsert(&self, collection: &CollectionName, mut entity: Entity) {
        let origin = entity.origin.take();
        let mut guard = self.write();
        let state = guard.entry(collection.clone()).or_default();

        if let Some(origin) = origin
            && origin != entity.key
        {
            state.entries.remove(&origin);
            if let Some(status) = state.entity_status.remove(&origin) {
                state.entity_status.insert(entity.key, status);
            }
            tracing::debug!(
                target: "sync::store",
                collection = %collection,
                from = %origin,
                to = %entity.key,
                "renamed entity key"
            );
        }

        state.entries.insert(entity.key, entity);
    }

    /// Like `upsert`, but keeps an already stored entry whose version is
    /// strictly newer. Returns whether the incoming entity was applied. A
    /// discarded entity still retires its origin key.
    pub fn reconcile(&self, collection: &CollectionName, mut entity: Entity) -> bool {
        let origin = entity.origin.take();
        let mut guard = self.write();
        let state = guard.entry(collection.clone()).or_default();

        if let Some(origin) = origin
            && origin != entity.key
        {
            state.entries.remove(&origin);
            if let Some(status) = state.entity_status.remove(&origin) {
                state.entity_status.insert(entity.key, status);
            }
        }

        if let Some(existing) = state.entries.get(&entity.key)
            && existing.version > entity.version
        {
            tracing::debug!(
                target: "sync::store",
                collection = %collection,
                key = %entity.key,
                stored = existing.version,
                incoming = entity.version,
                "discarding stale response"
            );
            return false;
        }

        state.entries.insert(entity.key, entity);
        true
    }

    pub fn remove(&self, collection: &CollectionName, key: &EntityKey) -> Option<Entity> {
        let mut guard = self.write();
        let state = guard.get_mut(collection)?;
        state.entity_status.remove(key);
        state.entries.remove(key)
    }

    pub fn set_status(&self, collection: &CollectionName, scope: StatusScope, status: ResourceStatus) {
        let mut guard = self.write();
        let state = guard.entry(collection.clone()).or_default();
        match scope {
            StatusScope::Collection => state.collection_status = status,
            StatusScope::Entity(key) => {
                state.entity_status.insert(key, status);
            }
        }
    }

    pub fn status(&self, collection: &CollectionName, scope: StatusScope) -> ResourceStatus {
        let guard = self.read();
        let Some(state) = guard.get(collection) else {
            return ResourceStatus::Idle;
        };
        match scope {
            StatusScope::Collection => state.collection_status.clone(),
            StatusScope::Entity(key) => state.entity_status.get(&key).cloned().unwrap_or_default(),
        }
    }

    pub fn record_total(&self, collection: &CollectionName, total_count: u64) {
        let mut guard = self.write();
        guard.entry(collection.clone()).or_default().total_count = Some(total_count);
    }

    pub fn total_count(&self, collection: &CollectionName) -> Option<u64> {
        self.read().get(collection).and_then(|state| state.total_count)
    }

    /// Applies an optimistic patch in one write and returns its inverse.
    pub(crate) fn apply_patch(&self, patch: &Patch) -> Result<InversePatch, AppError> {
        let mut guard = self.write();
        let state = guard.entry(patch.collection.clone()).or_default();
        patch
            .apply_to(&mut state.entries)
            .map_err(AppError::NotFound)
    }

    pub(crate) fn restore(&self, inverse: &InversePatch) {
        let mut guard = self.write();
        let state = guard.entry(inverse.collection.clone()).or_default();
        inverse.restore(&mut state.entries);
    }
}
