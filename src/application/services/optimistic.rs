use super::resource_store::ResourceStore;
use crate::domain::entities::{Entity, InversePatch, Patch};
use crate::domain::value_objects::{CollectionName, EntityKey, ResourceStatus, StatusScope};
use crate::shared::error::AppError;
use std::sync::Arc;

/// Applies tentative changes to the store and later commits or reverts them.
#[derive(Debug, Clone)]
pub struct PatchApplier {
    store: Arc<ResourceStore>,
}

impl PatchApplier {
    pub fn new(store: Arc<ResourceStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ResourceStore> {
        &self.store
    }

    /// The inverse is captured here, against the state the patch actually
    /// overwrote, and is never recomputed later.
    pub fn apply_optimistic(&self, patch: &Patch) -> Result<InversePatch, AppError> {
        let inverse = self.store.apply_patch(patch)?;
        if let Some(target) = patch.target() {
            self.store.set_status(
                &patch.collection,
                StatusScope::Entity(target),
                ResourceStatus::Loading,
            );
        }
        tracing::debug!(
            target: "sync::optimistic",
            collection = %patch.collection,
            touched = inverse.prior.len(),
            "applied optimistic patch"
        );
        Ok(inverse)
    }

    /// Replaces the optimistic entry with the server-confirmed entity in one
    /// store transition. Returns false when a newer version was already held.
    pub fn commit(
        &self,
        collection: &CollectionName,
        optimistic_key: EntityKey,
        server_entity: Entity,
    ) -> bool {
        let confirmed_key = server_entity.key;
        let entity = if optimistic_key != confirmed_key {
            server_entity.replacing(optimistic_key)
        } else {
            server_entity
        };
        let applied = self.store.reconcile(collection, entity);
        self.store.set_status(
            collection,
            StatusScope::Entity(confirmed_key),
            ResourceStatus::Success,
        );
        applied
    }

    /// Marks an optimistic change as confirmed when the server returned no
    /// entity to merge (updates, deletes, reorders).
    pub fn confirm_in_place(&self, collection: &CollectionName, key: EntityKey) {
        if self.store.contains(collection, &key) {
            self.store
                .set_status(collection, StatusScope::Entity(key), ResourceStatus::Success);
        }
    }

    /// Drops what is left of a removed entry (its status flag) once the
    /// server confirmed the delete.
    pub fn confirm_removal(&self, collection: &CollectionName, key: EntityKey) {
        self.store.remove(collection, &key);
    }

    pub fn rollback(&self, inverse: &InversePatch, reason: &str) {
        self.store.restore(inverse);
        for (key, previous) in &inverse.prior {
            if previous.is_some() {
                self.store.set_status(
                    &inverse.collection,
                    StatusScope::Entity(*key),
                    ResourceStatus::Error(reason.to_string()),
                );
            }
        }
        tracing::warn!(
            target: "sync::optimistic",
            collection = %inverse.collection,
            reason,
            "rolled back optimistic patch"
        );
    }
}
