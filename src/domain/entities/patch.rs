use super::Entity;
use crate::domain::value_objects::{CollectionName, EntityKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// All entities of one type, keyed by id. At most one entry per key.
pub type EntityCollection = HashMap<EntityKey, Entity>;

/// A tentative change to one collection, applied before the server confirms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub collection: CollectionName,
    pub op: PatchOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum PatchOp {
    Insert { entity: Entity },
    Merge { key: EntityKey, fields: Map<String, Value> },
    Remove { key: EntityKey },
    Reorder { keys: Vec<EntityKey>, order_field: String },
}

/// Prior values of every entry a patch touched, captured when the patch was
/// applied. `None` means the entry did not exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InversePatch {
    pub collection: CollectionName,
    pub prior: Vec<(EntityKey, Option<Entity>)>,
}

impl Patch {
    pub fn new(collection: CollectionName, op: PatchOp) -> Self {
        Self { collection, op }
    }

    /// Applies the change to `entries` and returns what it overwrote. On
    /// error `entries` is left untouched.
    pub fn apply_to(&self, entries: &mut EntityCollection) -> Result<InversePatch, String> {
        let prior = match &self.op {
            PatchOp::Insert { entity } => {
                let previous = entries.insert(entity.key, entity.clone());
                vec![(entity.key, previous)]
            }
            PatchOp::Merge { key, fields } => {
                let current = entries
                    .get_mut(key)
                    .ok_or_else(|| format!("{} {} is not in the store", self.collection, key))?;
                let previous = current.clone();
                current.merge_fields(fields);
                vec![(*key, Some(previous))]
            }
            PatchOp::Remove { key } => {
                let previous = entries
                    .remove(key)
                    .ok_or_else(|| format!("{} {} is not in the store", self.collection, key))?;
                vec![(*key, Some(previous))]
            }
            PatchOp::Reorder { keys, order_field } => {
                if let Some(missing) = keys.iter().find(|key| !entries.contains_key(key)) {
                    return Err(format!(
                        "{} {} is not in the store",
                        self.collection, missing
                    ));
                }
                let mut prior = Vec::with_capacity(keys.len());
                for (index, key) in keys.iter().enumerate() {
                    if let Some(current) = entries.get_mut(key) {
                        prior.push((*key, Some(current.clone())));
                        current.set_field(order_field.clone(), Value::from(index as u64));
                    }
                }
                prior
            }
        };

        Ok(InversePatch {
            collection: self.collection.clone(),
            prior,
        })
    }

    pub fn target(&self) -> Option<EntityKey> {
        match &self.op {
            PatchOp::Insert { entity } => Some(entity.key),
            PatchOp::Merge { key, .. } | PatchOp::Remove { key } => Some(*key),
            PatchOp::Reorder { .. } => None,
        }
    }
}

impl InversePatch {
    /// Restores every captured entry. Restoring in reverse order keeps a key
    /// touched twice at its oldest value.
    pub fn restore(&self, entries: &mut EntityCollection) {
        for (key, previous) in self.prior.iter().rev() {
            match previous {
                Some(entity) => {
                    entries.insert(*key, entity.clone());
                }
                None => {
                    entries.remove(key);
                }
            }
        }
    }
}
