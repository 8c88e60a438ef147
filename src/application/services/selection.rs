use crate::domain::value_objects::EntityKey;
use std::collections::BTreeSet;

/// Ids picked by the user inside one workflow instance (one open modal).
///
/// A set bound to a listing context only accepts ids from that listing.
/// `close` consumes the set, so a later workflow always starts empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    selected: BTreeSet<EntityKey>,
    context: Option<BTreeSet<EntityKey>>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = EntityKey>,
    {
        Self {
            selected: BTreeSet::new(),
            context: Some(keys.into_iter().collect()),
        }
    }

    fn in_context(&self, key: &EntityKey) -> bool {
        self.context
            .as_ref()
            .is_none_or(|context| context.contains(key))
    }

    /// Returns whether `key` is selected afterwards. Adding twice is a no-op.
    pub fn add(&mut self, key: EntityKey) -> bool {
        if !self.in_context(&key) {
            tracing::debug!(target: "sync::selection", key = %key, "ignored id outside listing");
            return false;
        }
        self.selected.insert(key);
        true
    }

    /// Removing an absent id is a no-op.
    pub fn remove(&mut self, key: &EntityKey) {
        self.selected.remove(key);
    }

    /// Returns whether `key` is selected afterwards.
    pub fn toggle(&mut self, key: EntityKey) -> bool {
        if self.selected.remove(&key) {
            false
        } else {
            self.add(key)
        }
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.selected.contains(key)
    }

    pub fn all(&self) -> &BTreeSet<EntityKey> {
        &self.selected
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Server ids of the selection, for request bodies like `userIds`.
    pub fn server_ids(&self) -> Vec<i64> {
        self.selected.iter().filter_map(EntityKey::server_id).collect()
    }

    /// Rebinds to a new listing and drops selected ids that left it.
    pub fn refresh_context<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = EntityKey>,
    {
        let context: BTreeSet<EntityKey> = keys.into_iter().collect();
        self.selected.retain(|key| context.contains(key));
        self.context = Some(context);
    }

    /// Ends the workflow and hands back what was selected.
    pub fn close(mut self) -> BTreeSet<EntityKey> {
        std::mem::take(&mut self.selected)
    }
}
