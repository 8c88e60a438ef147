use crate::domain::entities::MutationRecord;
use crate::domain::value_objects::{MutationId, MutationStatus};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

struct JournalState {
    pending: HashMap<MutationId, MutationRecord>,
    settled: LruCache<MutationId, MutationRecord>,
}

/// Bookkeeping for mutations: every pending one, plus the most recently
/// settled ones so failures can be inspected and retried.
pub struct MutationJournal {
    state: Mutex<JournalState>,
}

impl MutationJournal {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(JournalState {
                pending: HashMap::new(),
                settled: LruCache::new(capacity),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JournalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin(&self, record: MutationRecord) {
        self.lock().pending.insert(record.id, record);
    }

    /// Edits a record that is still pending.
    pub fn update<F>(&self, id: MutationId, update: F) -> bool
    where
        F: FnOnce(&mut MutationRecord),
    {
        match self.lock().pending.get_mut(&id) {
            Some(record) => {
                update(record);
                true
            }
            None => false,
        }
    }

    /// Moves a record into the settled cache. `update` is expected to put it
    /// in a terminal state.
    pub fn settle<F>(&self, id: MutationId, update: F) -> Option<MutationRecord>
    where
        F: FnOnce(&mut MutationRecord),
    {
        let mut state = self.lock();
        let mut record = state.pending.remove(&id)?;
        update(&mut record);
        tracing::debug!(
            target: "sync::coordinator",
            mutation = %id,
            kind = %record.kind,
            status = ?record.status,
            "mutation settled"
        );
        state.settled.put(id, record.clone());
        Some(record)
    }

    pub fn get(&self, id: MutationId) -> Option<MutationRecord> {
        let mut state = self.lock();
        if let Some(record) = state.pending.get(&id) {
            return Some(record.clone());
        }
        state.settled.get(&id).cloned()
    }

    pub fn pending(&self) -> Vec<MutationRecord> {
        let mut records: Vec<_> = self.lock().pending.values().cloned().collect();
        records.sort_by_key(|record| record.created_at);
        records
    }

    pub fn failed(&self) -> Vec<MutationRecord> {
        let mut records: Vec<_> = self
            .lock()
            .settled
            .iter()
            .filter(|(_, record)| record.status == MutationStatus::Failed)
            .map(|(_, record)| record.clone())
            .collect();
        records.sort_by_key(|record| record.created_at);
        records
    }

    /// Drops a settled record, e.g. once its error has been shown.
    pub fn acknowledge(&self, id: MutationId) -> bool {
        self.lock().settled.pop(&id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::{CollectionName, EntityKey, MutationKind};
    use serde_json::json;

    fn record() -> MutationRecord {
        MutationRecord::new(
            CollectionName::new("course").unwrap(),
            EntityKey::Server(1),
            MutationKind::Update,
            json!({"name": "Renamed"}),
            None,
        )
    }

    #[test]
    fn pending_records_move_to_settled_once_terminal() {
        let journal = MutationJournal::new(4);
        let record = record();
        let id = record.id;
        journal.begin(record);
        assert_eq!(journal.pending().len(), 1);

        let settled = journal
            .settle(id, |r| r.fail("offline".to_string(), true))
            .unwrap();
        assert_eq!(settled.status, MutationStatus::Failed);
        assert!(journal.pending().is_empty());
        assert_eq!(journal.failed().len(), 1);
        assert_eq!(journal.get(id).unwrap().error_message.as_deref(), Some("offline"));

        assert!(journal.acknowledge(id));
        assert!(journal.get(id).is_none());
    }

    #[test]
    fn settled_cache_is_bounded() {
        let journal = MutationJournal::new(2);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let record = record();
            ids.push(record.id);
            journal.begin(record);
        }
        for id in &ids {
            journal.settle(*id, |r| r.confirm(EntityKey::Server(1)));
        }

        assert!(journal.get(ids[0]).is_none());
        assert!(journal.get(ids[2]).is_some());
    }

    #[test]
    fn settling_unknown_id_is_none() {
        let journal = MutationJournal::new(1);
        assert!(journal.settle(MutationId::generate(), |_| {}).is_none());
        assert!(!journal.update(MutationId::generate(), |_| {}));
    }

    #[test]
    fn update_edits_pending_records_only() {
        let journal = MutationJournal::new(2);
        let record = record();
        let id = record.id;
        journal.begin(record);

        assert!(journal.update(id, |r| r.retry_count = 2));
        assert_eq!(journal.get(id).unwrap().retry_count, 2);

        journal.settle(id, |r| r.confirm(EntityKey::Server(1)));
        assert!(!journal.update(id, |r| r.retry_count = 3));
    }
}
