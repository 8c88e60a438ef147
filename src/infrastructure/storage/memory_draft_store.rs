use crate::application::ports::DraftStore;
use crate::domain::entities::DraftSnapshot;
use crate::shared::error::AppError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Process-local draft store, used when autosave persistence is disabled and
/// in tests.
#[derive(Default)]
pub struct MemoryDraftStore {
    snapshots: RwLock<HashMap<String, DraftSnapshot>>,
    saves: AtomicUsize,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn save(&self, key: &str, snapshot: &DraftSnapshot) -> Result<(), AppError> {
        self.snapshots
            .write()
            .await
            .insert(key.to_string(), snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<DraftSnapshot>, AppError> {
        Ok(self.snapshots.read().await.get(key).cloned())
    }

    async fn clear(&self, key: &str) -> Result<(), AppError> {
        self.snapshots.write().await.remove(key);
        Ok(())
    }
}
