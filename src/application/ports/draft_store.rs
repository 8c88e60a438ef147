use crate::domain::entities::DraftSnapshot;
use crate::shared::error::AppError;
use async_trait::async_trait;

/// Local persistence for wizard autosave. Never touches the network.
#[async_trait]
pub trait DraftStore: Send + Sync {
    /// Overwrites whatever was stored under `key`.
    async fn save(&self, key: &str, snapshot: &DraftSnapshot) -> Result<(), AppError>;

    async fn load(&self, key: &str) -> Result<Option<DraftSnapshot>, AppError>;

    async fn clear(&self, key: &str) -> Result<(), AppError>;
}
