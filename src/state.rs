use crate::application::ports::{DraftStore, RemoteApi};
use crate::application::services::{ResourceCoordinator, ResourceStore};
use crate::domain::value_objects::AccessToken;
use crate::infrastructure::http::RestApiClient;
use crate::infrastructure::storage::{ConnectionPool, MemoryDraftStore, SqliteDraftStore};
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use std::sync::Arc;

/// Composition root. Everything shared is constructed here and handed out
/// explicitly, so tests can build isolated instances.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<ResourceStore>,
    pub coordinator: Arc<ResourceCoordinator>,
    pub drafts: Arc<dyn DraftStore>,
}

impl AppState {
    pub async fn new(config: AppConfig, token: AccessToken) -> anyhow::Result<Self> {
        config.validate().map_err(AppError::ConfigurationError)?;

        let api: Arc<dyn RemoteApi> = Arc::new(RestApiClient::new(&config.api, token)?);
        let drafts = Self::open_drafts(&config).await?;

        Ok(Self::with_parts(config, api, drafts))
    }

    /// SQLite when autosave is enabled, otherwise a process-local store.
    pub async fn open_drafts(config: &AppConfig) -> anyhow::Result<Arc<dyn DraftStore>> {
        if !config.autosave.enabled {
            return Ok(Arc::new(MemoryDraftStore::new()));
        }
        let pool = ConnectionPool::open(&config.autosave.database_url).await?;
        pool.migrate().await?;
        Ok(Arc::new(SqliteDraftStore::new(pool)))
    }

    pub fn with_parts(
        config: AppConfig,
        api: Arc<dyn RemoteApi>,
        drafts: Arc<dyn DraftStore>,
    ) -> Self {
        let store = Arc::new(ResourceStore::new());
        let coordinator = Arc::new(ResourceCoordinator::new(
            store.clone(),
            api,
            &config.mutation,
            config.api.language.clone(),
        ));
        Self {
            config,
            store,
            coordinator,
            drafts,
        }
    }
}
