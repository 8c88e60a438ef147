use crate::domain::entities::{Entity, Page, RequestBody};
use crate::domain::value_objects::{CollectionName, PageRequest};
use crate::shared::error::MutationError;
use async_trait::async_trait;
use serde_json::Value;

/// `{ isSuccess, id?, message? }` acknowledgement of a write, already
/// checked for `isSuccess`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApiAck {
    pub id: Option<i64>,
    pub message: Option<String>,
}

/// The remote CRUD API. Transport failures and rejections both come back as
/// `Err`, so every caller reaches a terminal state.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list(
        &self,
        collection: &CollectionName,
        page: PageRequest,
    ) -> Result<Page<Entity>, MutationError>;

    async fn fetch(&self, collection: &CollectionName, id: i64) -> Result<Entity, MutationError>;

    async fn create(
        &self,
        collection: &CollectionName,
        body: RequestBody,
    ) -> Result<ApiAck, MutationError>;

    /// `PUT /{resource}/{id}` when `id` is given, else `PUT /{resource}`.
    async fn update(
        &self,
        collection: &CollectionName,
        id: Option<i64>,
        body: RequestBody,
    ) -> Result<ApiAck, MutationError>;

    async fn delete(
        &self,
        collection: &CollectionName,
        id: i64,
        body: Option<Value>,
    ) -> Result<ApiAck, MutationError>;

    async fn reorder(
        &self,
        collection: &CollectionName,
        body: Value,
    ) -> Result<ApiAck, MutationError>;
}
