#![allow(dead_code)]

use async_trait::async_trait;
use lms_sync::application::ports::{ApiAck, RemoteApi};
use lms_sync::application::services::{ResourceCoordinator, ResourceStore};
use lms_sync::domain::entities::{Entity, Page, RequestBody};
use lms_sync::domain::value_objects::{CollectionName, PageRequest};
use lms_sync::shared::config::AppConfig;
use lms_sync::shared::error::MutationError;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(String),
    Update(String, Option<i64>),
    Delete(String, i64),
    Reorder(String),
}

/// Scriptable `RemoteApi`: writes succeed with increasing ids unless a
/// failure is queued, and every call can be delayed.
pub struct FakeApi {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<VecDeque<MutationError>>,
    delay: Duration,
    next_id: AtomicI64,
    listing: Mutex<Vec<Entity>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            delay,
            next_id: AtomicI64::new(100),
            listing: Mutex::new(Vec::new()),
        }
    }

    pub async fn fail_next(&self, error: MutationError) {
        self.failures.lock().await.push_back(error);
    }

    pub async fn set_listing(&self, entities: Vec<Entity>) {
        *self.listing.lock().await = entities;
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    async fn write(&self, call: Call) -> Result<ApiAck, MutationError> {
        self.calls.lock().await.push(call);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = self.failures.lock().await.pop_front() {
            return Err(error);
        }
        Ok(ApiAck {
            id: Some(self.next_id.fetch_add(1, Ordering::SeqCst)),
            message: None,
        })
    }
}

#[async_trait]
impl RemoteApi for FakeApi {
    async fn list(
        &self,
        _collection: &CollectionName,
        page: PageRequest,
    ) -> Result<Page<Entity>, MutationError> {
        let listing = self.listing.lock().await.clone();
        let total = listing.len() as u64;
        let items = listing
            .into_iter()
            .skip(((page.page - 1) * page.take) as usize)
            .take(page.take as usize)
            .collect();
        Ok(Page::new(items, total))
    }

    async fn fetch(&self, collection: &CollectionName, id: i64) -> Result<Entity, MutationError> {
        self.listing
            .lock()
            .await
            .iter()
            .find(|entity| entity.key.server_id() == Some(id))
            .cloned()
            .ok_or_else(|| MutationError::rejection(Some(404), Some(format!("{collection} {id}"))))
    }

    async fn create(
        &self,
        collection: &CollectionName,
        _body: RequestBody,
    ) -> Result<ApiAck, MutationError> {
        self.write(Call::Create(collection.to_string())).await
    }

    async fn update(
        &self,
        collection: &CollectionName,
        id: Option<i64>,
        _body: RequestBody,
    ) -> Result<ApiAck, MutationError> {
        self.write(Call::Update(collection.to_string(), id)).await
    }

    async fn delete(
        &self,
        collection: &CollectionName,
        id: i64,
        _body: Option<Value>,
    ) -> Result<ApiAck, MutationError> {
        self.write(Call::Delete(collection.to_string(), id)).await
    }

    async fn reorder(
        &self,
        collection: &CollectionName,
        _body: Value,
    ) -> Result<ApiAck, MutationError> {
        self.write(Call::Reorder(collection.to_string())).await
    }
}

pub fn coordinator_with(api: Arc<FakeApi>) -> ResourceCoordinator {
    ResourceCoordinator::new(
        Arc::new(ResourceStore::new()),
        api,
        &AppConfig::default().mutation,
        "az",
    )
}

pub fn collection(name: &str) -> CollectionName {
    CollectionName::new(name).unwrap()
}
