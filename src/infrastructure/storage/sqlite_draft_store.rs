use super::connection_pool::ConnectionPool;
use crate::application::ports::DraftStore;
use crate::domain::entities::DraftSnapshot;
use crate::shared::error::AppError;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

/// Autosave snapshots in SQLite, one row per storage key.
#[derive(Clone)]
pub struct SqliteDraftStore {
    pool: ConnectionPool,
}

impl SqliteDraftStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &SqlitePool {
        self.pool.get_pool()
    }
}

#[async_trait]
impl DraftStore for SqliteDraftStore {
    async fn save(&self, key: &str, snapshot: &DraftSnapshot) -> Result<(), AppError> {
        let payload = serde_json::to_string(snapshot)?;
        let current_step = i64::try_from(snapshot.current_step).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO draft_snapshots (storage_key, payload, current_step, saved_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(storage_key) DO UPDATE SET
                payload = excluded.payload,
                current_step = excluded.current_step,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(key)
        .bind(payload)
        .bind(current_step)
        .bind(snapshot.timestamp.timestamp_millis())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<DraftSnapshot>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT payload
            FROM draft_snapshots
            WHERE storage_key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => {
                let payload: String = row.get("payload");
                match serde_json::from_str(&payload) {
                    Ok(snapshot) => Ok(Some(snapshot)),
                    Err(err) => {
                        // an unreadable draft is treated as no draft
                        tracing::warn!(
                            target: "sync::autosave",
                            key,
                            error = %err,
                            "discarding corrupt draft snapshot"
                        );
                        Ok(None)
                    }
                }
            }
            None => Ok(None),
        }
    }

    async fn clear(&self, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM draft_snapshots WHERE storage_key = ?1")
            .bind(key)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn setup_store() -> SqliteDraftStore {
        let pool = ConnectionPool::from_memory().await.unwrap();
        pool.migrate().await.unwrap();
        SqliteDraftStore::new(pool)
    }

    #[tokio::test]
    async fn save_overwrites_and_clear_prunes() {
        let store = setup_store().await;
        assert!(store.load("course_draft").await.unwrap().is_none());

        let first = DraftSnapshot::new(json!({"basicInfo": {"name": "A"}}), json!([]), 0);
        store.save("course_draft", &first).await.unwrap();
        let second = DraftSnapshot::new(json!({"basicInfo": {"name": "B"}}), json!([]), 2);
        store.save("course_draft", &second).await.unwrap();
        // saving the same snapshot again is harmless
        store.save("course_draft", &second).await.unwrap();

        let loaded = store.load("course_draft").await.unwrap().unwrap();
        assert!(loaded.same_content(&second));
        assert_eq!(loaded.current_step, 2);

        store.clear("course_draft").await.unwrap();
        assert!(store.load("course_draft").await.unwrap().is_none());
        store.clear("course_draft").await.unwrap();
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = setup_store().await;
        store
            .save("course_draft", &DraftSnapshot::new(json!({}), json!([]), 1))
            .await
            .unwrap();

        assert!(store.load("badge_draft").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_payload_reads_as_missing() {
        let store = setup_store().await;
        sqlx::query(
            "INSERT INTO draft_snapshots (storage_key, payload, current_step, saved_at) VALUES ('broken', 'not json', 0, 0)",
        )
        .execute(store.pool())
        .await
        .unwrap();

        assert!(store.load("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn persists_across_pools_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("drafts.db").display()
        );

        let pool = ConnectionPool::open(&url).await.unwrap();
        pool.migrate().await.unwrap();
        SqliteDraftStore::new(pool.clone())
            .save("course_draft", &DraftSnapshot::new(json!({"a": 1}), json!([]), 1))
            .await
            .unwrap();
        pool.close().await;

        let reopened = ConnectionPool::open(&url).await.unwrap();
        reopened.migrate().await.unwrap();
        let loaded = SqliteDraftStore::new(reopened)
            .load("course_draft")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.form_data, json!({"a": 1}));
    }
}
