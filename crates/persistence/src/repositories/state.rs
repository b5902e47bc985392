//! State repository: the SQLite-backed `StateStore`.

use chrono::Utc;
use sqlx::SqlitePool;

use domain::errors::StoreError;
use domain::services::StateStore;

use crate::entities::KvEntryEntity;
use crate::metrics::QueryTimer;

/// Repository for key/value state operations.
#[derive(Clone)]
pub struct StateRepository {
    pool: SqlitePool,
}

impl StateRepository {
    /// Creates a new StateRepository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fetches a row by key.
    pub async fn find(&self, key: &str) -> Result<Option<KvEntryEntity>, sqlx::Error> {
        let timer = QueryTimer::new("kv_find");
        let result = sqlx::query_as::<_, KvEntryEntity>(
            r#"
            SELECT key, value, updated_at
            FROM kv_store
            WHERE key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Inserts or replaces the value stored under `key`.
    pub async fn upsert(&self, key: &str, value: &str) -> Result<(), sqlx::Error> {
        let timer = QueryTimer::new("kv_upsert");
        let result = sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;
        timer.record();
        result.map(|_| ())
    }

    /// Deletes the row for `key`. Returns true when a row was removed.
    pub async fn delete(&self, key: &str) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("kv_delete");
        let result = sqlx::query("DELETE FROM kv_store WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await;
        timer.record();
        result.map(|r| r.rows_affected() > 0)
    }

    /// Cheap connectivity probe used by the health endpoint.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map(|_| ())
    }
}

fn store_error(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[async_trait::async_trait]
impl StateStore for StateRepository {
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.find(key)
            .await
            .map(|row| row.map(|r| r.value))
            .map_err(store_error)
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.upsert(key, value).await.map_err(store_error)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.delete(key).await.map(|_| ()).map_err(store_error)
    }
}
