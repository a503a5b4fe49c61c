//! [`DocumentStore`] over the `documents` table.
//!
//! Every transaction runs at SERIALIZABLE isolation and takes row locks on
//! the documents it reads, so a read-modify-write that races another one
//! fails with a serialization error instead of losing an update. Those
//! errors surface as [`StoreError::Conflict`] and are retried by
//! [`run_transaction`](runlatch_core::store::run_transaction).

use async_trait::async_trait;
use runlatch_core::error::StoreError;
use runlatch_core::paths;
use runlatch_core::store::{Document, DocumentStore, Fields, Transaction};
use runlatch_core::types::Timestamp;
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};

/// Column list for `documents` reads.
const COLUMNS: &str = "path, data, updated_at";

/// SQLSTATE codes that mean "another transaction got there first".
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    path: String,
    data: Json<Map<String, Value>>,
    updated_at: Timestamp,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            path: row.path,
            data: row.data.0,
            update_time: row.updated_at,
        }
    }
}

/// Document store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        // `now()` is fixed for the whole transaction; it is the server
        // timestamp for every sentinel field written through it.
        let now: Timestamp = sqlx::query_scalar("SELECT now()")
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(Box::new(PgTransaction { tx: Some(tx), now }))
    }
}

struct PgTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
    now: Timestamp,
}

impl PgTransaction {
    fn conn(&mut self) -> Result<&mut sqlx::Transaction<'static, Postgres>, StoreError> {
        self.tx.as_mut().ok_or(StoreError::Finished)
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn get(&mut self, path: &str) -> Result<Option<Document>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM documents WHERE path = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, DocumentRow>(&query)
            .bind(path)
            .fetch_optional(&mut **self.conn()?)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Document::from))
    }

    async fn list(&mut self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM documents WHERE collection = $1 ORDER BY path FOR UPDATE"
        );
        let rows = sqlx::query_as::<_, DocumentRow>(&query)
            .bind(collection)
            .fetch_all(&mut **self.conn()?)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Document::from).collect())
    }

    async fn create(&mut self, path: &str, fields: Fields) -> Result<(), StoreError> {
        let now = self.now;
        let result = sqlx::query(
            "INSERT INTO documents (path, collection, data, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4) \
             ON CONFLICT (path) DO NOTHING",
        )
        .bind(path)
        .bind(collection_of(path))
        .bind(Json(fields.to_object(now)))
        .bind(now)
        .execute(&mut **self.conn()?)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }
        Ok(())
    }

    async fn update(&mut self, path: &str, fields: Fields) -> Result<(), StoreError> {
        let now = self.now;
        let result = sqlx::query(
            "UPDATE documents SET data = data || $2, updated_at = $3 WHERE path = $1",
        )
        .bind(path)
        .bind(Json(fields.to_object(now)))
        .bind(now)
        .execute(&mut **self.conn()?)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(path.to_string()));
        }
        Ok(())
    }

    async fn set(&mut self, path: &str, fields: Fields) -> Result<(), StoreError> {
        let now = self.now;
        sqlx::query(
            "INSERT INTO documents (path, collection, data, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4) \
             ON CONFLICT (path) DO UPDATE \
             SET data = EXCLUDED.data, updated_at = EXCLUDED.updated_at",
        )
        .bind(path)
        .bind(collection_of(path))
        .bind(Json(fields.to_object(now)))
        .bind(now)
        .execute(&mut **self.conn()?)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn delete(&mut self, path: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM documents WHERE path = $1")
            .bind(path)
            .execute(&mut **self.conn()?)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Finished)?;
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        match self.tx.take() {
            Some(tx) => tx.rollback().await.map_err(map_sqlx_error),
            None => Ok(()),
        }
    }
}

fn collection_of(path: &str) -> &str {
    paths::parent(path).unwrap_or_default()
}

/// Map a sqlx error onto the store's conflict taxonomy.
fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                return StoreError::Conflict(db_err.message().to_string());
            }
            Some(UNIQUE_VIOLATION) => {
                return StoreError::AlreadyExists(db_err.message().to_string());
            }
            _ => {}
        }
    }
    StoreError::Backend(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_is_parent_path() {
        assert_eq!(collection_of("jobs/$queue"), "jobs");
        assert_eq!(collection_of("jobs/$queue/force/$run"), "jobs/$queue/force");
        assert_eq!(collection_of("jobs"), "");
    }

    #[test]
    fn non_database_errors_are_backend_failures() {
        let err = map_sqlx_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(!err.is_conflict());
    }
}
