//! src/services/catalog.rs
//!
//! Catalog: the relational table of object metadata rows. Owns identity
//! uniqueness (a partial unique index over live rows), timestamp maintenance
//! and soft-delete. Knows nothing about where payload bytes live.

use crate::{
    models::object::{FileAttrs, ObjectRecord, Tags},
    services::error::{StorageError, StorageResult},
};
use chrono::{DateTime, Utc};
use sqlx::{SqlitePool, types::Json};
use std::sync::Arc;
use tracing::debug;

const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

const RECORD_COLUMNS: &str = "id, schema, bucket, key, file_name, file_size, signature, \
     sign_method, metadata, created_at, updated_at, deleted_at";

/// Identity and attributes of a row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewObject<'a> {
    pub schema: &'a str,
    pub bucket: &'a str,
    pub key: &'a str,
    pub attrs: &'a FileAttrs,
}

#[derive(Clone)]
pub struct Catalog {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,
}

impl Catalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Create the `objects` table and its indexes if they are missing.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = INIT_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} catalog migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt)
                .execute(&*self.db)
                .await
                .map_err(|e| StorageError::database("migrate catalog", e))?;
        }
        Ok(())
    }

    /// Lightweight connectivity check.
    pub async fn ping(&self) -> StorageResult<()> {
        let one = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
            .map_err(|e| StorageError::database("ping catalog", e))?;
        if one != 1 {
            return Err(StorageError::Configuration(format!(
                "catalog ping returned {}",
                one
            )));
        }
        Ok(())
    }

    /// Exact-match lookup of a live row by identity tuple.
    pub async fn find(
        &self,
        schema: &str,
        bucket: &str,
        key: &str,
    ) -> StorageResult<Option<ObjectRecord>> {
        sqlx::query_as::<_, ObjectRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM objects
             WHERE schema = ? AND bucket = ? AND key = ? AND deleted_at IS NULL"
        ))
        .bind(schema)
        .bind(bucket)
        .bind(key)
        .fetch_optional(&*self.db)
        .await
        .map_err(|e| StorageError::database("get object", e))
    }

    /// Lookup of a live row by surrogate id, scoped to `schema`.
    pub async fn find_by_id(&self, schema: &str, id: i64) -> StorageResult<Option<ObjectRecord>> {
        sqlx::query_as::<_, ObjectRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM objects
             WHERE schema = ? AND id = ? AND deleted_at IS NULL"
        ))
        .bind(schema)
        .bind(id)
        .fetch_optional(&*self.db)
        .await
        .map_err(|e| StorageError::database("get object by id", e))
    }

    /// Insert a new row. A live row with the same identity yields `Conflict`.
    pub async fn insert(&self, new: NewObject<'_>) -> StorageResult<ObjectRecord> {
        let now = Utc::now();
        let result = sqlx::query_as::<_, ObjectRecord>(&format!(
            "INSERT INTO objects (
                schema, bucket, key, file_name, file_size, signature,
                sign_method, metadata, created_at, updated_at, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
            RETURNING {RECORD_COLUMNS}"
        ))
        .bind(new.schema)
        .bind(new.bucket)
        .bind(new.key)
        .bind(&new.attrs.file_name)
        .bind(new.attrs.file_size)
        .bind(&new.attrs.signature)
        .bind(&new.attrs.sign_method)
        .bind(Json(Tags::new()))
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await;

        match result {
            Ok(record) => Ok(record),
            Err(err) if is_unique_violation(&err) => Err(StorageError::Conflict {
                schema: new.schema.to_string(),
                bucket: new.bucket.to_string(),
                key: new.key.to_string(),
            }),
            Err(err) => Err(StorageError::database("save object", err)),
        }
    }

    /// Rewrite only the file columns of a live row; identity, id and metadata
    /// are left alone. Returns `None` if the row no longer exists.
    pub async fn update_file(
        &self,
        id: i64,
        attrs: &FileAttrs,
    ) -> StorageResult<Option<ObjectRecord>> {
        sqlx::query_as::<_, ObjectRecord>(&format!(
            "UPDATE objects
             SET file_name = ?, file_size = ?, signature = ?, sign_method = ?, updated_at = ?
             WHERE id = ? AND deleted_at IS NULL
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(&attrs.file_name)
        .bind(attrs.file_size)
        .bind(&attrs.signature)
        .bind(&attrs.sign_method)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&*self.db)
        .await
        .map_err(|e| StorageError::database("update object", e))
    }

    /// Replace the metadata map of a live row.
    pub async fn update_metadata(
        &self,
        id: i64,
        metadata: &Tags,
    ) -> StorageResult<Option<ObjectRecord>> {
        sqlx::query_as::<_, ObjectRecord>(&format!(
            "UPDATE objects SET metadata = ?, updated_at = ?
             WHERE id = ? AND deleted_at IS NULL
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(Json(metadata))
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&*self.db)
        .await
        .map_err(|e| StorageError::database("update object metadata", e))
    }

    /// Permanently remove a row. Returns whether a row was removed.
    pub async fn hard_delete(&self, id: i64) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await
            .map_err(|e| StorageError::database("delete object", e))?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a live row deleted. The identity becomes free for a new row.
    pub async fn soft_delete(&self, id: i64) -> StorageResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE objects SET deleted_at = ?, updated_at = ?
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&*self.db)
        .await
        .map_err(|e| StorageError::database("soft delete object", e))?;
        Ok(result.rows_affected() > 0)
    }

    /// Permanently remove every row, live or soft-deleted, last updated
    /// before `threshold`. Returns the removed rows.
    pub async fn purge_updated_before(
        &self,
        threshold: DateTime<Utc>,
    ) -> StorageResult<Vec<ObjectRecord>> {
        sqlx::query_as::<_, ObjectRecord>(&format!(
            "DELETE FROM objects WHERE updated_at < ? RETURNING {RECORD_COLUMNS}"
        ))
        .bind(threshold)
        .fetch_all(&*self.db)
        .await
        .map_err(|e| StorageError::database("delete records", e))
    }

    /// Number of live rows whose payload resolves to `signature/file_name`.
    pub async fn count_payload_refs(&self, signature: &str, file_name: &str) -> StorageResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM objects
             WHERE signature = ? AND file_name = ? AND deleted_at IS NULL",
        )
        .bind(signature)
        .bind(file_name)
        .fetch_one(&*self.db)
        .await
        .map_err(|e| StorageError::database("count payload references", e))
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
