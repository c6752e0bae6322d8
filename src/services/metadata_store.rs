//! SQLite-backed index of file records.
//!
//! Every operation is a single statement, atomic on its own. Nothing here
//! spans the byte store; cross-store ordering is the coordinator's job.

use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;

use super::storage_service::{StorageError, StorageResult};
use crate::models::file_record::{FileRecord, NewFileRecord};

const RECORD_COLUMNS: &str =
    "id, original_name, stored_name, upload_time, file_size, upload_addr";

#[derive(Clone)]
pub struct MetadataStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl MetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&*self.db).await
    }

    /// Insert a record stamped with the current time.
    ///
    /// Returns `DuplicateName` when `stored_name` is already taken; this
    /// unique index is the only place stored-name uniqueness is enforced.
    pub async fn insert(&self, new: &NewFileRecord<'_>) -> StorageResult<FileRecord> {
        let query = format!(
            "INSERT INTO files (original_name, stored_name, upload_time, file_size, upload_addr)
             VALUES (?, ?, ?, ?, ?)
             RETURNING {RECORD_COLUMNS}"
        );
        sqlx::query_as::<_, FileRecord>(&query)
            .bind(new.original_name)
            .bind(new.stored_name)
            .bind(Utc::now())
            .bind(new.file_size)
            .bind(new.upload_addr)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StorageError::DuplicateName(new.stored_name.to_string())
                } else {
                    StorageError::Sqlx(err)
                }
            })
    }

    pub async fn get_by_stored_name(&self, stored_name: &str) -> StorageResult<FileRecord> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM files WHERE stored_name = ?");
        sqlx::query_as::<_, FileRecord>(&query)
            .bind(stored_name)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StorageError::NotFound(stored_name.to_string()),
                other => StorageError::Sqlx(other),
            })
    }

    /// All records, newest first. Ties on `upload_time` fall back to insertion
    /// order so the listing is deterministic.
    pub async fn list_all(&self) -> StorageResult<Vec<FileRecord>> {
        let query =
            format!("SELECT {RECORD_COLUMNS} FROM files ORDER BY upload_time DESC, id DESC");
        let rows = sqlx::query_as::<_, FileRecord>(&query)
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }

    pub async fn delete_by_stored_name(&self, stored_name: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM files WHERE stored_name = ?")
            .bind(stored_name)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(stored_name.to_string()));
        }
        Ok(())
    }

    /// Lightweight connectivity check.
    pub async fn ping(&self) -> StorageResult<()> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if value != 1 {
            return Err(StorageError::Sqlx(sqlx::Error::Protocol(format!(
                "unexpected result: {value}"
            ))));
        }
        Ok(())
    }
}

/// Return true if the SQLx error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
