//! src/services/storage_service.rs
//!
//! StorageService coordinates the byte store (flat files under `data_dir`)
//! and the metadata store (SQLite `files` table) for upload, read and delete.
//!
//! The two stores share no transaction. Uploads stage bytes first, claim a
//! stored name through the metadata unique index, and only then publish the
//! bytes under that name; a name conflict moves on to the next candidate and
//! never touches another upload's bytes. Deletes remove bytes first and treat
//! a failed metadata cleanup as a tolerated orphan record that `reconcile`
//! sweeps later.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{io, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::fs::File;
use tracing::{debug, info, warn};

use super::{
    byte_store::ByteStore,
    metadata_store::MetadataStore,
    naming::{self, Clock, MAX_NAME_ATTEMPTS, SystemClock},
};
use crate::models::file_record::{FileRecord, NewFileRecord};

/// Staged files and bytes-less records younger than this may belong to an
/// upload still between insert and publish, so `reconcile` leaves them alone.
pub const RECONCILE_GRACE: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid filename `{0}`")]
    InvalidName(String),
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("stored name `{0}` already exists")]
    DuplicateName(String),
    #[error("no free stored name for `{0}`")]
    NamesExhausted(String),
    #[error("stored name `{0}` is already occupied on disk")]
    Occupied(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of a delete. `record_removed` is false when the bytes were removed
/// but the metadata row could not be, leaving an orphan record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub record_removed: bool,
}

/// Counts from one reconciliation sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub orphan_records_removed: usize,
    pub staged_files_purged: usize,
}

#[derive(Clone)]
pub struct StorageService {
    pub metadata: MetadataStore,
    pub bytes: ByteStore,
    clock: Arc<dyn Clock>,
}

impl StorageService {
    pub fn new(metadata: MetadataStore, bytes: ByteStore) -> Self {
        Self::with_clock(metadata, bytes, Arc::new(SystemClock))
    }

    pub fn with_clock(metadata: MetadataStore, bytes: ByteStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            metadata,
            bytes,
            clock,
        }
    }

    /// Store an uploaded payload and record its metadata.
    ///
    /// - Stages the buffered bytes on disk (fsync'd).
    /// - Inserts the record under the first free candidate name.
    /// - Renames the staged file to that name.
    ///
    /// Any failure after staging removes only this upload's own state.
    pub async fn upload(
        &self,
        original_name: &str,
        payload: Bytes,
        upload_addr: &str,
    ) -> StorageResult<FileRecord> {
        let staged = self.bytes.stage(&payload).await?;
        let file_size = staged.size() as i64;
        let at = self.clock.now();

        let mut claimed = None;
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let stored_name = naming::candidate(original_name, at, attempt);
            let new = NewFileRecord {
                original_name,
                stored_name: &stored_name,
                file_size,
                upload_addr,
            };
            match self.metadata.insert(&new).await {
                Ok(record) => {
                    claimed = Some(record);
                    break;
                }
                Err(StorageError::DuplicateName(name)) => {
                    warn!("stored name {} already taken, trying next candidate", name);
                }
                Err(err) => {
                    self.bytes.discard(staged).await;
                    return Err(err);
                }
            }
        }

        let Some(record) = claimed else {
            self.bytes.discard(staged).await;
            return Err(StorageError::NamesExhausted(original_name.to_string()));
        };

        if let Err(err) = self.bytes.publish(&staged, &record.stored_name).await {
            if let Err(cleanup) = self
                .metadata
                .delete_by_stored_name(&record.stored_name)
                .await
            {
                warn!(
                    "failed to remove record {} after publish failure: {}",
                    record.stored_name, cleanup
                );
            }
            self.bytes.discard(staged).await;
            return Err(err);
        }

        info!(
            "stored {} as {} ({} bytes from {})",
            record.original_name, record.stored_name, record.file_size, record.upload_addr
        );
        Ok(record)
    }

    pub async fn list(&self) -> StorageResult<Vec<FileRecord>> {
        self.metadata.list_all().await
    }

    /// Open a stored file for reading.
    ///
    /// Only the byte store is consulted; an orphan record does not make a
    /// file readable and a missing record does not hide one.
    pub async fn open(&self, stored_name: &str) -> StorageResult<(File, u64)> {
        naming::ensure_name_safe(stored_name)?;
        self.bytes.open_for_read(stored_name).await
    }

    /// Size of a stored file without opening it.
    pub async fn stat(&self, stored_name: &str) -> StorageResult<u64> {
        naming::ensure_name_safe(stored_name)?;
        self.bytes.stat(stored_name).await
    }

    /// Delete a file's bytes and then its record.
    ///
    /// Failure to remove the record is logged and reported through
    /// `DeleteOutcome` rather than as an error.
    pub async fn delete(&self, stored_name: &str) -> StorageResult<DeleteOutcome> {
        naming::ensure_name_safe(stored_name)?;
        if !self.bytes.exists(stored_name).await? {
            return Err(StorageError::NotFound(stored_name.to_string()));
        }
        self.bytes.delete(stored_name).await?;

        let record_removed = match self.metadata.delete_by_stored_name(stored_name).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "failed to delete file record {} from database: {}",
                    stored_name, err
                );
                false
            }
        };

        info!("deleted {}", stored_name);
        Ok(DeleteOutcome { record_removed })
    }

    /// Remove records whose bytes are gone and purge stale staged uploads,
    /// sparing anything younger than `RECONCILE_GRACE`.
    pub async fn reconcile(&self) -> StorageResult<ReconcileReport> {
        self.reconcile_older_than(RECONCILE_GRACE).await
    }

    /// `reconcile` with an explicit grace period.
    ///
    /// Records uploaded within `grace` are kept even without bytes: their
    /// upload may not have published yet.
    pub async fn reconcile_older_than(&self, grace: Duration) -> StorageResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let cutoff = chrono::Duration::from_std(grace)
            .ok()
            .and_then(|grace| Utc::now().checked_sub_signed(grace))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        for listed in self.metadata.list_all().await? {
            if listed.upload_time > cutoff || self.bytes.exists(&listed.stored_name).await? {
                continue;
            }
            // the listing may be stale by now; decide on the current row
            let record = match self.metadata.get_by_stored_name(&listed.stored_name).await {
                Ok(record) => record,
                Err(StorageError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            if record.id != listed.id
                || record.upload_time > cutoff
                || self.bytes.exists(&record.stored_name).await?
            {
                continue;
            }
            match self
                .metadata
                .delete_by_stored_name(&record.stored_name)
                .await
            {
                Ok(()) => {
                    debug!("removed orphan record {}", record.stored_name);
                    report.orphan_records_removed += 1;
                }
                Err(StorageError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        report.staged_files_purged = self.bytes.purge_staging(grace).await?;
        if report != ReconcileReport::default() {
            info!(
                "reconcile removed {} orphan records and {} stale staged files",
                report.orphan_records_removed, report.staged_files_purged
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{FixedClock, TestEnv};
    use tokio::io::AsyncReadExt;

    async fn read_all(service: &StorageService, name: &str) -> Vec<u8> {
        let (mut file, _) = service.open(name).await.unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_upload_round_trip() {
        let env = TestEnv::new().await;
        let service = &env.service;

        let record = service
            .upload("a.txt", Bytes::from_static(b"hello"), "10.0.0.1:5000")
            .await
            .unwrap();

        assert_eq!(record.stored_name, format!("{}.txt", FixedClock::SECS));
        assert_eq!(record.file_size, 5);
        assert_eq!(record.original_name, "a.txt");
        assert_eq!(read_all(service, &record.stored_name).await, b"hello");
        assert_eq!(service.stat(&record.stored_name).await.unwrap(), 5);

        let listed = service.list().await.unwrap();
        assert_eq!(listed, vec![record]);
    }

    #[tokio::test]
    async fn test_same_second_uploads_get_distinct_names() {
        let env = TestEnv::new().await;
        let service = &env.service;

        let first = service
            .upload("one.txt", Bytes::from_static(b"first"), "a")
            .await
            .unwrap();
        let second = service
            .upload("two.txt", Bytes::from_static(b"second!"), "b")
            .await
            .unwrap();

        assert_eq!(first.stored_name, format!("{}.txt", FixedClock::SECS));
        assert_eq!(second.stored_name, format!("{}-1.txt", FixedClock::SECS));
        assert_eq!(read_all(service, &first.stored_name).await, b"first");
        assert_eq!(read_all(service, &second.stored_name).await, b"second!");
    }

    #[tokio::test]
    async fn test_concurrent_uploads_keep_every_payload() {
        let env = TestEnv::new().await;
        let service = &env.service;

        let uploads = (0..8).map(|i| {
            let payload = Bytes::from(format!("payload-{i}"));
            async move { service.upload("x.bin", payload, "c").await }
        });
        let records: Vec<_> = futures::future::join_all(uploads)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let mut names: Vec<_> = records.iter().map(|r| r.stored_name.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 8);

        for record in &records {
            let bytes = read_all(service, &record.stored_name).await;
            assert_eq!(bytes.len() as i64, record.file_size);
            assert!(bytes.starts_with(b"payload-"));
        }
        assert_eq!(service.list().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_delete_removes_bytes_and_record() {
        let env = TestEnv::new().await;
        let service = &env.service;
        let record = service
            .upload("a.txt", Bytes::from_static(b"bye"), "a")
            .await
            .unwrap();

        let outcome = service.delete(&record.stored_name).await.unwrap();
        assert!(outcome.record_removed);
        assert!(!service.bytes.exists(&record.stored_name).await.unwrap());
        assert!(matches!(
            service.metadata.get_by_stored_name(&record.stored_name).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_without_record_still_succeeds() {
        let env = TestEnv::new().await;
        let service = &env.service;
        service.bytes.write("stray.bin", b"x").await.unwrap();

        let outcome = service.delete("stray.bin").await.unwrap();
        assert!(!outcome.record_removed);
        assert!(!service.bytes.exists("stray.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_and_unsafe_names() {
        let env = TestEnv::new().await;
        let service = &env.service;

        assert!(matches!(
            service.delete("missing.txt").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            service.delete("../uploads.db").await,
            Err(StorageError::InvalidName(_))
        ));
        assert!(matches!(
            service.open("a/b").await,
            Err(StorageError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_orphan_record_is_listed_but_not_readable_until_reconciled() {
        let env = TestEnv::new().await;
        let service = &env.service;
        let record = service
            .upload("a.txt", Bytes::from_static(b"data"), "a")
            .await
            .unwrap();
        service.bytes.delete(&record.stored_name).await.unwrap();

        assert_eq!(service.list().await.unwrap().len(), 1);
        assert!(matches!(
            service.open(&record.stored_name).await,
            Err(StorageError::NotFound(_))
        ));

        let report = service.reconcile_older_than(Duration::ZERO).await.unwrap();
        assert_eq!(report.orphan_records_removed, 1);
        assert!(service.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_spares_unpublished_upload() {
        let env = TestEnv::new().await;
        let service = &env.service;
        let name = format!("{}.txt", FixedClock::SECS);

        // upload A stops between claiming its name and publishing its bytes
        let staged = service.bytes.stage(&Bytes::from_static(b"AA")).await.unwrap();
        service
            .metadata
            .insert(&NewFileRecord {
                original_name: "a.txt",
                stored_name: &name,
                file_size: 2,
                upload_addr: "a",
            })
            .await
            .unwrap();

        let report = service.reconcile().await.unwrap();
        assert_eq!(report, ReconcileReport::default());

        service.bytes.publish(&staged, &name).await.unwrap();
        assert_eq!(service.list().await.unwrap().len(), 1);

        // upload B in the same second must not land on A's name
        let b = service
            .upload("b.txt", Bytes::from_static(b"BB"), "b")
            .await
            .unwrap();
        assert_eq!(b.stored_name, format!("{}-1.txt", FixedClock::SECS));
        assert_eq!(read_all(service, &name).await, b"AA");
        assert_eq!(read_all(service, &b.stored_name).await, b"BB");
    }

    #[tokio::test]
    async fn test_publish_conflict_rolls_back_own_state() {
        let env = TestEnv::new().await;
        let service = &env.service;
        let name = format!("{}.txt", FixedClock::SECS);
        // bytes with no record, e.g. left behind by an interrupted delete
        service.bytes.write(&name, b"stray").await.unwrap();

        let err = service
            .upload("a.txt", Bytes::from_static(b"new"), "a")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Occupied(ref n) if *n == name));

        assert!(matches!(
            service.metadata.get_by_stored_name(&name).await,
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(read_all(service, &name).await, b"stray");
        assert_eq!(service.bytes.purge_staging(Duration::ZERO).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upload_fails_when_every_candidate_is_taken() {
        let env = TestEnv::new().await;
        let service = &env.service;
        let at = FixedClock.now();
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let stored_name = naming::candidate("x.bin", at, attempt);
            service
                .metadata
                .insert(&NewFileRecord {
                    original_name: "x.bin",
                    stored_name: &stored_name,
                    file_size: 0,
                    upload_addr: "seed",
                })
                .await
                .unwrap();
        }

        let err = service
            .upload("y.bin", Bytes::from_static(b"late"), "y")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NamesExhausted(ref n) if n == "y.bin"));
        assert_eq!(
            service.list().await.unwrap().len(),
            MAX_NAME_ATTEMPTS as usize
        );
        assert_eq!(service.bytes.purge_staging(Duration::ZERO).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_keeps_healthy_records() {
        let env = TestEnv::new().await;
        let service = &env.service;
        service
            .upload("a.txt", Bytes::from_static(b"data"), "a")
            .await
            .unwrap();

        assert_eq!(
            service.reconcile().await.unwrap(),
            ReconcileReport::default()
        );
        assert_eq!(service.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_no_trace() {
        let env = TestEnv::new().await;
        let service = &env.service;
        sqlx::query("DROP TABLE files")
            .execute(&*service.metadata.db)
            .await
            .unwrap();

        let err = service
            .upload("a.txt", Bytes::from_static(b"data"), "a")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Sqlx(_)));
        assert!(
            !service
                .bytes
                .exists(&format!("{}.txt", FixedClock::SECS))
                .await
                .unwrap()
        );
        assert_eq!(service.bytes.purge_staging(Duration::ZERO).await.unwrap(), 0);
    }
}
