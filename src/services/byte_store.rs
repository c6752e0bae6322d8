//! Flat on-disk byte store.
//!
//! Objects live directly under `root/{stored_name}`. Uploads are first written
//! to `root/.staging/{uuid}` and linked into place once their metadata row
//! exists, so a reader never observes a half-written object and a publish
//! never replaces bytes that are already there.

use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::PathBuf,
    time::{Duration, SystemTime},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

use super::{
    naming::ensure_name_safe,
    storage_service::{StorageError, StorageResult},
};

const STAGING_DIR: &str = ".staging";

#[derive(Clone, Debug)]
pub struct ByteStore {
    root: PathBuf,
}

/// A fully written payload waiting to be published under its final name.
#[derive(Debug)]
pub struct StagedObject {
    path: PathBuf,
    size: u64,
}

impl StagedObject {
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl ByteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root and staging directories if missing.
    pub async fn init(&self) -> StorageResult<()> {
        fs::create_dir_all(self.staging_root()).await?;
        Ok(())
    }

    fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    fn object_path(&self, stored_name: &str) -> StorageResult<PathBuf> {
        ensure_name_safe(stored_name)?;
        Ok(self.root.join(stored_name))
    }

    fn not_found(stored_name: &str) -> StorageError {
        StorageError::NotFound(stored_name.to_string())
    }

    /// Write `bytes` straight to `stored_name`, replacing existing content.
    ///
    /// Uploads go through `stage` + `publish`; tests use this to seed files.
    #[cfg(test)]
    pub async fn write(&self, stored_name: &str, bytes: &[u8]) -> StorageResult<()> {
        let path = self.object_path(stored_name)?;
        let mut file = File::create(&path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Size in bytes of a stored object. Only regular files count.
    pub async fn stat(&self, stored_name: &str) -> StorageResult<u64> {
        let path = self.object_path(stored_name)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(Self::not_found(stored_name)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(Self::not_found(stored_name)),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    pub async fn exists(&self, stored_name: &str) -> StorageResult<bool> {
        match self.stat(stored_name).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Open a stored object for streaming, returning the handle and its size.
    pub async fn open_for_read(&self, stored_name: &str) -> StorageResult<(File, u64)> {
        let size = self.stat(stored_name).await?;
        let path = self.object_path(stored_name)?;
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                Self::not_found(stored_name)
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok((file, size))
    }

    pub async fn delete(&self, stored_name: &str) -> StorageResult<()> {
        let path = self.object_path(stored_name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("removed physical file {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Err(Self::not_found(stored_name)),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Durably write `bytes` to a fresh staging file.
    pub async fn stage(&self, bytes: &Bytes) -> StorageResult<StagedObject> {
        let staging = self.staging_root();
        fs::create_dir_all(&staging).await?;
        let path = staging.join(Uuid::new_v4().to_string());
        let mut file = File::create(&path).await?;

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&path).await;
            return Err(StorageError::Io(err));
        }

        Ok(StagedObject {
            path,
            size: bytes.len() as u64,
        })
    }

    /// Atomically expose a staged payload under its final identity.
    ///
    /// Never replaces an existing entry: an occupied target fails with
    /// `Occupied`. On failure the staged file is left in place for the caller
    /// to discard; on success it is removed.
    pub async fn publish(&self, staged: &StagedObject, stored_name: &str) -> StorageResult<()> {
        let target = self.object_path(stored_name)?;
        match fs::hard_link(&staged.path, &target).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::Occupied(stored_name.to_string()));
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
        if let Err(err) = fs::remove_file(&staged.path).await {
            debug!(
                "failed to unlink staged file {} after publish: {}",
                staged.path.display(),
                err
            );
        }
        debug!(
            "published {} as {}",
            staged.path.display(),
            target.display()
        );
        Ok(())
    }

    /// Drop a staged payload that will not be published.
    pub async fn discard(&self, staged: StagedObject) {
        if let Err(err) = fs::remove_file(&staged.path).await {
            if err.kind() != ErrorKind::NotFound {
                debug!(
                    "failed to discard staged file {}: {}",
                    staged.path.display(),
                    err
                );
            }
        }
    }

    /// Remove staged files last modified more than `older_than` ago.
    pub async fn purge_staging(&self, older_than: Duration) -> StorageResult<usize> {
        let mut entries = match fs::read_dir(self.staging_root()).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age >= older_than {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(removed)
    }

    /// Write, read back and remove a probe file under the root.
    pub async fn probe(&self) -> io::Result<()> {
        let path = self.staging_root().join(format!("readyz-{}", Uuid::new_v4()));
        fs::create_dir_all(self.staging_root()).await?;
        fs::write(&path, b"readyz").await?;
        let read = fs::read(&path).await;
        let _ = fs::remove_file(&path).await;
        if read? == b"readyz" {
            Ok(())
        } else {
            Err(io::Error::new(ErrorKind::Other, "file content mismatch"))
        }
    }
}
