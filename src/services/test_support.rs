//! Shared fixtures for service and handler tests.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::sync::Arc;
use tempfile::TempDir;

use super::{
    byte_store::ByteStore, metadata_store::MetadataStore, naming::Clock,
    storage_service::StorageService,
};

/// Clock pinned to a single second so every upload collides on its first
/// candidate name.
pub struct FixedClock;

impl FixedClock {
    pub const SECS: i64 = 1_700_000_000;
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(Self::SECS, 0).unwrap()
    }
}

pub async fn test_pool(temp_dir: &TempDir) -> Arc<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(temp_dir.path().join("uploads.db"))
        .create_if_missing(true);
    Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .unwrap(),
    )
}

pub struct TestEnv {
    pub temp_dir: TempDir,
    pub service: StorageService,
}

impl TestEnv {
    /// Migrated database and empty data directory, with a `FixedClock`.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let metadata = MetadataStore::new(test_pool(&temp_dir).await);
        metadata.migrate().await.unwrap();
        let bytes = ByteStore::new(temp_dir.path().join("data"));
        bytes.init().await.unwrap();

        let service = StorageService::with_clock(metadata, bytes, Arc::new(FixedClock));
        Self { temp_dir, service }
    }
}
