//! Represents a stored file as seen by the metadata index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata row for one uploaded file.
///
/// The record never carries content bytes; those live in the byte store under
/// `stored_name`. Records are created by a successful upload, never mutated,
/// and removed by an explicit delete.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct FileRecord {
    /// Autoincrement row id, meaningful only inside the index.
    pub id: i64,

    /// Filename supplied by the uploading client. Display only.
    pub original_name: String,

    /// Generated identity used for disk and public URL access.
    pub stored_name: String,

    /// Timestamp assigned when the record was inserted.
    pub upload_time: DateTime<Utc>,

    /// Payload length in bytes.
    pub file_size: i64,

    /// Remote address of the uploader, kept for audit.
    pub upload_addr: String,
}

/// Input for a metadata insert; the index assigns `id` and `upload_time`.
#[derive(Clone, Debug)]
pub struct NewFileRecord<'a> {
    pub original_name: &'a str,
    pub stored_name: &'a str,
    pub file_size: i64,
    pub upload_addr: &'a str,
}
