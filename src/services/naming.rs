//! Stored-identity generation and validation.
//!
//! A stored name is the upload's wall-clock second followed by the original
//! file's extension, e.g. `1760683380.txt`. When that name is already taken
//! the caller asks for the next candidate, `1760683380-1.txt`,
//! `1760683380-2.txt` and so on.

use chrono::{DateTime, Utc};

use super::storage_service::{StorageError, StorageResult};

/// Upper bound on candidates tried for one upload before giving up.
pub const MAX_NAME_ATTEMPTS: u32 = 64;

const MAX_EXTENSION_LEN: usize = 16;
const MAX_STORED_NAME_LEN: usize = 255;

/// Source of "now" for naming, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Extract the extension of `original_name`, dot included.
///
/// Only the final path component is considered (both `/` and `\` count as
/// separators). Extensions containing anything but ASCII alphanumerics, `-`
/// or `_`, or longer than 16 bytes, are dropped so no untrusted characters
/// reach the filesystem.
pub fn extension(original_name: &str) -> &str {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    let Some(dot) = base.rfind('.') else {
        return "";
    };
    let ext = &base[dot..];
    let clean = ext[1..]
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if clean && ext.len() <= MAX_EXTENSION_LEN {
        ext
    } else {
        ""
    }
}

/// Build the `attempt`-th candidate name for an upload made at `at`.
///
/// Attempt 0 is the plain `<seconds><ext>` form.
pub fn candidate(original_name: &str, at: DateTime<Utc>, attempt: u32) -> String {
    let ext = extension(original_name);
    let secs = at.timestamp();
    if attempt == 0 {
        format!("{secs}{ext}")
    } else {
        format!("{secs}-{attempt}{ext}")
    }
}

/// Reject identities that could escape the flat storage namespace.
///
/// Covers parent-directory segments, path separators, control bytes and
/// leading dots (the staging area and other hidden entries live there).
pub fn ensure_name_safe(name: &str) -> StorageResult<()> {
    let invalid = || StorageError::InvalidName(name.to_string());
    if name.is_empty() || name.len() > MAX_STORED_NAME_LEN {
        return Err(invalid());
    }
    if name.contains("..") || name.contains('/') || name.starts_with('.') {
        return Err(invalid());
    }
    if name.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
        return Err(invalid());
    }
    Ok(())
}
