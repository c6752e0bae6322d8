//! Core data models for the file vault.
//!
//! Entities map to database tables via `sqlx::FromRow` and serialize as JSON
//! via `serde`.

pub mod file_record;
