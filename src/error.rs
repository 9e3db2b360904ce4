use std::{fmt, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::SendError as TokioSendError;

#[cfg(feature = "service")]
use sqlx::Error as SqlxError;

use crate::event::TreeEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum MemtreeError {
    /// Network or remote store failure. Never retried silently; the user re-triggers the action.
    #[error("Remote fetch failed: {0}")]
    Fetch(String),
    /// Rejected before any remote write. No state was mutated.
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    /// A re-index stopped part way. Rows updated before the failure stay committed.
    #[error("Re-index aborted after {updated} row(s) were updated: {reason}")]
    ReindexAborted { updated: usize, reason: String },
    /// A cascading delete failed remotely. The local forest was left untouched.
    #[error("Subtree delete aborted: {reason}")]
    DeleteAborted { reason: String },
    #[error("Store/Database error: {0}")]
    Store(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Event channel error: {0}")]
    Channel(String),
}

impl MemtreeError {
    /// True for failures the user may simply try again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MemtreeError::Fetch(_)
                | MemtreeError::Store(_)
                | MemtreeError::ReindexAborted { .. }
                | MemtreeError::DeleteAborted { .. }
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, MemtreeError::Validation(_))
    }
}

impl From<toml::de::Error> for MemtreeError {
    fn from(src: toml::de::Error) -> MemtreeError {
        MemtreeError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for MemtreeError {
    fn from(src: toml::ser::Error) -> MemtreeError {
        MemtreeError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<io::Error> for MemtreeError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => MemtreeError::NotFound(format!("{x}")),
            _ => MemtreeError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<fmt::Error> for MemtreeError {
    fn from(x: fmt::Error) -> Self {
        MemtreeError::Serialization(format!("{x}"))
    }
}

impl From<TokioSendError<TreeEvent>> for MemtreeError {
    fn from(x: TokioSendError<TreeEvent>) -> Self {
        MemtreeError::Channel(format!(
            "Channel update send Error, could not transmit tree event {:?}",
            x.0
        ))
    }
}

#[cfg(feature = "service")]
impl From<SqlxError> for MemtreeError {
    fn from(db_error: SqlxError) -> Self {
        match db_error {
            SqlxError::RowNotFound => MemtreeError::NotFound("database row not found".to_string()),
            SqlxError::Io(e) => MemtreeError::Fetch(format!("database io error: {e}")),
            SqlxError::PoolTimedOut | SqlxError::PoolClosed => {
                MemtreeError::Fetch(format!("database unavailable: {db_error}"))
            }
            other => MemtreeError::Store(format!("database error: {other:?}")),
        }
    }
}

#[cfg(feature = "service")]
impl From<sqlx::migrate::MigrateError> for MemtreeError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        MemtreeError::Store(format!("database migration failed: {e}"))
    }
}
