//! # Storage Errors
//!
//! What can go wrong between the till and its SQLite file.
//!
//! ```text
//! sqlx::Error ──► DbError ──► TillError { code, message }
//!                    ▲
//!  guarded UPDATE ───┘  (0 rows touched → PreconditionFailed)
//! ```
//!
//! Constraint failures are told apart by `sqlx`'s error kind, not by
//! matching message text.

use sqlx::error::ErrorKind;
use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A unique index refused the row.
    ///
    /// Raised for a second open cash session on the same operator and
    /// terminal, and for a second invoice on one settlement.
    #[error("{field} already exists: {value}")]
    UniqueViolation { field: String, value: String },

    #[error("Dangling reference: {message}")]
    ForeignKeyViolation { message: String },

    /// A guarded write found the row in another state than the one the
    /// caller read, e.g. a session closed while a settlement was recorded.
    #[error("{entity} {id} {reason}")]
    PreconditionFailed {
        entity: String,
        id: String,
        reason: String,
    },

    /// A JSON snapshot column (items, movements, report) did not round trip.
    #[error("Snapshot column unreadable: {0}")]
    Snapshot(String),

    #[error("Cannot reach database: {0}")]
    Connection(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Commit failed: {0}")]
    Transaction(String),

    #[error("Query failed: {0}")]
    Query(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn precondition(
        entity: impl Into<String>,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        DbError::PreconditionFailed {
            entity: entity.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Errors the operator can do nothing about.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            DbError::Connection(_)
                | DbError::Migration(_)
                | DbError::Transaction(_)
                | DbError::Query(_)
                | DbError::Snapshot(_)
        )
    }
}

/// Columns named in SQLite's "UNIQUE constraint failed: t.a, t.b" message.
fn constrained_columns(message: &str) -> String {
    message
        .split_once(": ")
        .map(|(_, columns)| columns.trim().to_string())
        .unwrap_or_else(|| "row".to_string())
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("row", "?"),
            sqlx::Error::Database(db_err) => match db_err.kind() {
                ErrorKind::UniqueViolation => DbError::UniqueViolation {
                    field: constrained_columns(db_err.message()),
                    value: "?".to_string(),
                },
                ErrorKind::ForeignKeyViolation => DbError::ForeignKeyViolation {
                    message: db_err.message().to_string(),
                },
                _ => DbError::Query(db_err.message().to_string()),
            },
            sqlx::Error::PoolTimedOut => {
                DbError::Connection("timed out waiting for a pooled connection".to_string())
            }
            sqlx::Error::PoolClosed => DbError::Connection("pool is closed".to_string()),
            sqlx::Error::Io(e) => DbError::Connection(e.to_string()),
            other => DbError::Query(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::Migration(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Snapshot(err.to_string())
    }
}
