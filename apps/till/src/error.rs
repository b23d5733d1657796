//! # Till Error Type
//!
//! One error shape for everything the till exposes: a machine-readable
//! `code` and a message the operator can read.
//!
//! ```json
//! { "code": "INVALID_STATE", "message": "cash session 7f3a… is closed, cannot record movements" }
//! ```
//!
//! ## Mapping
//! ```text
//! CoreError::Validation       → VALIDATION_ERROR
//! CoreError::InvalidState     → INVALID_STATE
//! CoreError::Conflict         → CONFLICT
//! CoreError::Arithmetic       → ARITHMETIC_ERROR
//! DbError::UniqueViolation    → CONFLICT          (second open session)
//! DbError::PreconditionFailed → INVALID_STATE     (closed between read and write)
//! DbError::NotFound           → NOT_FOUND
//! FiscalError::ExternalFailure→ EXTERNAL_FAILURE
//! FiscalError::Timeout        → TIMEOUT
//! ```

use serde::Serialize;

use caixa_core::CoreError;
use caixa_db::DbError;
use caixa_fiscal::FiscalError;

use crate::config::ConfigError;

pub type TillResult<T> = Result<T, TillError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TillError {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Bad operator input; fix and retry.
    ValidationError,

    /// Operation not legal in the entity's current state.
    InvalidState,

    /// An open session already exists.
    Conflict,

    /// Fiscal authority unreachable or answered nonsense. Retryable.
    ExternalFailure,

    /// A computed amount broke an invariant. Treat as a defect.
    ArithmeticError,

    Timeout,

    NotFound,

    DatabaseError,

    Internal,
}

impl TillError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        TillError {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(resource: &str, id: &str) -> Self {
        TillError::new(ErrorCode::NotFound, format!("{} not found: {}", resource, id))
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        TillError::new(ErrorCode::InvalidState, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        TillError::new(ErrorCode::Internal, message)
    }
}

impl From<CoreError> for TillError {
    fn from(err: CoreError) -> Self {
        let code = match &err {
            CoreError::Validation(_) => ErrorCode::ValidationError,
            CoreError::InvalidState { .. } => ErrorCode::InvalidState,
            CoreError::Conflict(_) => ErrorCode::Conflict,
            CoreError::Arithmetic(_) => ErrorCode::ArithmeticError,
            CoreError::ItemNotFound { .. } => ErrorCode::NotFound,
        };
        TillError::new(code, err.to_string())
    }
}

impl From<DbError> for TillError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => TillError::not_found(&entity, &id),
            DbError::UniqueViolation { field, value } => TillError::new(
                ErrorCode::Conflict,
                format!("{} already exists: {}", field, value),
            ),
            DbError::PreconditionFailed { entity, id, reason } => {
                TillError::invalid_state(format!("{} {} {}", entity, id, reason))
            }
            DbError::ForeignKeyViolation { message } => {
                tracing::error!("Foreign key violation: {}", message);
                TillError::new(ErrorCode::ValidationError, "Invalid reference")
            }
            DbError::Snapshot(e) => {
                tracing::error!("Stored data could not be decoded: {}", e);
                TillError::new(ErrorCode::DatabaseError, "Stored data is unreadable")
            }
            DbError::Connection(e) => {
                tracing::error!("Database unreachable: {}", e);
                TillError::new(ErrorCode::DatabaseError, "Database connection failed")
            }
            DbError::Migration(e) => {
                tracing::error!("Migration failed: {}", e);
                TillError::new(ErrorCode::DatabaseError, "Database migration failed")
            }
            DbError::Query(e) | DbError::Transaction(e) => {
                tracing::error!("Database operation failed: {}", e);
                TillError::new(ErrorCode::DatabaseError, "Database operation failed")
            }
        }
    }
}

impl From<FiscalError> for TillError {
    fn from(err: FiscalError) -> Self {
        match err {
            FiscalError::Core(e) => e.into(),
            FiscalError::Database(e) => e.into(),
            FiscalError::ExternalFailure(m) => TillError::new(ErrorCode::ExternalFailure, m),
            FiscalError::Timeout(_) => TillError::new(ErrorCode::Timeout, err.to_string()),
            FiscalError::Config(m) => TillError::internal(m),
        }
    }
}

impl From<ConfigError> for TillError {
    fn from(err: ConfigError) -> Self {
        TillError::new(ErrorCode::ValidationError, err.to_string())
    }
}

impl std::fmt::Display for TillError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for TillError {}

#[cfg(test)]
mod tests {
    use super::*;
    use caixa_core::ValidationError;

    #[test]
    fn test_core_mapping() {
        let err: TillError = CoreError::from(ValidationError::TooShort {
            field: "cancellation reason".into(),
            min: 15,
        })
        .into();
        assert_eq!(err.code, ErrorCode::ValidationError);

        let err: TillError = CoreError::Arithmetic("negative amount".into()).into();
        assert_eq!(err.code, ErrorCode::ArithmeticError);
    }

    #[test]
    fn test_db_mapping() {
        let err: TillError = DbError::duplicate("open cash session", "s-1").into();
        assert_eq!(err.code, ErrorCode::Conflict);

        let err: TillError = DbError::precondition("cash session", "s-1", "is closed").into();
        assert_eq!(err.code, ErrorCode::InvalidState);
    }

    #[test]
    fn test_fiscal_mapping_unwraps_inner() {
        let err: TillError = FiscalError::Core(CoreError::Conflict("x".into())).into();
        assert_eq!(err.code, ErrorCode::Conflict);

        let err: TillError = FiscalError::ExternalFailure("503".into()).into();
        assert_eq!(err.code, ErrorCode::ExternalFailure);
    }

    #[test]
    fn test_serializes_screaming_code() {
        let json = serde_json::to_value(TillError::not_found("order", "o-1")).unwrap();
        assert_eq!(json["code"], "NOT_FOUND");
    }
}
