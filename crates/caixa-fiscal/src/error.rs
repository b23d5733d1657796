//! # Fiscal Error Types
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Fiscal Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐  │
//! │  │  Authority      │  │  Local rules    │  │  Plumbing               │  │
//! │  │                 │  │                 │  │                         │  │
//! │  │  ExternalFailure│  │  Core           │  │  Database               │  │
//! │  │  Timeout        │  │  (validation,   │  │  Config                 │  │
//! │  │  (retryable)    │  │   bad state)    │  │                         │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for fiscal operations.
pub type FiscalResult<T> = Result<T, FiscalError>;

#[derive(Debug, Error)]
pub enum FiscalError {
    /// The authority was unreachable or answered with something unusable.
    #[error("Fiscal authority failure: {0}")]
    ExternalFailure(String),

    /// The authority did not answer in time.
    #[error("Fiscal authority timed out after {0} seconds")]
    Timeout(u64),

    /// A settlement or invoice rule refused the operation.
    #[error(transparent)]
    Core(#[from] caixa_core::CoreError),

    #[error(transparent)]
    Database(#[from] caixa_db::DbError),

    #[error("Invalid fiscal configuration: {0}")]
    Config(String),
}

impl FiscalError {
    /// Whether trying the same call again later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FiscalError::ExternalFailure(_) | FiscalError::Timeout(_))
    }
}

impl From<url::ParseError> for FiscalError {
    fn from(err: url::ParseError) -> Self {
        FiscalError::Config(format!("invalid authority URL: {}", err))
    }
}
