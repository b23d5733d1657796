//! # Error Types
//!
//! Domain-specific error types for caixa-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  caixa-core errors (this file)                                          │
//! │  ├── CoreError        - Domain rule violations                          │
//! │  └── ValidationError  - Input validation failures                       │
//! │                                                                         │
//! │  caixa-db errors                                                        │
//! │  └── DbError          - Database operation failures                     │
//! │                                                                         │
//! │  caixa-fiscal errors                                                    │
//! │  └── FiscalError      - Authority / timeout failures                    │
//! │                                                                         │
//! │  till errors (in app)                                                   │
//! │  └── TillError        - What the front end sees (code + message)        │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → TillError → Front end              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain errors raised by the pure settlement logic.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Input failed validation (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Entity is not in a state that allows the requested operation.
    ///
    /// ## When This Occurs
    /// - Adding items to a settled order
    /// - Recording a movement on a closed cash session
    /// - Cancelling an invoice that was never authorized
    #[error("{entity} {id} is {status}, cannot {operation}")]
    InvalidState {
        entity: String,
        id: String,
        status: String,
        operation: String,
    },

    /// A uniqueness rule would be broken (e.g. second open session).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Monetary arithmetic failed (overflow, negative amount, unparsable value).
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    /// Referenced line item does not exist on the order.
    #[error("Item {item_id} not found on order {order_id}")]
    ItemNotFound { order_id: String, item_id: String },
}

impl CoreError {
    /// Builds an `InvalidState` error from any displayable status.
    pub fn invalid_state(
        entity: &str,
        id: &str,
        status: impl std::fmt::Display,
        operation: &str,
    ) -> Self {
        CoreError::InvalidState {
            entity: entity.to_string(),
            id: id.to_string(),
            status: status.to_string(),
            operation: operation.to_string(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when operator input doesn't meet requirements and are
/// raised before any state is touched.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too short.
    #[error("{field} must be at least {min} characters")]
    TooShort { field: String, min: usize },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Duplicate value (e.g., two payers with the same label).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },

    /// A value exceeds the amount it is bounded by.
    #[error("{field} ({value_cents} centavos) exceeds {limit_cents} centavos")]
    ExceedsLimit {
        field: String,
        value_cents: i64,
        limit_cents: i64,
    },

    /// Change owed to the customer cannot be covered by the cash tendered.
    #[error("change of {change_cents} centavos exceeds cash tendered ({cash_cents} centavos)")]
    ChangeExceedsCash { change_cents: i64, cash_cents: i64 },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
