//! # Validation Module
//!
//! Input validation for operator-entered values.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Front end                                                     │
//! │  └── Formatting, immediate feedback                                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                   │
//! │  └── Business rules, run before any state changes                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite                                                        │
//! │  ├── CHECK constraints                                                  │
//! │  └── Partial UNIQUE index on open cash sessions                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use caixa_core::validation::{validate_quantity, validate_cancellation_reason};
//!
//! assert!(validate_quantity(2).is_ok());
//! assert!(validate_cancellation_reason("cli").is_err());
//! ```

use crate::error::ValidationError;
use crate::{
    MAX_CANCELLATION_REASON_CHARS, MAX_ITEM_QUANTITY, MAX_LABEL_CHARS, MAX_MOVEMENT_REASON_CHARS,
    MAX_ORDER_ITEMS, MAX_WEIGHT_GRAMS, MIN_CANCELLATION_REASON_CHARS,
};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a short label (order label, payer label, terminal id).
///
/// Returns the trimmed label.
pub fn validate_label(field: &str, value: &str) -> ValidationResult<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > MAX_LABEL_CHARS {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_LABEL_CHARS,
        });
    }

    Ok(value.to_string())
}

/// Validates the free-text reason attached to a supply or withdrawal.
pub fn validate_movement_reason(reason: &str) -> ValidationResult<String> {
    let reason = reason.trim();

    if reason.is_empty() {
        return Err(ValidationError::Required {
            field: "reason".to_string(),
        });
    }

    if reason.chars().count() > MAX_MOVEMENT_REASON_CHARS {
        return Err(ValidationError::TooLong {
            field: "reason".to_string(),
            max: MAX_MOVEMENT_REASON_CHARS,
        });
    }

    Ok(reason.to_string())
}

/// Validates the justification sent with an invoice cancellation.
///
/// ## Rules
/// - At least 15 characters after trimming (authority requirement)
/// - At most 255 characters
///
/// Length is counted in characters, not bytes, so accented text is not
/// penalised.
pub fn validate_cancellation_reason(reason: &str) -> ValidationResult<String> {
    let reason = reason.trim();
    let len = reason.chars().count();

    if len < MIN_CANCELLATION_REASON_CHARS {
        return Err(ValidationError::TooShort {
            field: "cancellation reason".to_string(),
            min: MIN_CANCELLATION_REASON_CHARS,
        });
    }

    if len > MAX_CANCELLATION_REASON_CHARS {
        return Err(ValidationError::TooLong {
            field: "cancellation reason".to_string(),
            max: MAX_CANCELLATION_REASON_CHARS,
        });
    }

    Ok(reason.to_string())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a unit quantity.
///
/// ## Rules
/// - Must be positive
/// - Must not exceed MAX_ITEM_QUANTITY (999)
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates the weight of a weighed item in grams.
pub fn validate_weight_grams(grams: u32) -> ValidationResult<()> {
    if grams == 0 {
        return Err(ValidationError::MustBePositive {
            field: "weight".to_string(),
        });
    }

    if grams > MAX_WEIGHT_GRAMS {
        return Err(ValidationError::OutOfRange {
            field: "weight".to_string(),
            min: 1,
            max: MAX_WEIGHT_GRAMS as i64,
        });
    }

    Ok(())
}

/// Validates a price in centavos. Zero is allowed (courtesy items).
pub fn validate_price_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates an amount that must be strictly positive (movements, floats
/// excluded).
pub fn validate_positive_amount(field: &str, cents: i64) -> ValidationResult<()> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Validates that one more line item fits on the order.
pub fn validate_order_size(current_items: usize) -> ValidationResult<()> {
    if current_items >= MAX_ORDER_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "order items".to_string(),
            min: 0,
            max: MAX_ORDER_ITEMS as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_label() {
        assert_eq!(validate_label("payer", "  Ana ").unwrap(), "Ana");
        assert!(validate_label("payer", "   ").is_err());
        assert!(validate_label("payer", &"x".repeat(61)).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(999).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(1000).is_err());
    }

    #[test]
    fn test_validate_weight() {
        assert!(validate_weight_grams(455).is_ok());
        assert!(validate_weight_grams(0).is_err());
        assert!(validate_weight_grams(MAX_WEIGHT_GRAMS + 1).is_err());
    }

    #[test]
    fn test_validate_cancellation_reason() {
        assert!(matches!(
            validate_cancellation_reason("cli"),
            Err(ValidationError::TooShort { min: 15, .. })
        ));
        // Padding does not count
        assert!(validate_cancellation_reason("   curto demais   ").is_err());
        assert!(validate_cancellation_reason("cliente desistiu").is_ok());
        // 15 accented characters are 15 characters, not 20 bytes
        assert!(validate_cancellation_reason("ééééééééééééééé").is_ok());
        assert!(validate_cancellation_reason(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_validate_movement_reason() {
        assert!(validate_movement_reason("troco inicial").is_ok());
        assert!(validate_movement_reason("").is_err());
    }

    #[test]
    fn test_validate_amounts() {
        assert!(validate_price_cents("price", 0).is_ok());
        assert!(validate_price_cents("price", -1).is_err());
        assert!(validate_positive_amount("amount", 1).is_ok());
        assert!(validate_positive_amount("amount", 0).is_err());
    }

    #[test]
    fn test_validate_order_size() {
        assert!(validate_order_size(0).is_ok());
        assert!(validate_order_size(MAX_ORDER_ITEMS).is_err());
    }
}
