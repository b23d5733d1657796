//! # Domain Types
//!
//! Shared enums and small value types used by every other module.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐        │
//! │  │   OrderStatus   │   │PaymentInstrument│   │  FiscalStatus   │        │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │        │
//! │  │  Open           │   │  Cash           │   │  NotSubmitted   │        │
//! │  │  PartiallySettled│  │  Credit / Debit │   │  Processing     │        │
//! │  │  Settled        │   │  Pix            │   │  Authorized     │        │
//! │  │  Cancelled      │   │  Other          │   │  Rejected ...   │        │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘        │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐        │
//! │  │    Operator     │   │     Payment     │   │  MovementKind   │        │
//! │  │  id, name       │   │  payer, amount  │   │  Supply         │        │
//! │  │  (explicit, no  │   │  instrument     │   │  Withdrawal     │        │
//! │  │   global user)  │   │  settlement_id  │   └─────────────────┘        │
//! │  └─────────────────┘   └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Operator
// =============================================================================

/// The authenticated operator performing an action.
///
/// Passed explicitly into every mutating operation; there is no ambient
/// "current user".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Operator {
    pub id: String,
    pub name: String,
}

impl Operator {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Operator {
            id: id.into(),
            name: name.into(),
        }
    }
}

// =============================================================================
// Order Kind / Status
// =============================================================================

/// Where the order is being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Table,
    Counter,
    Delivery,
}

/// Lifecycle of an order.
///
/// ```text
///   Open ──partial payment──► PartiallySettled ──remaining ≤ tolerance──► Settled
///    │                              │
///    └────discard (nothing paid)────┴──────────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallySettled,
    Settled,
    Cancelled,
}

impl OrderStatus {
    /// Items, discounts and payments may only change in these states.
    pub fn accepts_changes(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallySettled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Open => "open",
            OrderStatus::PartiallySettled => "partially_settled",
            OrderStatus::Settled => "settled",
            OrderStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Payment Instrument
// =============================================================================

/// How a payment was tendered.
///
/// Only `Cash` goes into the drawer; every other instrument is reconciled
/// outside the till.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentInstrument {
    Cash,
    Credit,
    Debit,
    Pix,
    Other,
}

impl PaymentInstrument {
    /// Every instrument, in report order.
    pub const ALL: [PaymentInstrument; 5] = [
        PaymentInstrument::Cash,
        PaymentInstrument::Credit,
        PaymentInstrument::Debit,
        PaymentInstrument::Pix,
        PaymentInstrument::Other,
    ];

    #[inline]
    pub fn is_cash(&self) -> bool {
        matches!(self, PaymentInstrument::Cash)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentInstrument::Cash => "cash",
            PaymentInstrument::Credit => "credit",
            PaymentInstrument::Debit => "debit",
            PaymentInstrument::Pix => "pix",
            PaymentInstrument::Other => "other",
        }
    }
}

impl fmt::Display for PaymentInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts the English names plus the labels printed on the till keys.
impl FromStr for PaymentInstrument {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cash" | "dinheiro" => Ok(PaymentInstrument::Cash),
            "credit" | "credito" | "crédito" => Ok(PaymentInstrument::Credit),
            "debit" | "debito" | "débito" => Ok(PaymentInstrument::Debit),
            "pix" => Ok(PaymentInstrument::Pix),
            "other" | "outro" | "outros" => Ok(PaymentInstrument::Other),
            _ => Err(ValidationError::NotAllowed {
                field: "instrument".to_string(),
                allowed: PaymentInstrument::ALL
                    .iter()
                    .map(|i| i.as_str().to_string())
                    .collect(),
            }),
        }
    }
}

// =============================================================================
// Payment
// =============================================================================

/// A single tender recorded as part of a settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Payment {
    pub id: String,
    pub settlement_id: String,
    pub payer_label: String,
    pub instrument: PaymentInstrument,
    pub amount: Money,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Cash Session
// =============================================================================

/// Whether a cash session is accepting settlements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Open => f.write_str("open"),
            SessionStatus::Closed => f.write_str("closed"),
        }
    }
}

/// Cash added to (supply) or removed from (withdrawal) the drawer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Supply,
    Withdrawal,
}

impl MovementKind {
    /// Applies the movement direction to an amount.
    pub fn signed(&self, amount: Money) -> Money {
        match self {
            MovementKind::Supply => amount,
            MovementKind::Withdrawal => Money::zero() - amount,
        }
    }
}

// =============================================================================
// Fiscal Status
// =============================================================================

/// Lifecycle of a fiscal invoice (NFC-e) at the tax authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum FiscalStatus {
    NotSubmitted,
    Processing,
    Authorized,
    Rejected,
    Cancelled,
    Error,
}

impl FiscalStatus {
    /// States where polling has nothing left to wait for.
    pub fn is_settled(&self) -> bool {
        !matches!(self, FiscalStatus::NotSubmitted | FiscalStatus::Processing)
    }

    /// States from which a (re)submission is allowed.
    pub fn accepts_submission(&self) -> bool {
        matches!(
            self,
            FiscalStatus::NotSubmitted | FiscalStatus::Rejected | FiscalStatus::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FiscalStatus::NotSubmitted => "not_submitted",
            FiscalStatus::Processing => "processing",
            FiscalStatus::Authorized => "authorized",
            FiscalStatus::Rejected => "rejected",
            FiscalStatus::Cancelled => "cancelled",
            FiscalStatus::Error => "error",
        }
    }
}

impl fmt::Display for FiscalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_from_till_labels() {
        assert_eq!("Dinheiro".parse::<PaymentInstrument>().unwrap(), PaymentInstrument::Cash);
        assert_eq!("crédito".parse::<PaymentInstrument>().unwrap(), PaymentInstrument::Credit);
        assert_eq!("PIX".parse::<PaymentInstrument>().unwrap(), PaymentInstrument::Pix);
        assert!("cheque".parse::<PaymentInstrument>().is_err());
    }

    #[test]
    fn test_order_status_accepts_changes() {
        assert!(OrderStatus::Open.accepts_changes());
        assert!(OrderStatus::PartiallySettled.accepts_changes());
        assert!(!OrderStatus::Settled.accepts_changes());
        assert!(!OrderStatus::Cancelled.accepts_changes());
    }

    #[test]
    fn test_movement_sign() {
        let amount = Money::from_cents(2000);
        assert_eq!(MovementKind::Supply.signed(amount).cents(), 2000);
        assert_eq!(MovementKind::Withdrawal.signed(amount).cents(), -2000);
    }

    #[test]
    fn test_fiscal_status_groups() {
        assert!(FiscalStatus::NotSubmitted.accepts_submission());
        assert!(FiscalStatus::Error.accepts_submission());
        assert!(!FiscalStatus::Processing.accepts_submission());
        assert!(!FiscalStatus::Processing.is_settled());
        assert!(FiscalStatus::Cancelled.is_settled());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::PartiallySettled).unwrap(),
            "\"partially_settled\""
        );
        assert_eq!(
            serde_json::to_string(&FiscalStatus::NotSubmitted).unwrap(),
            "\"not_submitted\""
        );
    }
}
