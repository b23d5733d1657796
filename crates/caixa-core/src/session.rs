//! # Cash Session
//!
//! A cash session spans one operator's shift on one terminal, from the
//! opening float to the blind count at close.
//!
//! ## Reconciliation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Expected Cash in Drawer                              │
//! │                                                                         │
//! │   opening float                                                         │
//! │ + Σ supplies                                                            │
//! │ − Σ withdrawals                                                         │
//! │ + Σ cash payments of the session's settlements                          │
//! │ − Σ change handed back                                                  │
//! │ ────────────────────────                                                │
//! │ = expected                                                              │
//! │                                                                         │
//! │ variance = counted − expected   (negative = drawer is short)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Card, Pix and other instruments are reported but never counted as cash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::allocator::Settlement;
use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{MovementKind, Operator, PaymentInstrument, SessionStatus};
use crate::validation::{
    validate_label, validate_movement_reason, validate_positive_amount, validate_price_cents,
};

// =============================================================================
// Types
// =============================================================================

/// A supply or withdrawal recorded during the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Movement {
    pub id: String,
    pub session_id: String,
    pub kind: MovementKind,
    pub amount: Money,
    pub reason: String,
    pub operator_id: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// An operator's shift at a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CashSession {
    pub id: String,
    pub operator_id: String,
    pub operator_name: String,
    pub terminal_id: String,
    pub opening_float: Money,
    pub status: SessionStatus,
    pub movements: Vec<Movement>,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
    pub expected: Option<Money>,
    pub counted: Option<Money>,
    pub variance: Option<Money>,
}

/// Per-instrument total for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InstrumentTotal {
    pub instrument: PaymentInstrument,
    pub amount: Money,
}

/// Running figures for a session, open or closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SessionTotals {
    pub settlement_count: usize,
    /// Cash tendered minus change handed back.
    pub cash_total: Money,
    pub non_cash_total: Money,
    pub change_given: Money,
    pub supplies: Money,
    pub withdrawals: Money,
    pub by_instrument: Vec<InstrumentTotal>,
}

/// Frozen report produced when the session closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ClosedSessionReport {
    pub session_id: String,
    pub operator_id: String,
    pub operator_name: String,
    pub terminal_id: String,
    pub opening_float: Money,
    pub totals: SessionTotals,
    pub expected: Money,
    pub counted: Money,
    /// counted − expected. Negative means the drawer is short.
    pub variance: Money,
    /// Supplies and withdrawals as they stood at close.
    #[serde(default)]
    pub movements: Vec<Movement>,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub closed_at: DateTime<Utc>,
}

// =============================================================================
// Operations
// =============================================================================

impl CashSession {
    /// Starts a session. Uniqueness per operator/terminal is enforced by the
    /// caller against storage.
    pub fn open(
        operator: &Operator,
        terminal_id: &str,
        opening_float: Money,
        now: DateTime<Utc>,
    ) -> CoreResult<Self> {
        let terminal_id = validate_label("terminal id", terminal_id)?;
        validate_price_cents("opening float", opening_float.cents())?;

        Ok(CashSession {
            id: Uuid::new_v4().to_string(),
            operator_id: operator.id.clone(),
            operator_name: operator.name.clone(),
            terminal_id,
            opening_float,
            status: SessionStatus::Open,
            movements: Vec::new(),
            opened_at: now,
            closed_at: None,
            expected: None,
            counted: None,
            variance: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }

    pub fn ensure_open(&self, operation: &str) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::invalid_state(
                "cash session",
                &self.id,
                self.status,
                operation,
            ))
        }
    }

    /// Records a supply or withdrawal and returns it.
    pub fn record_movement(
        &mut self,
        kind: MovementKind,
        amount: Money,
        reason: &str,
        operator: &Operator,
        now: DateTime<Utc>,
    ) -> CoreResult<Movement> {
        self.ensure_open("record movements")?;
        validate_positive_amount("movement amount", amount.cents())?;
        let reason = validate_movement_reason(reason)?;

        let movement = Movement {
            id: Uuid::new_v4().to_string(),
            session_id: self.id.clone(),
            kind,
            amount,
            reason,
            operator_id: operator.id.clone(),
            created_at: now,
        };
        self.movements.push(movement.clone());
        Ok(movement)
    }

    /// Aggregates this session's settlements and movements.
    ///
    /// Settlements belonging to other sessions are ignored.
    pub fn totals(&self, settlements: &[Settlement]) -> SessionTotals {
        let own: Vec<&Settlement> = settlements
            .iter()
            .filter(|s| s.session_id == self.id)
            .collect();

        let by_instrument: Vec<InstrumentTotal> = PaymentInstrument::ALL
            .iter()
            .map(|instrument| InstrumentTotal {
                instrument: *instrument,
                amount: own
                    .iter()
                    .flat_map(|s| s.payments.iter())
                    .filter(|p| p.instrument == *instrument)
                    .map(|p| p.amount)
                    .sum(),
            })
            .collect();

        let change_given: Money = own.iter().map(|s| s.change).sum();
        let cash_tendered: Money = by_instrument
            .iter()
            .filter(|t| t.instrument.is_cash())
            .map(|t| t.amount)
            .sum();
        let non_cash_total: Money = by_instrument
            .iter()
            .filter(|t| !t.instrument.is_cash())
            .map(|t| t.amount)
            .sum();

        let movement_sum = |kind: MovementKind| -> Money {
            self.movements
                .iter()
                .filter(|m| m.kind == kind)
                .map(|m| m.amount)
                .sum()
        };

        SessionTotals {
            settlement_count: own.len(),
            cash_total: cash_tendered - change_given,
            non_cash_total,
            change_given,
            supplies: movement_sum(MovementKind::Supply),
            withdrawals: movement_sum(MovementKind::Withdrawal),
            by_instrument,
        }
    }

    /// Cash that should be in the drawer right now.
    pub fn compute_expected(&self, settlements: &[Settlement]) -> Money {
        let totals = self.totals(settlements);
        self.opening_float + totals.supplies - totals.withdrawals + totals.cash_total
    }

    /// Closes the session with the operator's counted amount and freezes the
    /// report.
    pub fn close(
        &mut self,
        counted: Money,
        settlements: &[Settlement],
        now: DateTime<Utc>,
    ) -> CoreResult<ClosedSessionReport> {
        self.ensure_open("close")?;
        validate_price_cents("counted amount", counted.cents())?;

        let totals = self.totals(settlements);
        let expected = self.opening_float + totals.supplies - totals.withdrawals + totals.cash_total;
        let variance = counted - expected;

        self.status = SessionStatus::Closed;
        self.closed_at = Some(now);
        self.expected = Some(expected);
        self.counted = Some(counted);
        self.variance = Some(variance);

        Ok(ClosedSessionReport {
            session_id: self.id.clone(),
            operator_id: self.operator_id.clone(),
            operator_name: self.operator_name.clone(),
            terminal_id: self.terminal_id.clone(),
            opening_float: self.opening_float,
            totals,
            expected,
            counted,
            variance,
            movements: self.movements.clone(),
            opened_at: self.opened_at,
            closed_at: now,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
