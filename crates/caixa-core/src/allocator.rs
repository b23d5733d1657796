//! # Split-Payment Allocator
//!
//! Turns an order's outstanding balance into payer shares, lets the operator
//! edit them, and confirms the selected shares as a [`Settlement`].
//!
//! ## Workflow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Settling a Table                                    │
//! │                                                                         │
//! │  propose_allocation(order, mode)                                        │
//! │      │  Lump       → one share = outstanding                            │
//! │      │  Partition  → per person group: subtotal − already paid,         │
//! │      │               capped sequentially                                │
//! │      │  Equal{n}   → outstanding split n ways, leftover to first shares │
//! │      ▼                                                                  │
//! │  AllocationDraft  (operator edits amounts, instruments, selection)      │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  confirm_settlement(order, draft, ctx)                                  │
//! │      │  collected − outstanding = change (must be covered by cash)      │
//! │      │  remaining ≤ tolerance   → Settled, items cleared                │
//! │      │  otherwise               → PartiallySettled                      │
//! │      ▼                                                                  │
//! │  Settlement  (immutable record, persisted by the caller)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Proposals never exceed the outstanding balance and never go negative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::order::{LineItem, Order};
use crate::types::{Operator, OrderStatus, Payment, PaymentInstrument};
use crate::validation::validate_label;
use crate::DEFAULT_PAYER_LABEL;

// =============================================================================
// Allocation Mode
// =============================================================================

/// How the outstanding balance is divided among payers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AllocationMode {
    /// One payer covers everything.
    Lump,
    /// Each person pays for the items attributed to them.
    Partition,
    /// The balance is split evenly among `payers` people.
    Equal { payers: usize },
}

/// A suggested amount for one payer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProposedShare {
    pub payer: String,
    pub amount: Money,
}

/// Suggests how the outstanding balance could be paid.
///
/// ## Partition capping
/// Groups are visited in order of first appearance. A group owes its
/// subtotal less what that payer already paid in earlier rounds, and each
/// proposal is `min(owed, outstanding − already proposed)`. The proposals
/// never sum to more than what is owed even when a discount reduced the
/// balance.
///
/// ## Example
/// ```rust
/// use caixa_core::allocator::{propose_allocation, AllocationMode};
/// use caixa_core::money::Money;
/// use caixa_core::order::{CatalogItem, LineItem, Order, Pricing};
/// use caixa_core::types::{OrderKind, Operator};
///
/// let mut order = Order::new("Mesa 1", OrderKind::Table, &Operator::new("o", "O")).unwrap();
/// let dish = CatalogItem::unit("p", "Prato", Money::from_cents(10000));
/// order.add_item(LineItem::from_catalog(&dish, Pricing::Unit { quantity: 1 }).unwrap()).unwrap();
///
/// let shares = propose_allocation(&order, &AllocationMode::Equal { payers: 3 });
/// let cents: Vec<i64> = shares.iter().map(|s| s.amount.cents()).collect();
/// assert_eq!(cents, vec![3334, 3333, 3333]);
/// ```
pub fn propose_allocation(order: &Order, mode: &AllocationMode) -> Vec<ProposedShare> {
    let outstanding = order.outstanding();

    match mode {
        AllocationMode::Lump => vec![ProposedShare {
            payer: DEFAULT_PAYER_LABEL.to_string(),
            amount: outstanding,
        }],
        AllocationMode::Partition => {
            let mut proposed = Money::zero();
            order
                .person_groups()
                .into_iter()
                .map(|group| {
                    let room = (outstanding - proposed).non_negative();
                    let due = (group.subtotal - order.paid_by(&group.payer)).non_negative();
                    let amount = due.min(room);
                    proposed += amount;
                    ProposedShare {
                        payer: group.payer,
                        amount,
                    }
                })
                .collect()
        }
        AllocationMode::Equal { payers } => outstanding
            .split_evenly(*payers)
            .into_iter()
            .enumerate()
            .map(|(i, amount)| ProposedShare {
                payer: format!("Pessoa {}", i + 1),
                amount,
            })
            .collect(),
    }
}

// =============================================================================
// Allocation Draft
// =============================================================================

/// One editable row on the settlement screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DraftEntry {
    pub payer: String,
    pub instrument: PaymentInstrument,
    pub amount: Money,
    pub selected: bool,
}

/// The operator's working copy of a proposal.
///
/// Amounts can be edited freely; validation happens at confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AllocationDraft {
    pub mode: AllocationMode,
    pub entries: Vec<DraftEntry>,
}

impl AllocationDraft {
    /// Builds a draft from a fresh proposal. Every row starts selected.
    pub fn propose(order: &Order, mode: AllocationMode, instrument: PaymentInstrument) -> Self {
        let entries = propose_allocation(order, &mode)
            .into_iter()
            .map(|share| DraftEntry {
                payer: share.payer,
                instrument,
                amount: share.amount,
                selected: true,
            })
            .collect();
        AllocationDraft { mode, entries }
    }

    /// Adds a payer row. Only partition drafts accept new payers.
    pub fn add_payer(
        &mut self,
        payer: &str,
        instrument: PaymentInstrument,
        amount: Money,
    ) -> CoreResult<()> {
        self.ensure_partition("add payers")?;
        let payer = validate_label("payer", payer)?;
        if self.entries.iter().any(|e| e.payer == payer) {
            return Err(ValidationError::Duplicate {
                field: "payer".to_string(),
                value: payer,
            }
            .into());
        }
        self.entries.push(DraftEntry {
            payer,
            instrument,
            amount,
            selected: true,
        });
        Ok(())
    }

    /// Removes a payer row. Only partition drafts allow removal.
    pub fn remove_payer(&mut self, payer: &str) -> CoreResult<()> {
        self.ensure_partition("remove payers")?;
        let index = self.index_of(payer)?;
        self.entries.remove(index);
        Ok(())
    }

    pub fn set_amount(&mut self, payer: &str, amount: Money) -> CoreResult<()> {
        let index = self.index_of(payer)?;
        self.entries[index].amount = amount;
        Ok(())
    }

    pub fn set_instrument(&mut self, payer: &str, instrument: PaymentInstrument) -> CoreResult<()> {
        let index = self.index_of(payer)?;
        self.entries[index].instrument = instrument;
        Ok(())
    }

    pub fn set_selected(&mut self, payer: &str, selected: bool) -> CoreResult<()> {
        let index = self.index_of(payer)?;
        self.entries[index].selected = selected;
        Ok(())
    }

    pub fn selected(&self) -> impl Iterator<Item = &DraftEntry> {
        self.entries.iter().filter(|e| e.selected)
    }

    /// Sum of the selected rows (unchecked; for display).
    pub fn selected_total(&self) -> Money {
        self.selected().map(|e| e.amount).sum()
    }

    fn ensure_partition(&self, operation: &str) -> CoreResult<()> {
        if matches!(self.mode, AllocationMode::Partition) {
            Ok(())
        } else {
            Err(CoreError::invalid_state(
                "allocation",
                "draft",
                format!("{:?} mode", self.mode).to_lowercase(),
                operation,
            ))
        }
    }

    fn index_of(&self, payer: &str) -> CoreResult<usize> {
        self.entries
            .iter()
            .position(|e| e.payer == payer)
            .ok_or_else(|| {
                ValidationError::NotAllowed {
                    field: "payer".to_string(),
                    allowed: self.entries.iter().map(|e| e.payer.clone()).collect(),
                }
                .into()
            })
    }
}

// =============================================================================
// Settlement
// =============================================================================

/// Immutable record of one confirmed payment round on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Settlement {
    pub id: String,
    pub order_id: String,
    pub session_id: String,
    pub payments: Vec<Payment>,
    /// Everything tendered, change included.
    pub total_collected: Money,
    /// Net paid on the order before this settlement.
    pub prior_paid: Money,
    /// Portion of the collected amount applied to the balance.
    pub applied: Money,
    /// Handed back to the customer, out of the cash tendered.
    pub change: Money,
    /// Residual forgiven because it fell within tolerance.
    pub written_off: Money,
    /// Balance left on the order afterwards.
    pub remaining: Money,
    pub resulting_status: OrderStatus,
    /// Items on the order at the moment of settlement.
    pub items: Vec<LineItem>,
    pub operator_id: String,
    pub operator_name: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Settlement {
    /// Cash that physically entered the drawer: cash tendered minus change.
    pub fn net_cash(&self) -> Money {
        let cash: Money = self
            .payments
            .iter()
            .filter(|p| p.instrument.is_cash())
            .map(|p| p.amount)
            .sum();
        cash - self.change
    }
}

/// Ambient inputs for a confirmation.
#[derive(Debug, Clone)]
pub struct SettlementContext<'a> {
    pub operator: &'a Operator,
    pub session_id: &'a str,
    pub tolerance: Money,
    pub now: DateTime<Utc>,
}

/// Confirms the selected draft rows against the order.
///
/// On success the order is updated in place (payments appended, status
/// advanced, items cleared when settled) and the settlement record is
/// returned. On error the order is untouched.
///
/// ## Errors
/// - `InvalidState`: order already settled/cancelled or nothing outstanding
/// - `Validation`: nothing selected, a zero amount, or change larger than
///   the cash tendered
/// - `Arithmetic`: a negative amount or an overflowing sum
pub fn confirm_settlement(
    order: &mut Order,
    draft: &AllocationDraft,
    ctx: &SettlementContext<'_>,
) -> CoreResult<Settlement> {
    order.ensure_mutable("settle")?;

    let outstanding = order.outstanding();
    if !outstanding.is_positive() {
        return Err(CoreError::invalid_state(
            "order",
            &order.id,
            "fully paid",
            "settle",
        ));
    }

    let selected: Vec<&DraftEntry> = draft.selected().collect();
    if selected.is_empty() {
        return Err(ValidationError::Required {
            field: "selected payment".to_string(),
        }
        .into());
    }

    for entry in &selected {
        if entry.amount.is_negative() {
            return Err(CoreError::Arithmetic(format!(
                "negative amount {} for payer {}",
                entry.amount, entry.payer
            )));
        }
        if entry.amount.is_zero() {
            return Err(ValidationError::MustBePositive {
                field: format!("amount for {}", entry.payer),
            }
            .into());
        }
    }

    let total_collected = Money::checked_sum(selected.iter().map(|e| e.amount))?;
    let cash_collected = Money::checked_sum(
        selected
            .iter()
            .filter(|e| e.instrument.is_cash())
            .map(|e| e.amount),
    )?;

    let change = total_collected.checked_sub(outstanding)?.non_negative();
    if change > cash_collected {
        return Err(ValidationError::ChangeExceedsCash {
            change_cents: change.cents(),
            cash_cents: cash_collected.cents(),
        }
        .into());
    }

    let applied = total_collected.checked_sub(change)?;
    let remaining = outstanding.checked_sub(applied)?;
    if remaining.is_negative() {
        return Err(CoreError::Arithmetic(format!(
            "settlement would leave a negative balance ({})",
            remaining
        )));
    }

    let settled = remaining <= ctx.tolerance;
    let (resulting_status, written_off, remaining) = if settled {
        (OrderStatus::Settled, remaining, Money::zero())
    } else {
        (OrderStatus::PartiallySettled, Money::zero(), remaining)
    };

    let settlement_id = Uuid::new_v4().to_string();
    let payments: Vec<Payment> = selected
        .iter()
        .map(|entry| Payment {
            id: Uuid::new_v4().to_string(),
            settlement_id: settlement_id.clone(),
            payer_label: entry.payer.clone(),
            instrument: entry.instrument,
            amount: entry.amount,
            created_at: ctx.now,
        })
        .collect();

    let settlement = Settlement {
        id: settlement_id,
        order_id: order.id.clone(),
        session_id: ctx.session_id.to_string(),
        payments: payments.clone(),
        total_collected,
        prior_paid: order.paid(),
        applied,
        change,
        written_off,
        remaining,
        resulting_status,
        items: order.items.clone(),
        operator_id: ctx.operator.id.clone(),
        operator_name: ctx.operator.name.clone(),
        created_at: ctx.now,
    };

    order.payments.extend(payments);
    order.change_given += change;
    order.written_off += written_off;
    order.status = resulting_status;
    if settled {
        order.items.clear();
    }
    order.updated_at = ctx.now;

    Ok(settlement)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::DEFAULT_TOLERANCE;
    use crate::order::{CatalogItem, Pricing};
    use crate::types::OrderKind;

    fn operator() -> Operator {
        Operator::new("op-1", "Marta")
    }

    fn order_with(items: &[(&str, i64)]) -> Order {
        let mut order = Order::new("Mesa 1", OrderKind::Table, &operator()).unwrap();
        for (payer, cents) in items {
            let catalog = CatalogItem::unit("p", "Item", Money::from_cents(*cents));
            let item = LineItem::from_catalog(&catalog, Pricing::Unit { quantity: 1 })
                .unwrap()
                .with_payer(payer)
                .unwrap();
            order.add_item(item).unwrap();
        }
        order
    }

    fn confirm(order: &mut Order, draft: &AllocationDraft) -> CoreResult<Settlement> {
        let op = operator();
        let ctx = SettlementContext {
            operator: &op,
            session_id: "session-1",
            tolerance: DEFAULT_TOLERANCE,
            now: Utc::now(),
        };
        confirm_settlement(order, draft, &ctx)
    }

    fn cents(shares: &[ProposedShare]) -> Vec<i64> {
        shares.iter().map(|s| s.amount.cents()).collect()
    }

    #[test]
    fn test_lump_proposes_outstanding() {
        let order = order_with(&[("mesa", 4250)]);
        let shares = propose_allocation(&order, &AllocationMode::Lump);
        assert_eq!(cents(&shares), vec![4250]);
        assert_eq!(shares[0].payer, DEFAULT_PAYER_LABEL);
    }

    #[test]
    fn test_partition_by_person() {
        let order = order_with(&[("Ana", 6000), ("Bia", 4000)]);
        let shares = propose_allocation(&order, &AllocationMode::Partition);
        assert_eq!(cents(&shares), vec![6000, 4000]);
        assert_eq!(shares[0].payer, "Ana");
    }

    #[test]
    fn test_partition_caps_to_outstanding() {
        let mut order = order_with(&[("Ana", 6000), ("Bia", 4000)]);
        order.apply_discount(Money::from_cents(3000)).unwrap();
        let shares = propose_allocation(&order, &AllocationMode::Partition);
        assert_eq!(cents(&shares), vec![6000, 1000]);
    }

    #[test]
    fn test_partition_after_partial_counts_earlier_payments() {
        let mut order = order_with(&[("Ana", 6000), ("Bia", 4000)]);
        let mut draft =
            AllocationDraft::propose(&order, AllocationMode::Partition, PaymentInstrument::Pix);
        draft.set_selected("Bia", false).unwrap();
        confirm(&mut order, &draft).unwrap();

        let shares = propose_allocation(&order, &AllocationMode::Partition);
        assert_eq!(shares[0].payer, "Ana");
        assert_eq!(cents(&shares), vec![0, 4000]);

        let mut draft =
            AllocationDraft::propose(&order, AllocationMode::Partition, PaymentInstrument::Pix);
        draft.set_selected("Ana", false).unwrap();
        let settlement = confirm(&mut order, &draft).unwrap();
        assert_eq!(settlement.resulting_status, OrderStatus::Settled);
    }

    #[test]
    fn test_equal_split_assigns_leftover_to_first() {
        let order = order_with(&[("mesa", 10000)]);
        let shares = propose_allocation(&order, &AllocationMode::Equal { payers: 3 });
        assert_eq!(cents(&shares), vec![3334, 3333, 3333]);
        assert_eq!(shares[2].payer, "Pessoa 3");
        assert!(propose_allocation(&order, &AllocationMode::Equal { payers: 0 }).is_empty());
    }

    #[test]
    fn test_partial_then_final_settlement() {
        let mut order = order_with(&[("Ana", 6000), ("Bia", 4000)]);
        let mut draft =
            AllocationDraft::propose(&order, AllocationMode::Partition, PaymentInstrument::Pix);
        draft.set_selected("Bia", false).unwrap();

        let first = confirm(&mut order, &draft).unwrap();
        assert_eq!(first.resulting_status, OrderStatus::PartiallySettled);
        assert_eq!(first.remaining.cents(), 4000);
        assert_eq!(order.status, OrderStatus::PartiallySettled);
        assert_eq!(order.outstanding().cents(), 4000);
        assert_eq!(order.items.len(), 2);

        let draft =
            AllocationDraft::propose(&order, AllocationMode::Lump, PaymentInstrument::Debit);
        let second = confirm(&mut order, &draft).unwrap();
        assert_eq!(second.resulting_status, OrderStatus::Settled);
        assert_eq!(second.prior_paid.cents(), 6000);
        assert_eq!(second.items.len(), 2);
        assert!(order.items.is_empty());
        assert!(order.outstanding().is_zero());
    }

    #[test]
    fn test_cash_overpayment_produces_change() {
        let mut order = order_with(&[("mesa", 4250)]);
        let mut draft =
            AllocationDraft::propose(&order, AllocationMode::Lump, PaymentInstrument::Cash);
        draft.set_amount("mesa", Money::from_cents(5000)).unwrap();

        let settlement = confirm(&mut order, &draft).unwrap();
        assert_eq!(settlement.change.cents(), 750);
        assert_eq!(settlement.applied.cents(), 4250);
        assert_eq!(settlement.net_cash().cents(), 4250);
        assert_eq!(order.paid().cents(), 4250);
    }

    #[test]
    fn test_change_must_come_from_cash() {
        let mut order = order_with(&[("mesa", 4250)]);
        let mut draft =
            AllocationDraft::propose(&order, AllocationMode::Lump, PaymentInstrument::Credit);
        draft.set_amount("mesa", Money::from_cents(5000)).unwrap();

        let err = confirm(&mut order, &draft).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::ChangeExceedsCash { .. })
        ));
        assert_eq!(order.status, OrderStatus::Open);
        assert!(order.payments.is_empty());
    }

    #[test]
    fn test_residual_within_tolerance_settles() {
        let mut order = order_with(&[("mesa", 10000)]);
        let mut draft = AllocationDraft::propose(
            &order,
            AllocationMode::Equal { payers: 3 },
            PaymentInstrument::Pix,
        );
        for payer in ["Pessoa 1", "Pessoa 2", "Pessoa 3"] {
            draft.set_amount(payer, Money::from_cents(3333)).unwrap();
        }

        let settlement = confirm(&mut order, &draft).unwrap();
        assert_eq!(settlement.resulting_status, OrderStatus::Settled);
        assert!(settlement.remaining.is_zero());
        assert_eq!(settlement.written_off.cents(), 1);
    }

    #[test]
    fn test_residual_above_tolerance_stays_partial() {
        let mut order = order_with(&[("mesa", 10000)]);
        let mut draft =
            AllocationDraft::propose(&order, AllocationMode::Lump, PaymentInstrument::Pix);
        draft.set_amount("mesa", Money::from_cents(9989)).unwrap();

        let settlement = confirm(&mut order, &draft).unwrap();
        assert_eq!(settlement.resulting_status, OrderStatus::PartiallySettled);
        assert_eq!(settlement.remaining.cents(), 11);
    }

    #[test]
    fn test_confirm_rejects_bad_input() {
        let mut order = order_with(&[("mesa", 1000)]);

        let mut none_selected =
            AllocationDraft::propose(&order, AllocationMode::Lump, PaymentInstrument::Cash);
        none_selected.set_selected("mesa", false).unwrap();
        assert!(matches!(
            confirm(&mut order, &none_selected),
            Err(CoreError::Validation(ValidationError::Required { .. }))
        ));

        let mut zero = none_selected.clone();
        zero.set_selected("mesa", true).unwrap();
        zero.set_amount("mesa", Money::zero()).unwrap();
        assert!(matches!(
            confirm(&mut order, &zero),
            Err(CoreError::Validation(ValidationError::MustBePositive { .. }))
        ));

        let mut negative = zero.clone();
        negative.set_amount("mesa", Money::from_cents(-100)).unwrap();
        assert!(matches!(
            confirm(&mut order, &negative),
            Err(CoreError::Arithmetic(_))
        ));
        assert!(order.payments.is_empty());
    }

    #[test]
    fn test_confirm_rejects_settled_order() {
        let mut order = order_with(&[("mesa", 1000)]);
        let draft = AllocationDraft::propose(&order, AllocationMode::Lump, PaymentInstrument::Cash);
        confirm(&mut order, &draft).unwrap();
        assert!(matches!(
            confirm(&mut order, &draft),
            Err(CoreError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_only_partition_drafts_change_payers() {
        let order = order_with(&[("Ana", 1000)]);
        let mut lump = AllocationDraft::propose(&order, AllocationMode::Lump, PaymentInstrument::Cash);
        assert!(lump
            .add_payer("Bia", PaymentInstrument::Cash, Money::from_cents(100))
            .is_err());
        assert!(lump.remove_payer(DEFAULT_PAYER_LABEL).is_err());

        let mut split =
            AllocationDraft::propose(&order, AllocationMode::Partition, PaymentInstrument::Cash);
        split
            .add_payer("Bia", PaymentInstrument::Pix, Money::from_cents(100))
            .unwrap();
        assert!(split
            .add_payer("Bia", PaymentInstrument::Pix, Money::from_cents(100))
            .is_err());
        split.remove_payer("Ana").unwrap();
        assert_eq!(split.entries.len(), 1);
        assert_eq!(split.selected_total().cents(), 100);
    }
}
