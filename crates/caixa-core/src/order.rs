//! # Order Aggregate
//!
//! An open tab: line items, the discount/surcharge applied to them, and the
//! payments recorded against it so far.
//!
//! ## Totals
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Order Totals                                   │
//! │                                                                         │
//! │   Σ line_total(items)           = subtotal                              │
//! │   subtotal − discount + surcharge = total                               │
//! │   Σ payments − change_given     = paid                                  │
//! │   max(total − paid, 0)          = outstanding                           │
//! │                                                                         │
//! │   Settled / cancelled orders have nothing outstanding.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Person Groups
//! Every line item carries a payer label. Grouping the items by label, in
//! the order each label first appears, gives the per-person breakdown used
//! by partition-mode settlement.
//!
//! ```rust
//! use caixa_core::money::Money;
//! use caixa_core::order::{CatalogItem, LineItem, Order, Pricing};
//! use caixa_core::types::{OrderKind, Operator};
//!
//! let op = Operator::new("op-1", "Marta");
//! let mut order = Order::new("Mesa 4", OrderKind::Table, &op).unwrap();
//!
//! let beer = CatalogItem::unit("p-1", "Chopp", Money::from_cents(1200));
//! let item = LineItem::from_catalog(&beer, Pricing::Unit { quantity: 2 }).unwrap();
//! order.add_item(item).unwrap();
//!
//! assert_eq!(order.total().cents(), 2400);
//! assert_eq!(order.outstanding().cents(), 2400);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{OrderKind, OrderStatus, Operator, Payment};
use crate::validation::{
    validate_label, validate_order_size, validate_price_cents, validate_quantity,
    validate_weight_grams,
};
use crate::DEFAULT_PAYER_LABEL;

// =============================================================================
// Catalog Boundary
// =============================================================================

/// The slice of a catalog product the till needs to price a line item.
///
/// The catalog itself lives outside this engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CatalogItem {
    pub product_id: String,
    pub name: String,
    /// Price per unit, or per kilogram when `sold_by_weight`.
    pub unit_price: Money,
    pub sold_by_weight: bool,
}

impl CatalogItem {
    pub fn unit(product_id: &str, name: &str, unit_price: Money) -> Self {
        CatalogItem {
            product_id: product_id.to_string(),
            name: name.to_string(),
            unit_price,
            sold_by_weight: false,
        }
    }

    pub fn by_weight(product_id: &str, name: &str, price_per_kg: Money) -> Self {
        CatalogItem {
            product_id: product_id.to_string(),
            name: name.to_string(),
            unit_price: price_per_kg,
            sold_by_weight: true,
        }
    }
}

/// An optional extra charged on top of a line item (e.g. "bacon extra").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AddOn {
    pub name: String,
    pub price: Money,
}

// =============================================================================
// Line Item
// =============================================================================

/// How a line item's quantity is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pricing {
    /// Whole units, 1..=999.
    Unit { quantity: i64 },
    /// Weighed on the scale; `unit_price` is per kilogram.
    Weight { grams: u32 },
}

/// One line on the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineItem {
    pub id: String,
    pub product_id: String,
    pub name: String,
    pub unit_price: Money,
    pub pricing: Pricing,
    pub add_ons: Vec<AddOn>,
    pub note: Option<String>,
    /// Who at the table is paying for this item.
    pub payer: String,
}

impl LineItem {
    /// Prices a catalog item. The pricing mode must match how the product is sold.
    pub fn from_catalog(item: &CatalogItem, pricing: Pricing) -> CoreResult<Self> {
        validate_price_cents("unit price", item.unit_price.cents())?;
        validate_pricing(item.sold_by_weight, &pricing)?;

        Ok(LineItem {
            id: Uuid::new_v4().to_string(),
            product_id: item.product_id.clone(),
            name: item.name.clone(),
            unit_price: item.unit_price,
            pricing,
            add_ons: Vec::new(),
            note: None,
            payer: DEFAULT_PAYER_LABEL.to_string(),
        })
    }

    pub fn with_add_ons(mut self, add_ons: Vec<AddOn>) -> CoreResult<Self> {
        for add_on in &add_ons {
            validate_price_cents("add-on price", add_on.price.cents())?;
        }
        self.add_ons = add_ons;
        Ok(self)
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        self
    }

    pub fn with_payer(mut self, payer: &str) -> CoreResult<Self> {
        self.payer = validate_label("payer", payer)?;
        Ok(self)
    }

    /// Units for unit-priced items; weighed items count as one.
    pub fn quantity(&self) -> i64 {
        match self.pricing {
            Pricing::Unit { quantity } => quantity,
            Pricing::Weight { .. } => 1,
        }
    }

    /// Price of the line including add-ons.
    ///
    /// Add-ons are charged per unit; a weighed item carries them once.
    pub fn line_total(&self) -> Money {
        let add_ons: Money = self.add_ons.iter().map(|a| a.price).sum();
        match self.pricing {
            Pricing::Unit { quantity } => (self.unit_price + add_ons) * quantity,
            Pricing::Weight { grams } => Money::price_by_weight(self.unit_price, grams) + add_ons,
        }
    }
}

fn validate_pricing(sold_by_weight: bool, pricing: &Pricing) -> CoreResult<()> {
    match (sold_by_weight, pricing) {
        (false, Pricing::Unit { quantity }) => validate_quantity(*quantity)?,
        (true, Pricing::Weight { grams }) => validate_weight_grams(*grams)?,
        (true, Pricing::Unit { .. }) => {
            return Err(ValidationError::InvalidFormat {
                field: "pricing".to_string(),
                reason: "item is sold by weight".to_string(),
            }
            .into())
        }
        (false, Pricing::Weight { .. }) => {
            return Err(ValidationError::InvalidFormat {
                field: "pricing".to_string(),
                reason: "item is sold by unit".to_string(),
            }
            .into())
        }
    }
    Ok(())
}

// =============================================================================
// Person Group
// =============================================================================

/// Items attributed to one payer label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PersonGroup {
    pub payer: String,
    pub item_ids: Vec<String>,
    pub subtotal: Money,
}

// =============================================================================
// Order
// =============================================================================

/// An open tab at a table, counter or delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    pub id: String,
    pub label: String,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub items: Vec<LineItem>,
    pub discount: Money,
    pub surcharge: Money,
    /// Every payment recorded against this order, across settlements.
    pub payments: Vec<Payment>,
    /// Change handed back across all settlements.
    pub change_given: Money,
    /// Residual forgiven when the order settled within tolerance.
    pub written_off: Money,
    pub opened_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Opens an empty order.
    pub fn new(label: &str, kind: OrderKind, operator: &Operator) -> CoreResult<Self> {
        let label = validate_label("order label", label)?;
        let now = Utc::now();
        Ok(Order {
            id: Uuid::new_v4().to_string(),
            label,
            kind,
            status: OrderStatus::Open,
            items: Vec::new(),
            discount: Money::zero(),
            surcharge: Money::zero(),
            payments: Vec::new(),
            change_given: Money::zero(),
            written_off: Money::zero(),
            opened_by: operator.id.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    // -------------------------------------------------------------------------
    // Totals
    // -------------------------------------------------------------------------

    pub fn subtotal(&self) -> Money {
        self.items.iter().map(LineItem::line_total).sum()
    }

    pub fn total(&self) -> Money {
        self.subtotal() - self.discount + self.surcharge
    }

    /// Net amount received: payments minus change handed back.
    pub fn paid(&self) -> Money {
        let tendered: Money = self.payments.iter().map(|p| p.amount).sum();
        tendered - self.change_given
    }

    /// Total tendered by one payer across earlier settlements.
    pub fn paid_by(&self, payer: &str) -> Money {
        self.payments
            .iter()
            .filter(|p| p.payer_label == payer)
            .map(|p| p.amount)
            .sum()
    }

    /// What is still owed. Never negative.
    pub fn outstanding(&self) -> Money {
        if !self.status.accepts_changes() {
            return Money::zero();
        }
        (self.total() - self.paid()).non_negative()
    }

    pub fn item(&self, item_id: &str) -> Option<&LineItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    /// Items grouped by payer label, in order of first appearance.
    pub fn person_groups(&self) -> Vec<PersonGroup> {
        let mut groups: Vec<PersonGroup> = Vec::new();
        for item in &self.items {
            match groups.iter_mut().find(|g| g.payer == item.payer) {
                Some(group) => {
                    group.item_ids.push(item.id.clone());
                    group.subtotal += item.line_total();
                }
                None => groups.push(PersonGroup {
                    payer: item.payer.clone(),
                    item_ids: vec![item.id.clone()],
                    subtotal: item.line_total(),
                }),
            }
        }
        groups
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Fails with `InvalidState` unless the order still accepts changes.
    pub fn ensure_mutable(&self, operation: &str) -> CoreResult<()> {
        if self.status.accepts_changes() {
            Ok(())
        } else {
            Err(CoreError::invalid_state("order", &self.id, self.status, operation))
        }
    }

    /// Appends a line item and returns its id.
    pub fn add_item(&mut self, item: LineItem) -> CoreResult<String> {
        self.ensure_mutable("add items")?;
        validate_order_size(self.items.len())?;
        let id = item.id.clone();
        self.items.push(item);
        self.touch();
        Ok(id)
    }

    pub fn remove_item(&mut self, item_id: &str) -> CoreResult<LineItem> {
        self.ensure_mutable("remove items")?;
        let index = self.index_of(item_id)?;
        let removed = self.items.remove(index);
        if let Err(err) = self.ensure_total_covers_paid() {
            self.items.insert(index, removed);
            return Err(err);
        }
        self.touch();
        Ok(removed)
    }

    /// Changes the quantity or weight of a line item.
    pub fn update_pricing(&mut self, item_id: &str, pricing: Pricing) -> CoreResult<()> {
        self.ensure_mutable("change items")?;
        let index = self.index_of(item_id)?;
        let sold_by_weight = matches!(self.items[index].pricing, Pricing::Weight { .. });
        validate_pricing(sold_by_weight, &pricing)?;

        let previous = self.items[index].pricing;
        self.items[index].pricing = pricing;
        if let Err(err) = self.ensure_total_covers_paid() {
            self.items[index].pricing = previous;
            return Err(err);
        }
        self.touch();
        Ok(())
    }

    pub fn update_note(&mut self, item_id: &str, note: Option<String>) -> CoreResult<()> {
        self.ensure_mutable("change items")?;
        let index = self.index_of(item_id)?;
        self.items[index].note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        self.touch();
        Ok(())
    }

    /// Attributes a line item to a payer label.
    pub fn assign_payer(&mut self, item_id: &str, payer: &str) -> CoreResult<()> {
        self.ensure_mutable("assign payers")?;
        let payer = validate_label("payer", payer)?;
        let index = self.index_of(item_id)?;
        self.items[index].payer = payer;
        self.touch();
        Ok(())
    }

    /// Sets the order-level discount. Must not exceed the subtotal.
    pub fn apply_discount(&mut self, discount: Money) -> CoreResult<()> {
        self.ensure_mutable("apply a discount")?;
        validate_price_cents("discount", discount.cents())?;
        let subtotal = self.subtotal();
        if discount > subtotal {
            return Err(ValidationError::ExceedsLimit {
                field: "discount".to_string(),
                value_cents: discount.cents(),
                limit_cents: subtotal.cents(),
            }
            .into());
        }

        let previous = self.discount;
        self.discount = discount;
        if let Err(err) = self.ensure_total_covers_paid() {
            self.discount = previous;
            return Err(err);
        }
        self.touch();
        Ok(())
    }

    /// Sets the order-level surcharge (service charge, delivery fee).
    pub fn apply_surcharge(&mut self, surcharge: Money) -> CoreResult<()> {
        self.ensure_mutable("apply a surcharge")?;
        validate_price_cents("surcharge", surcharge.cents())?;
        let previous = self.surcharge;
        self.surcharge = surcharge;
        if let Err(err) = self.ensure_total_covers_paid() {
            self.surcharge = previous;
            return Err(err);
        }
        self.touch();
        Ok(())
    }

    /// Cancels an order nobody has paid anything towards.
    pub fn discard(&mut self) -> CoreResult<()> {
        self.ensure_mutable("discard")?;
        if !self.payments.is_empty() {
            return Err(CoreError::invalid_state(
                "order",
                &self.id,
                "partially paid",
                "discard",
            ));
        }
        self.status = OrderStatus::Cancelled;
        self.touch();
        Ok(())
    }

    fn index_of(&self, item_id: &str) -> CoreResult<usize> {
        self.items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or_else(|| CoreError::ItemNotFound {
                order_id: self.id.clone(),
                item_id: item_id.to_string(),
            })
    }

    /// Edits may not push the total below what was already received.
    fn ensure_total_covers_paid(&self) -> CoreResult<()> {
        let total = self.total();
        let paid = self.paid();
        if total < paid {
            return Err(ValidationError::ExceedsLimit {
                field: "amount already paid".to_string(),
                value_cents: paid.cents(),
                limit_cents: total.cents(),
            }
            .into());
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
