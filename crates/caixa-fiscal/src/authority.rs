//! # Fiscal Authority Contract
//!
//! The three calls the till makes to the NFC-e authority, and the payload it
//! sends. Tax classification fields are filled in on the authority side; the
//! till only supplies what was sold and how it was paid.
//!
//! ```text
//! submit(reference, payload)        ──► correlation id
//! query_status(correlation id)      ──► { status, document_ref, message }
//! request_cancellation(corr, reason) ─► ack
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FiscalResult;
use caixa_core::fiscal::normalize_status;
use caixa_core::{
    AuthorityOutcome, CoreError, Order, OrderStatus, PaymentInstrument, Pricing, Settlement,
    ValidationError,
};

// =============================================================================
// Payload
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub product_id: String,
    pub name: String,
    /// Units sold; zero for weighed items.
    pub quantity: i64,
    /// Grams sold; zero for unit items.
    pub weight_grams: u32,
    /// Unit price, or price per kilogram for weighed items, in centavos.
    pub unit_price_cents: i64,
    pub total_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePayment {
    pub instrument: PaymentInstrument,
    pub amount_cents: i64,
}

/// What the authority receives for one sale.
///
/// An order is invoiced once, when the settlement that closes it is
/// recorded. Partial settlements before it contribute their payments.
/// The item totals always reconcile:
///
/// ```text
/// Σ items.total_cents − discount_cents + surcharge_cents == total_cents
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePayload {
    /// Our idempotency key: the id of the closing settlement.
    pub reference: String,
    pub items: Vec<InvoiceItem>,
    /// Every payment the order received, across all its settlements.
    pub payments: Vec<InvoicePayment>,
    pub discount_cents: i64,
    pub surcharge_cents: i64,
    pub total_cents: i64,
    pub change_cents: i64,
    pub operator_name: String,
    pub issued_at: DateTime<Utc>,
}

impl InvoicePayload {
    /// Builds the payload from the closing settlement and its order.
    ///
    /// The settlement carries the item list as it stood when the order was
    /// settled; the order carries the payment history and price adjustments.
    pub fn from_sale(order: &Order, settlement: &Settlement) -> FiscalResult<Self> {
        if settlement.order_id != order.id {
            return Err(CoreError::from(ValidationError::InvalidFormat {
                field: "settlement".to_string(),
                reason: format!("belongs to order {}, not {}", settlement.order_id, order.id),
            })
            .into());
        }
        if settlement.resulting_status != OrderStatus::Settled {
            return Err(CoreError::invalid_state(
                "settlement",
                &settlement.id,
                settlement.resulting_status,
                "invoice",
            )
            .into());
        }
        if settlement.items.is_empty() {
            return Err(CoreError::from(ValidationError::Required {
                field: "invoice items".to_string(),
            })
            .into());
        }

        let items: Vec<InvoiceItem> = settlement
            .items
            .iter()
            .map(|item| {
                let (quantity, weight_grams) = match &item.pricing {
                    Pricing::Unit { quantity } => (*quantity, 0),
                    Pricing::Weight { grams } => (0, *grams),
                };
                InvoiceItem {
                    product_id: item.product_id.clone(),
                    name: item.name.clone(),
                    quantity,
                    weight_grams,
                    unit_price_cents: item.unit_price.cents(),
                    total_cents: item.line_total().cents(),
                }
            })
            .collect();

        let payments = order
            .payments
            .iter()
            .map(|p| InvoicePayment {
                instrument: p.instrument,
                amount_cents: p.amount.cents(),
            })
            .collect();

        let items_total: i64 = items.iter().map(|i| i.total_cents).sum();
        let total_cents = items_total - order.discount.cents() + order.surcharge.cents();

        Ok(InvoicePayload {
            reference: settlement.id.clone(),
            items,
            payments,
            discount_cents: order.discount.cents(),
            surcharge_cents: order.surcharge.cents(),
            total_cents,
            change_cents: order.change_given.cents(),
            operator_name: settlement.operator_name.clone(),
            issued_at: settlement.created_at,
        })
    }
}

// =============================================================================
// Status
// =============================================================================

/// Raw status answer, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityStatus {
    pub status: String,
    #[serde(default)]
    pub document_ref: Option<String>,
    /// Rejection reason or diagnostic text.
    #[serde(default)]
    pub message: Option<String>,
}

impl AuthorityStatus {
    pub fn new(status: &str) -> Self {
        AuthorityStatus {
            status: status.to_string(),
            document_ref: None,
            message: None,
        }
    }

    pub fn with_document_ref(mut self, document_ref: &str) -> Self {
        self.document_ref = Some(document_ref.to_string());
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    pub fn outcome(&self) -> AuthorityOutcome {
        normalize_status(
            &self.status,
            self.message.as_deref(),
            self.document_ref.as_deref(),
        )
    }
}

// =============================================================================
// Client Trait
// =============================================================================

/// Client for the fiscal authority.
///
/// `submit` must be idempotent on `reference`: submitting the same reference
/// twice returns the same correlation id.
#[async_trait]
pub trait FiscalAuthority: Send + Sync {
    async fn submit(&self, reference: &str, payload: &InvoicePayload) -> FiscalResult<String>;

    async fn query_status(&self, correlation_id: &str) -> FiscalResult<AuthorityStatus>;

    async fn request_cancellation(&self, correlation_id: &str, reason: &str) -> FiscalResult<()>;
}
