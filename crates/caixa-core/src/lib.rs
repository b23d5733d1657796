//! # caixa-core: Pure Settlement Logic for Caixa PDV
//!
//! This crate holds the settlement rules of the till as pure functions with
//! zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Caixa PDV Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                 Till front end (external)                       │    │
//! │  │   Order screen ──► Split screen ──► Close-out ──► Fiscal panel  │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │              caixa-till (orchestrator + CLI)                    │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │               ★ caixa-core (THIS CRATE) ★                       │    │
//! │  │                                                                 │    │
//! │  │  ┌───────┐ ┌───────┐ ┌───────────┐ ┌─────────┐ ┌────────┐       │    │
//! │  │  │ money │ │ order │ │ allocator │ │ session │ │ fiscal │       │    │
//! │  │  └───────┘ └───────┘ └───────────┘ └─────────┘ └────────┘       │    │
//! │  │                                                                 │    │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │        caixa-db (SQLite)      caixa-fiscal (authority)          │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Integer centavo arithmetic, parsing, weight pricing
//! - [`types`] - Shared enums (statuses, instruments) and small values
//! - [`order`] - The order aggregate and its line items
//! - [`allocator`] - Split-payment proposals and settlement confirmation
//! - [`session`] - Cash session reconciliation
//! - [`fiscal`] - Fiscal invoice state machine
//! - [`validation`] - Input rules
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use caixa_core::allocator::{confirm_settlement, AllocationDraft, AllocationMode, SettlementContext};
//! use caixa_core::money::{Money, DEFAULT_TOLERANCE};
//! use caixa_core::order::{CatalogItem, LineItem, Order, Pricing};
//! use caixa_core::types::{OrderKind, OrderStatus, Operator, PaymentInstrument};
//!
//! let op = Operator::new("op-1", "Marta");
//! let mut order = Order::new("Mesa 9", OrderKind::Table, &op).unwrap();
//! let dish = CatalogItem::unit("p-1", "Moqueca", Money::from_cents(4250));
//! order.add_item(LineItem::from_catalog(&dish, Pricing::Unit { quantity: 1 }).unwrap()).unwrap();
//!
//! let mut draft = AllocationDraft::propose(&order, AllocationMode::Lump, PaymentInstrument::Cash);
//! draft.set_amount("mesa", Money::from_cents(5000)).unwrap();
//!
//! let ctx = SettlementContext {
//!     operator: &op,
//!     session_id: "session-1",
//!     tolerance: DEFAULT_TOLERANCE,
//!     now: chrono::Utc::now(),
//! };
//! let settlement = confirm_settlement(&mut order, &draft, &ctx).unwrap();
//!
//! assert_eq!(settlement.change.cents(), 750);
//! assert_eq!(order.status, OrderStatus::Settled);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocator;
pub mod error;
pub mod fiscal;
pub mod money;
pub mod order;
pub mod session;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use allocator::{AllocationDraft, AllocationMode, ProposedShare, Settlement};
pub use error::{CoreError, CoreResult, ValidationError};
pub use fiscal::{AuthorityOutcome, FiscalInvoice, InvoiceTransition};
pub use money::Money;
pub use order::{CatalogItem, LineItem, Order, Pricing};
pub use session::{CashSession, ClosedSessionReport, Movement, SessionTotals};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Payer label given to items nobody has claimed yet.
pub const DEFAULT_PAYER_LABEL: &str = "mesa";

/// Maximum line items on one order.
pub const MAX_ORDER_ITEMS: usize = 200;

/// Maximum quantity of a single line item.
///
/// ## Business Reason
/// Prevents accidental over-ordering (typing 1000 instead of 10).
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Heaviest plate the scale integration accepts, in grams.
pub const MAX_WEIGHT_GRAMS: u32 = 50_000;

/// Labels (order, payer, terminal) are short by nature.
pub const MAX_LABEL_CHARS: usize = 60;

pub const MAX_MOVEMENT_REASON_CHARS: usize = 200;

/// The authority rejects cancellation justifications shorter than this.
pub const MIN_CANCELLATION_REASON_CHARS: usize = 15;

pub const MAX_CANCELLATION_REASON_CHARS: usize = 255;
