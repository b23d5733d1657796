//! # Till Events
//!
//! Notifications for whatever sits outside the engine: the receipt printer,
//! the kitchen display, the front end's toast messages. The till only emits;
//! formatting and printing happen elsewhere.
//!
//! ```text
//! confirm_settlement ──► SettlementConfirmed { settlement }
//! poll task          ──► InvoiceResolved { invoice }     (left processing)
//!                    └─► PollTimedOut { invoice_id }     (ceiling reached)
//! ```

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use caixa_core::{FiscalInvoice, Settlement};
use caixa_fiscal::FiscalEventEmitter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TillEvent {
    SettlementConfirmed { settlement: Settlement },

    /// The invoice reached `authorized`, `rejected`, `error` or `cancelled`.
    InvoiceResolved { invoice: FiscalInvoice },

    /// The poll loop gave up waiting. The invoice is still `processing`.
    PollTimedOut { invoice_id: String },
}

impl TillEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TillEvent::SettlementConfirmed { .. } => "settlement_confirmed",
            TillEvent::InvoiceResolved { .. } => "invoice_resolved",
            TillEvent::PollTimedOut { .. } => "poll_timed_out",
        }
    }
}

/// Receives till events.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: TillEvent);
}

/// No-op event emitter.
pub struct NoOpEmitter;

impl EventEmitter for NoOpEmitter {
    fn emit(&self, _event: TillEvent) {}
}

/// Fans events out to any number of subscribers.
///
/// Sending with no subscribers is not an error; the event is dropped.
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: broadcast::Sender<TillEvent>,
}

impl ChannelEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        ChannelEmitter { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TillEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChannelEmitter {
    fn default() -> Self {
        ChannelEmitter::new(64)
    }
}

impl EventEmitter for ChannelEmitter {
    fn emit(&self, event: TillEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            debug!(event = name, "No subscribers for till event");
        }
    }
}

/// Forwards poll task notifications as till events.
pub(crate) struct FiscalBridge {
    inner: Arc<dyn EventEmitter>,
}

impl FiscalBridge {
    pub(crate) fn new(inner: Arc<dyn EventEmitter>) -> Self {
        FiscalBridge { inner }
    }
}

impl FiscalEventEmitter for FiscalBridge {
    fn invoice_resolved(&self, invoice: &FiscalInvoice) {
        self.inner.emit(TillEvent::InvoiceResolved {
            invoice: invoice.clone(),
        });
    }

    fn poll_timed_out(&self, invoice_id: &str) {
        self.inner.emit(TillEvent::PollTimedOut {
            invoice_id: invoice_id.to_string(),
        });
    }
}
