//! # Settlement Orchestrator
//!
//! The till's operations, wired over the core rules, storage and the fiscal
//! issuer.
//!
//! ## Settlement Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  confirm_settlement(order_id, draft, session_id, operator)              │
//! │                                                                         │
//! │  1. lock order_id ─────────── one confirmation per order at a time      │
//! │  2. load order + session ──── session must be open                      │
//! │  3. allocator::confirm ────── validates, computes change / remaining    │
//! │  4. one transaction ───────── settlement + payments + order + invoice   │
//! │  5. unlock, emit SettlementConfirmed                                    │
//! │  6. (fiscal, auto issue) ──── background: submit ──► spawn poll         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The settlement is durable once step 4 commits. Nothing in step 6 can
//! fail the confirmation; authority trouble ends up on the invoice row.
//!
//! ## Operator Identity
//! Every operation that creates a record takes the [`Operator`] explicitly.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use caixa_core::allocator::{confirm_settlement, propose_allocation, SettlementContext};
use caixa_core::{
    AllocationDraft, AllocationMode, CashSession, ClosedSessionReport, CoreResult, FiscalInvoice,
    FiscalStatus, InvoiceTransition, LineItem, Money, MovementKind, Movement, Operator, Order,
    OrderKind, OrderStatus, PaymentInstrument, Pricing, ProposedShare, SessionTotals, Settlement,
};
use caixa_db::Database;
use caixa_fiscal::{
    BatchResult, FiscalAuthority, FiscalEventEmitter, FiscalIssuer, HttpFiscalAuthority,
    KeyedLocks, PollTarget, PollerConfig,
};

use crate::config::TillConfig;
use crate::error::{TillError, TillResult};
use crate::events::{EventEmitter, FiscalBridge, NoOpEmitter, TillEvent};
use crate::registry::PollRegistry;

/// Figures for an open session, mid-shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session: CashSession,
    pub totals: SessionTotals,
    /// Cash that should be in the drawer right now.
    pub expected: Money,
}

// =============================================================================
// Till
// =============================================================================

pub struct Till {
    db: Database,
    terminal_id: String,
    tolerance: Money,
    auto_issue: bool,
    issuer: Option<Arc<FiscalIssuer>>,
    poller: PollerConfig,
    emitter: Arc<dyn EventEmitter>,
    order_locks: KeyedLocks,
    polls: Arc<PollRegistry>,
}

impl std::fmt::Debug for Till {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Till")
            .field("terminal_id", &self.terminal_id)
            .field("tolerance", &self.tolerance)
            .field("fiscal", &self.issuer.is_some())
            .finish_non_exhaustive()
    }
}

impl Till {
    /// Builds the till from configuration. With fiscal issuance enabled the
    /// HTTP authority client is created here.
    pub fn new(db: Database, config: &TillConfig) -> TillResult<Self> {
        let authority: Option<Arc<dyn FiscalAuthority>> = if config.fiscal.enabled {
            Some(Arc::new(HttpFiscalAuthority::new(&config.fiscal)?))
        } else {
            None
        };
        Ok(Self::build(db, config, authority))
    }

    /// Builds the till around a given authority client, regardless of
    /// `fiscal.enabled`.
    pub fn with_authority(
        db: Database,
        config: &TillConfig,
        authority: Arc<dyn FiscalAuthority>,
    ) -> Self {
        Self::build(db, config, Some(authority))
    }

    fn build(db: Database, config: &TillConfig, authority: Option<Arc<dyn FiscalAuthority>>) -> Self {
        let issuer = authority.map(|a| Arc::new(FiscalIssuer::new(db.clone(), a)));
        Till {
            db,
            terminal_id: config.terminal.id.clone(),
            tolerance: config.tolerance(),
            auto_issue: config.fiscal.auto_issue,
            issuer,
            poller: config.fiscal.poller_config(),
            emitter: Arc::new(NoOpEmitter),
            order_locks: KeyedLocks::new(),
            polls: Arc::new(PollRegistry::new()),
        }
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_poller_config(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    pub fn fiscal_enabled(&self) -> bool {
        self.issuer.is_some()
    }

    fn fiscal_emitter(&self) -> Arc<dyn FiscalEventEmitter> {
        Arc::new(FiscalBridge::new(self.emitter.clone()))
    }

    fn issuer(&self) -> TillResult<&Arc<FiscalIssuer>> {
        self.issuer
            .as_ref()
            .ok_or_else(|| TillError::invalid_state("fiscal issuance is disabled on this terminal"))
    }

    // =========================================================================
    // Orders
    // =========================================================================

    pub async fn open_order(
        &self,
        label: &str,
        kind: OrderKind,
        operator: &Operator,
    ) -> TillResult<Order> {
        let order = Order::new(label, kind, operator)?;
        self.db.orders().insert(&order).await?;
        info!(order_id = %order.id, label = %order.label, operator = %operator.id, "Order opened");
        Ok(order)
    }

    pub async fn order(&self, order_id: &str) -> TillResult<Order> {
        self.db
            .orders()
            .get_by_id(order_id)
            .await?
            .ok_or_else(|| TillError::not_found("order", order_id))
    }

    /// Orders still open or partially settled.
    pub async fn active_orders(&self) -> TillResult<Vec<Order>> {
        Ok(self.db.orders().list_active().await?)
    }

    /// Applies an edit under the order's lock and saves the result.
    async fn edit_order<F>(&self, order_id: &str, edit: F) -> TillResult<Order>
    where
        F: FnOnce(&mut Order) -> CoreResult<()>,
    {
        let _guard = self.order_locks.lock(order_id).await;
        let mut order = self.order(order_id).await?;
        edit(&mut order)?;
        self.db.orders().update(&order).await?;
        Ok(order)
    }

    pub async fn add_item(&self, order_id: &str, item: LineItem) -> TillResult<Order> {
        debug!(order_id = %order_id, product = %item.product_id, "Adding item");
        self.edit_order(order_id, |order| order.add_item(item).map(|_| ()))
            .await
    }

    pub async fn remove_item(&self, order_id: &str, item_id: &str) -> TillResult<Order> {
        self.edit_order(order_id, |order| order.remove_item(item_id).map(|_| ()))
            .await
    }

    /// Changes an item's quantity or weight.
    pub async fn update_pricing(
        &self,
        order_id: &str,
        item_id: &str,
        pricing: Pricing,
    ) -> TillResult<Order> {
        self.edit_order(order_id, |order| order.update_pricing(item_id, pricing))
            .await
    }

    pub async fn update_note(
        &self,
        order_id: &str,
        item_id: &str,
        note: Option<String>,
    ) -> TillResult<Order> {
        self.edit_order(order_id, |order| order.update_note(item_id, note))
            .await
    }

    pub async fn assign_payer(
        &self,
        order_id: &str,
        item_id: &str,
        payer: &str,
    ) -> TillResult<Order> {
        self.edit_order(order_id, |order| order.assign_payer(item_id, payer))
            .await
    }

    pub async fn apply_discount(&self, order_id: &str, discount: Money) -> TillResult<Order> {
        self.edit_order(order_id, |order| order.apply_discount(discount))
            .await
    }

    pub async fn apply_surcharge(&self, order_id: &str, surcharge: Money) -> TillResult<Order> {
        self.edit_order(order_id, |order| order.apply_surcharge(surcharge))
            .await
    }

    /// Cancels an order nobody has paid anything on.
    pub async fn discard_order(&self, order_id: &str) -> TillResult<Order> {
        let order = self.edit_order(order_id, |order| order.discard()).await?;
        info!(order_id = %order_id, "Order discarded");
        Ok(order)
    }

    // =========================================================================
    // Allocation & Settlement
    // =========================================================================

    pub async fn propose(&self, order_id: &str, mode: AllocationMode) -> TillResult<Vec<ProposedShare>> {
        let order = self.order(order_id).await?;
        Ok(propose_allocation(&order, &mode))
    }

    /// A fresh editable draft for the settlement screen.
    pub async fn draft(
        &self,
        order_id: &str,
        mode: AllocationMode,
        instrument: PaymentInstrument,
    ) -> TillResult<AllocationDraft> {
        let order = self.order(order_id).await?;
        Ok(AllocationDraft::propose(&order, mode, instrument))
    }

    /// Confirms the selected draft rows as one settlement.
    ///
    /// ## Errors
    /// - `NOT_FOUND`: unknown order or session
    /// - `INVALID_STATE`: closed session, settled/cancelled order
    /// - `VALIDATION_ERROR` / `ARITHMETIC_ERROR`: rejected amounts
    pub async fn confirm_settlement(
        &self,
        order_id: &str,
        draft: &AllocationDraft,
        session_id: &str,
        operator: &Operator,
    ) -> TillResult<Settlement> {
        let guard = self.order_locks.lock(order_id).await;

        let mut order = self.order(order_id).await?;
        let session = self.session(session_id).await?;
        session.ensure_open("settle orders")?;

        let now = Utc::now();
        let ctx = SettlementContext {
            operator,
            session_id,
            tolerance: self.tolerance,
            now,
        };
        let settlement = confirm_settlement(&mut order, draft, &ctx)?;

        // One invoice per sale, opened by the settlement that closes the order.
        let closes_order = settlement.resulting_status == OrderStatus::Settled;
        let invoice = self
            .issuer
            .as_ref()
            .filter(|_| closes_order)
            .map(|_| FiscalInvoice::new(&settlement.id, now));
        self.db
            .settlements()
            .record(&settlement, &order, invoice.as_ref())
            .await?;
        drop(guard);

        info!(
            order_id = %order_id,
            settlement_id = %settlement.id,
            applied = %settlement.applied,
            change = %settlement.change,
            remaining = %settlement.remaining,
            status = %settlement.resulting_status,
            "Settlement confirmed"
        );
        if settlement.written_off.is_positive() {
            warn!(
                order_id = %order_id,
                written_off = %settlement.written_off,
                "Residual within tolerance written off"
            );
        }

        self.emitter.emit(TillEvent::SettlementConfirmed {
            settlement: settlement.clone(),
        });

        if self.auto_issue && closes_order {
            self.issue_in_background(&settlement);
        }

        Ok(settlement)
    }

    /// Submits the settlement's invoice and starts its poll, off the
    /// caller's path.
    fn issue_in_background(&self, settlement: &Settlement) {
        let Some(issuer) = self.issuer.clone() else {
            return;
        };
        let polls = self.polls.clone();
        let poller = self.poller;
        let emitter = self.emitter.clone();
        let fiscal_emitter = self.fiscal_emitter();
        let settlement = settlement.clone();

        tokio::spawn(async move {
            let submitted = issuer.submit(&settlement).await;
            match submitted {
                Ok(invoice) if invoice.status == FiscalStatus::Processing => {
                    let target: Arc<dyn PollTarget> = issuer;
                    polls.start_for_open_session(
                        target,
                        &invoice.id,
                        &settlement.session_id,
                        poller,
                        fiscal_emitter,
                    );
                }
                Ok(invoice) => {
                    warn!(
                        invoice_id = %invoice.id,
                        status = %invoice.status,
                        message = ?invoice.last_message,
                        "Invoice not accepted for processing"
                    );
                    emitter.emit(TillEvent::InvoiceResolved { invoice });
                }
                Err(err) => {
                    error!(settlement_id = %settlement.id, error = %err, "Automatic invoice issuance failed");
                }
            }
        });
    }

    pub async fn settlement(&self, settlement_id: &str) -> TillResult<Settlement> {
        self.db
            .settlements()
            .get_by_id(settlement_id)
            .await?
            .ok_or_else(|| TillError::not_found("settlement", settlement_id))
    }

    pub async fn order_settlements(&self, order_id: &str) -> TillResult<Vec<Settlement>> {
        Ok(self.db.settlements().list_by_order(order_id).await?)
    }

    /// Settlements confirmed in `[since, until)`.
    pub async fn settlements_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> TillResult<Vec<Settlement>> {
        Ok(self.db.settlements().list_between(Some(since), Some(until)).await?)
    }

    // =========================================================================
    // Cash Sessions
    // =========================================================================

    /// Opens the operator's session on this terminal.
    ///
    /// Fails with `CONFLICT` while another session is open for the same
    /// operator and terminal.
    pub async fn open_session(
        &self,
        operator: &Operator,
        opening_float: Money,
    ) -> TillResult<CashSession> {
        let session = CashSession::open(operator, &self.terminal_id, opening_float, Utc::now())?;
        self.db.sessions().open(&session).await?;
        Ok(session)
    }

    pub async fn session(&self, session_id: &str) -> TillResult<CashSession> {
        self.db
            .sessions()
            .get_by_id(session_id)
            .await?
            .ok_or_else(|| TillError::not_found("cash session", session_id))
    }

    /// The operator's open session on this terminal, if any.
    pub async fn current_session(&self, operator: &Operator) -> TillResult<Option<CashSession>> {
        Ok(self
            .db
            .sessions()
            .find_open(&operator.id, &self.terminal_id)
            .await?)
    }

    /// Records a supply or withdrawal on an open session.
    pub async fn record_movement(
        &self,
        session_id: &str,
        kind: MovementKind,
        amount: Money,
        reason: &str,
        operator: &Operator,
    ) -> TillResult<Movement> {
        let mut session = self.session(session_id).await?;
        let movement = session.record_movement(kind, amount, reason, operator, Utc::now())?;
        self.db.sessions().add_movement(&movement).await?;

        info!(
            session_id = %session_id,
            kind = ?kind,
            amount = %amount,
            operator = %operator.id,
            "Cash movement recorded"
        );
        Ok(movement)
    }

    /// Running figures, computed from the settlement and movement logs.
    pub async fn session_summary(&self, session_id: &str) -> TillResult<SessionSummary> {
        let session = self.session(session_id).await?;
        let settlements = self.db.settlements().list_by_session(session_id).await?;
        let totals = session.totals(&settlements);
        let expected = session.compute_expected(&settlements);
        Ok(SessionSummary {
            session,
            totals,
            expected,
        })
    }

    /// Closes the session against the counted drawer and stops its polls.
    ///
    /// A nonzero variance is recorded on the report, never refused.
    pub async fn close_session(
        &self,
        session_id: &str,
        counted: Money,
    ) -> TillResult<ClosedSessionReport> {
        let mut session = self.session(session_id).await?;
        let settlements = self.db.settlements().list_by_session(session_id).await?;
        let report = session.close(counted, &settlements, Utc::now())?;
        self.db.sessions().close(&session, &report).await?;

        if report.variance.is_zero() {
            info!(session_id = %session_id, expected = %report.expected, "Cash session closed");
        } else {
            warn!(
                session_id = %session_id,
                expected = %report.expected,
                counted = %report.counted,
                variance = %report.variance,
                "Cash session closed with variance"
            );
        }

        self.polls.stop_session(session_id);
        Ok(report)
    }

    /// The frozen report of a closed session.
    pub async fn session_report(&self, session_id: &str) -> TillResult<ClosedSessionReport> {
        self.db
            .sessions()
            .get_report(session_id)
            .await?
            .ok_or_else(|| TillError::invalid_state(format!("cash session {} is still open", session_id)))
    }

    // =========================================================================
    // Fiscal
    // =========================================================================

    pub async fn invoice(&self, invoice_id: &str) -> TillResult<FiscalInvoice> {
        self.db
            .invoices()
            .get_by_id(invoice_id)
            .await?
            .ok_or_else(|| TillError::not_found("fiscal invoice", invoice_id))
    }

    pub async fn invoice_for_settlement(&self, settlement_id: &str) -> TillResult<Option<FiscalInvoice>> {
        Ok(self.db.invoices().get_by_settlement(settlement_id).await?)
    }

    /// Every status change the invoice went through, oldest first.
    pub async fn invoice_history(&self, invoice_id: &str) -> TillResult<Vec<InvoiceTransition>> {
        Ok(self.db.invoices().events(invoice_id).await?)
    }

    /// Submits a settlement's invoice by hand and polls it. Only the
    /// settlement that closed its order has an invoice.
    pub async fn submit_invoice(&self, settlement_id: &str) -> TillResult<FiscalInvoice> {
        let issuer = self.issuer()?;
        let settlement = self.settlement(settlement_id).await?;
        let invoice = issuer.submit(&settlement).await?;
        self.watch(&invoice, &settlement.session_id);
        Ok(invoice)
    }

    /// Sends a rejected or errored invoice again and polls it.
    pub async fn resubmit_invoice(&self, invoice_id: &str) -> TillResult<FiscalInvoice> {
        let invoice = self.issuer()?.resubmit(invoice_id).await?;
        self.watch_by_settlement(&invoice).await?;
        Ok(invoice)
    }

    /// One status query, outside the background loop.
    pub async fn refresh_invoice(&self, invoice_id: &str) -> TillResult<FiscalInvoice> {
        Ok(self.issuer()?.poll_status(invoice_id).await?)
    }

    /// Requests cancellation of an authorized invoice and polls for the
    /// verdict. The reason must be 15 to 255 characters.
    pub async fn cancel_invoice(&self, invoice_id: &str, reason: &str) -> TillResult<FiscalInvoice> {
        let invoice = self.issuer()?.cancel(invoice_id, reason).await?;
        self.watch_by_settlement(&invoice).await?;
        Ok(invoice)
    }

    /// Stops the background poll of an invoice. The invoice keeps its status.
    pub fn stop_polling(&self, invoice_id: &str) -> bool {
        self.polls.stop(invoice_id)
    }

    pub fn is_polling(&self, invoice_id: &str) -> bool {
        self.polls.is_polling(invoice_id)
    }

    pub fn active_polls(&self) -> usize {
        self.polls.active()
    }

    /// Reprocesses rejected, errored and never-submitted invoices.
    pub async fn reprocess(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> TillResult<BatchResult> {
        Ok(self.issuer()?.reprocess_pending(since, until).await?)
    }

    async fn watch_by_settlement(&self, invoice: &FiscalInvoice) -> TillResult<()> {
        if invoice.status != FiscalStatus::Processing {
            return Ok(());
        }
        let settlement = self.settlement(&invoice.settlement_id).await?;
        self.watch(invoice, &settlement.session_id);
        Ok(())
    }

    fn watch(&self, invoice: &FiscalInvoice, session_id: &str) {
        let Some(issuer) = self.issuer.clone() else {
            return;
        };
        if invoice.status != FiscalStatus::Processing {
            return;
        }
        let target: Arc<dyn PollTarget> = issuer;
        self.polls
            .start(target, &invoice.id, session_id, self.poller, self.fiscal_emitter());
    }

    /// Stops every poll. New polls are refused afterwards.
    pub fn shutdown(&self) {
        info!(active = self.polls.active(), "Shutting down till");
        self.polls.stop_all();
    }
}

impl Drop for Till {
    fn drop(&mut self) {
        self.polls.stop_all();
    }
}
