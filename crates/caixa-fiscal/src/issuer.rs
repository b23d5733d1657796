//! # Fiscal Issuer
//!
//! Drives a settlement's invoice through the authority and keeps the stored
//! invoice in step with what the authority says.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   not_submitted ──submit──► processing ──poll──► authorized             │
//! │        │                        │    │                │                 │
//! │        │ unreachable            │    └──poll──► rejected / error        │
//! │        ▼                        │                     │                 │
//! │      error ◄────────────────────┘          resubmit ──┘                 │
//! │                                                                         │
//! │   authorized ──cancel──► processing (pending) ──poll──► cancelled       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Authority outages never surface as errors from `submit`: the invoice is
//! stored in `error` with the transport message and waits for a resubmit or
//! a batch reprocess. Work on one invoice is serialized.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use crate::authority::{FiscalAuthority, InvoicePayload};
use crate::error::FiscalResult;
use crate::locks::KeyedLocks;
use caixa_core::{CoreError, FiscalInvoice, FiscalStatus, OrderStatus, Settlement};
use caixa_db::{Database, DbError};

// =============================================================================
// Batch Result
// =============================================================================

/// Counts from one batch reprocessing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub authorized: usize,
    /// Found cancelled at the authority without a local cancel.
    pub cancelled_detected: usize,
    pub failed: usize,
    /// Invoices handed to the authority again.
    pub resubmitted: usize,
    pub still_processing: usize,
}

impl BatchResult {
    pub fn total(&self) -> usize {
        self.authorized + self.cancelled_detected + self.failed + self.still_processing
    }
}

// =============================================================================
// Issuer
// =============================================================================

#[derive(Clone)]
pub struct FiscalIssuer {
    db: Database,
    authority: Arc<dyn FiscalAuthority>,
    locks: Arc<KeyedLocks>,
}

impl std::fmt::Debug for FiscalIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiscalIssuer").finish_non_exhaustive()
    }
}

impl FiscalIssuer {
    pub fn new(db: Database, authority: Arc<dyn FiscalAuthority>) -> Self {
        FiscalIssuer {
            db,
            authority,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    async fn load(&self, invoice_id: &str) -> FiscalResult<FiscalInvoice> {
        self.db
            .invoices()
            .get_by_id(invoice_id)
            .await?
            .ok_or_else(|| DbError::not_found("fiscal invoice", invoice_id).into())
    }

    /// Takes the invoice's lock (keyed by settlement) and loads it fresh.
    async fn load_locked(
        &self,
        invoice_id: &str,
    ) -> FiscalResult<(OwnedMutexGuard<()>, FiscalInvoice)> {
        let settlement_id = self.load(invoice_id).await?.settlement_id;
        let guard = self.locks.lock(&settlement_id).await;
        let invoice = self.load(invoice_id).await?;
        Ok((guard, invoice))
    }

    /// Hands the invoice for the order closed by `settlement` to the
    /// authority.
    ///
    /// Only a settlement that left its order settled can be invoiced.
    /// Creates the invoice row if the settlement has none yet. An invoice
    /// that is processing, authorized or cancelled is returned unchanged.
    pub async fn submit(&self, settlement: &Settlement) -> FiscalResult<FiscalInvoice> {
        if settlement.resulting_status != OrderStatus::Settled {
            return Err(CoreError::invalid_state(
                "settlement",
                &settlement.id,
                settlement.resulting_status,
                "issue an invoice for",
            )
            .into());
        }

        let _guard = self.locks.lock(&settlement.id).await;

        let invoice = match self.db.invoices().get_by_settlement(&settlement.id).await? {
            Some(invoice) => invoice,
            None => {
                let invoice = FiscalInvoice::new(&settlement.id, Utc::now());
                self.db.invoices().insert(&invoice).await?;
                invoice
            }
        };

        if !invoice.needs_submission() {
            debug!(
                invoice_id = %invoice.id,
                status = %invoice.status,
                "Invoice already submitted"
            );
            return Ok(invoice);
        }

        self.submit_locked(invoice, settlement).await
    }

    /// Submits a rejected, errored or never-submitted invoice again.
    pub async fn resubmit(&self, invoice_id: &str) -> FiscalResult<FiscalInvoice> {
        let invoice = self.load(invoice_id).await?;
        if !invoice.needs_submission() {
            return Err(CoreError::invalid_state(
                "fiscal invoice",
                &invoice.id,
                invoice.status,
                "resubmit",
            )
            .into());
        }

        let settlement = self
            .db
            .settlements()
            .get_by_id(&invoice.settlement_id)
            .await?
            .ok_or_else(|| DbError::not_found("settlement", &invoice.settlement_id))?;

        info!(invoice_id = %invoice.id, status = %invoice.status, "Resubmitting invoice");
        self.submit(&settlement).await
    }

    async fn submit_locked(
        &self,
        mut invoice: FiscalInvoice,
        settlement: &Settlement,
    ) -> FiscalResult<FiscalInvoice> {
        let order = self
            .db
            .orders()
            .get_by_id(&settlement.order_id)
            .await?
            .ok_or_else(|| DbError::not_found("order", &settlement.order_id))?;
        let payload = InvoicePayload::from_sale(&order, settlement)?;

        match self.authority.submit(&settlement.id, &payload).await {
            Ok(correlation_id) => {
                let transition = invoice.mark_submitted(&correlation_id, Utc::now())?;
                self.db.invoices().save(&invoice, Some(&transition)).await?;
                info!(
                    invoice_id = %invoice.id,
                    correlation_id = %correlation_id,
                    attempt = invoice.attempts,
                    "Invoice submitted"
                );
                Ok(invoice)
            }
            Err(err) if err.is_retryable() => {
                warn!(invoice_id = %invoice.id, error = %err, "Invoice submission failed");
                let transition = invoice.mark_submission_failed(&err.to_string(), Utc::now())?;
                self.db.invoices().save(&invoice, transition.as_ref()).await?;
                Ok(invoice)
            }
            Err(err) => Err(err),
        }
    }

    /// Asks the authority for the invoice's current status and applies it.
    ///
    /// A transport failure is recorded in `last_message` and returned; the
    /// invoice's status is left alone.
    pub async fn poll_status(&self, invoice_id: &str) -> FiscalResult<FiscalInvoice> {
        let (_guard, mut invoice) = self.load_locked(invoice_id).await?;

        let correlation_id = invoice.correlation_id.clone().ok_or_else(|| {
            CoreError::invalid_state("fiscal invoice", &invoice.id, invoice.status, "poll")
        })?;

        let answer = match self.authority.query_status(&correlation_id).await {
            Ok(answer) => answer,
            Err(err) => {
                if err.is_retryable() {
                    invoice.last_message = Some(err.to_string());
                    invoice.updated_at = Utc::now();
                    self.db.invoices().save(&invoice, None).await?;
                }
                return Err(err);
            }
        };

        let before = invoice.clone();
        let transition = match invoice.apply_outcome(answer.outcome(), Utc::now()) {
            Ok(transition) => transition,
            Err(CoreError::InvalidState { .. }) => {
                // The authority answered with a status this invoice cannot
                // move to from where it is. Keep the answer for the operator.
                warn!(
                    invoice_id = %invoice.id,
                    status = %invoice.status,
                    answer = %answer.status,
                    "Authority status does not apply to invoice"
                );
                invoice = before;
                invoice.last_message = Some(format!("unexpected authority status: {}", answer.status));
                invoice.updated_at = Utc::now();
                self.db.invoices().save(&invoice, None).await?;
                return Ok(invoice);
            }
            Err(err) => return Err(err.into()),
        };
        if invoice != before {
            self.db.invoices().save(&invoice, transition.as_ref()).await?;
        }

        if let Some(t) = &transition {
            info!(
                invoice_id = %invoice.id,
                from = %t.from,
                to = %t.to,
                "Invoice status changed"
            );
        }
        Ok(invoice)
    }

    /// Requests cancellation of an authorized invoice.
    ///
    /// The reason is checked before anything is sent. On success the invoice
    /// is `processing` until a poll sees the authority's verdict.
    pub async fn cancel(&self, invoice_id: &str, reason: &str) -> FiscalResult<FiscalInvoice> {
        let (_guard, mut invoice) = self.load_locked(invoice_id).await?;

        let reason = invoice.check_cancellable(reason)?;
        let correlation_id = invoice.correlation_id.clone().ok_or_else(|| {
            CoreError::invalid_state("fiscal invoice", &invoice.id, invoice.status, "cancel")
        })?;

        if let Err(err) = self
            .authority
            .request_cancellation(&correlation_id, &reason)
            .await
        {
            warn!(invoice_id = %invoice.id, error = %err, "Cancellation request failed");
            invoice.last_message = Some(format!("cancellation request failed: {}", err));
            invoice.updated_at = Utc::now();
            self.db.invoices().save(&invoice, None).await?;
            return Err(err);
        }

        let transition = invoice.request_cancellation(&reason, Utc::now())?;
        self.db.invoices().save(&invoice, Some(&transition)).await?;
        info!(invoice_id = %invoice.id, "Invoice cancellation requested");
        Ok(invoice)
    }

    /// Reprocesses stored invoices that are not submitted, rejected or in
    /// error, optionally limited to a creation time range.
    pub async fn reprocess_pending(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> FiscalResult<BatchResult> {
        let invoices = self
            .db
            .invoices()
            .list_by_status(
                &[
                    FiscalStatus::NotSubmitted,
                    FiscalStatus::Rejected,
                    FiscalStatus::Error,
                ],
                since,
                until,
            )
            .await?;
        Ok(self.batch_reprocess(&invoices).await)
    }

    /// Brings each invoice up to date, one at a time.
    ///
    /// Invoices with a correlation id are polled first, since they may have
    /// been authorized or cancelled out of band. Anything still rejected,
    /// errored or never submitted is resubmitted and polled once. A failure
    /// is counted and the batch moves on.
    pub async fn batch_reprocess(&self, invoices: &[FiscalInvoice]) -> BatchResult {
        let mut result = BatchResult::default();
        info!(count = invoices.len(), "Reprocessing invoices");

        for invoice in invoices {
            match self.reprocess_one(invoice, &mut result).await {
                Ok(current) => match current.status {
                    FiscalStatus::Authorized => result.authorized += 1,
                    FiscalStatus::Cancelled => result.cancelled_detected += 1,
                    FiscalStatus::Processing => result.still_processing += 1,
                    _ => result.failed += 1,
                },
                Err(err) => {
                    error!(invoice_id = %invoice.id, error = %err, "Invoice reprocessing failed");
                    result.failed += 1;
                }
            }
        }

        info!(
            authorized = result.authorized,
            cancelled = result.cancelled_detected,
            failed = result.failed,
            resubmitted = result.resubmitted,
            processing = result.still_processing,
            "Reprocessing finished"
        );
        result
    }

    async fn reprocess_one(
        &self,
        invoice: &FiscalInvoice,
        result: &mut BatchResult,
    ) -> FiscalResult<FiscalInvoice> {
        let mut current = if invoice.correlation_id.is_some() {
            self.poll_status(&invoice.id).await?
        } else {
            invoice.clone()
        };

        if current.needs_submission() {
            current = self.resubmit(&current.id).await?;
            if current.status == FiscalStatus::Processing {
                result.resubmitted += 1;
                current = self.poll_status(&current.id).await?;
            }
        }
        Ok(current)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::AuthorityStatus;
    use crate::error::FiscalError;
    use async_trait::async_trait;
    use caixa_core::allocator::{confirm_settlement, SettlementContext};
    use caixa_core::money::DEFAULT_TOLERANCE;
    use caixa_core::{
        AllocationDraft, AllocationMode, CashSession, CatalogItem, LineItem, Money, Operator,
        Order, OrderKind, PaymentInstrument, Pricing,
    };
    use caixa_db::DbConfig;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Authority that answers from a script.
    #[derive(Default)]
    struct ScriptedAuthority {
        submitted: Mutex<Vec<String>>,
        failing_submits: Mutex<usize>,
        statuses: Mutex<VecDeque<FiscalResult<AuthorityStatus>>>,
        cancellations: Mutex<Vec<String>>,
    }

    impl ScriptedAuthority {
        fn answer(&self, status: FiscalResult<AuthorityStatus>) {
            self.statuses.lock().unwrap().push_back(status);
        }

        fn fail_next_submits(&self, n: usize) {
            *self.failing_submits.lock().unwrap() = n;
        }

        fn submit_count(&self) -> usize {
            self.submitted.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl FiscalAuthority for ScriptedAuthority {
        async fn submit(&self, reference: &str, _payload: &InvoicePayload) -> FiscalResult<String> {
            let mut failing = self.failing_submits.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(FiscalError::ExternalFailure("connection refused".into()));
            }
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(reference.to_string());
            Ok(format!("corr-{}", submitted.len()))
        }

        async fn query_status(&self, _correlation_id: &str) -> FiscalResult<AuthorityStatus> {
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(AuthorityStatus::new("processando")))
        }

        async fn request_cancellation(&self, correlation_id: &str, _reason: &str) -> FiscalResult<()> {
            self.cancellations
                .lock()
                .unwrap()
                .push(correlation_id.to_string());
            Ok(())
        }
    }

    async fn setup() -> (FiscalIssuer, Arc<ScriptedAuthority>, Database, Settlement) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let op = Operator::new("op-1", "Marta");
        let session = CashSession::open(&op, "T1", Money::zero(), Utc::now()).unwrap();
        db.sessions().open(&session).await.unwrap();

        let mut order = Order::new("Mesa 1", OrderKind::Table, &op).unwrap();
        let dish = CatalogItem::unit("d", "Moqueca", Money::from_cents(8900));
        order
            .add_item(LineItem::from_catalog(&dish, Pricing::Unit { quantity: 1 }).unwrap())
            .unwrap();
        db.orders().insert(&order).await.unwrap();

        let draft = AllocationDraft::propose(&order, AllocationMode::Lump, PaymentInstrument::Credit);
        let ctx = SettlementContext {
            operator: &op,
            session_id: &session.id,
            tolerance: DEFAULT_TOLERANCE,
            now: Utc::now(),
        };
        let settlement = confirm_settlement(&mut order, &draft, &ctx).unwrap();
        let invoice = FiscalInvoice::new(&settlement.id, Utc::now());
        db.settlements()
            .record(&settlement, &order, Some(&invoice))
            .await
            .unwrap();

        let authority = Arc::new(ScriptedAuthority::default());
        let issuer = FiscalIssuer::new(db.clone(), authority.clone());
        (issuer, authority, db, settlement)
    }

    #[tokio::test]
    async fn test_submit_is_idempotent() {
        let (issuer, authority, _, settlement) = setup().await;

        let first = issuer.submit(&settlement).await.unwrap();
        let second = issuer.submit(&settlement).await.unwrap();

        assert_eq!(first.status, FiscalStatus::Processing);
        assert_eq!(first.correlation_id, second.correlation_id);
        assert_eq!(authority.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_authority_is_stored_not_thrown() {
        let (issuer, authority, db, settlement) = setup().await;
        authority.fail_next_submits(1);

        let invoice = issuer.submit(&settlement).await.unwrap();
        assert_eq!(invoice.status, FiscalStatus::Error);
        assert!(invoice.last_message.unwrap().contains("connection refused"));

        let stored = db.invoices().get_by_id(&invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FiscalStatus::Error);

        let again = issuer.resubmit(&invoice.id).await.unwrap();
        assert_eq!(again.status, FiscalStatus::Processing);
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn test_reject_then_resubmit_then_authorize() {
        let (issuer, authority, db, settlement) = setup().await;
        let invoice = issuer.submit(&settlement).await.unwrap();

        authority.answer(Ok(AuthorityStatus::new("rejeitado").with_message("CPF inválido")));
        let rejected = issuer.poll_status(&invoice.id).await.unwrap();
        assert_eq!(rejected.status, FiscalStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("CPF inválido"));

        let resubmitted = issuer.resubmit(&invoice.id).await.unwrap();
        assert_eq!(resubmitted.status, FiscalStatus::Processing);

        authority.answer(Ok(AuthorityStatus::new("autorizado").with_document_ref("NFC-42")));
        let authorized = issuer.poll_status(&invoice.id).await.unwrap();
        assert_eq!(authorized.status, FiscalStatus::Authorized);
        assert_eq!(authorized.document_ref.as_deref(), Some("NFC-42"));

        let events = db.invoices().events(&invoice.id).await.unwrap();
        let path: Vec<FiscalStatus> = events.iter().map(|e| e.to).collect();
        assert_eq!(
            path,
            vec![
                FiscalStatus::Processing,
                FiscalStatus::Rejected,
                FiscalStatus::Processing,
                FiscalStatus::Authorized
            ]
        );
    }

    #[tokio::test]
    async fn test_resubmit_authorized_is_invalid() {
        let (issuer, authority, _, settlement) = setup().await;
        let invoice = issuer.submit(&settlement).await.unwrap();
        authority.answer(Ok(AuthorityStatus::new("autorizado")));
        issuer.poll_status(&invoice.id).await.unwrap();

        let err = issuer.resubmit(&invoice.id).await.unwrap_err();
        assert!(matches!(err, FiscalError::Core(CoreError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_poll_transport_failure_keeps_status() {
        let (issuer, authority, db, settlement) = setup().await;
        let invoice = issuer.submit(&settlement).await.unwrap();

        authority.answer(Err(FiscalError::Timeout(15)));
        let err = issuer.poll_status(&invoice.id).await.unwrap_err();
        assert!(err.is_retryable());

        let stored = db.invoices().get_by_id(&invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FiscalStatus::Processing);
        assert!(stored.last_message.is_some());
    }

    #[tokio::test]
    async fn test_inapplicable_status_is_recorded_not_thrown() {
        let (issuer, authority, db, settlement) = setup().await;
        let invoice = issuer.submit(&settlement).await.unwrap();
        authority.answer(Ok(AuthorityStatus::new("autorizado").with_document_ref("NFC-9")));
        issuer.poll_status(&invoice.id).await.unwrap();

        // Authorized invoices cannot become rejected
        authority.answer(Ok(AuthorityStatus::new("rejeitado").with_message("duplicidade")));
        let current = issuer.poll_status(&invoice.id).await.unwrap();

        assert_eq!(current.status, FiscalStatus::Authorized);
        assert_eq!(current.document_ref.as_deref(), Some("NFC-9"));
        assert!(current.rejection_reason.is_none());
        assert!(current.last_message.as_deref().unwrap().contains("rejeitado"));

        let stored = db.invoices().get_by_id(&invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FiscalStatus::Authorized);
        assert_eq!(stored.last_message, current.last_message);
        let events = db.invoices().events(&invoice.id).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_settlement_is_not_invoiced() {
        let (issuer, authority, db, settlement) = setup().await;
        let mut partial = settlement.clone();
        partial.id = "partial-1".to_string();
        partial.resulting_status = OrderStatus::PartiallySettled;

        let err = issuer.submit(&partial).await.unwrap_err();
        assert!(matches!(err, FiscalError::Core(CoreError::InvalidState { .. })));
        assert!(db.invoices().get_by_settlement("partial-1").await.unwrap().is_none());
        assert_eq!(authority.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_flow() {
        let (issuer, authority, _, settlement) = setup().await;
        let invoice = issuer.submit(&settlement).await.unwrap();
        authority.answer(Ok(AuthorityStatus::new("autorizado")));
        issuer.poll_status(&invoice.id).await.unwrap();

        let err = issuer.cancel(&invoice.id, "cli").await.unwrap_err();
        assert!(matches!(err, FiscalError::Core(CoreError::Validation(_))));
        assert!(authority.cancellations.lock().unwrap().is_empty());

        let pending = issuer
            .cancel(&invoice.id, "Produto trocado errado")
            .await
            .unwrap();
        assert_eq!(pending.status, FiscalStatus::Processing);
        assert!(pending.is_cancellation_pending());

        authority.answer(Ok(AuthorityStatus::new("cancelado")));
        let cancelled = issuer.poll_status(&invoice.id).await.unwrap();
        assert_eq!(cancelled.status, FiscalStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_batch_reprocess() {
        let (issuer, authority, _, settlement) = setup().await;
        authority.fail_next_submits(1);
        issuer.submit(&settlement).await.unwrap();

        // The retry goes through and the authority authorizes straight away
        authority.answer(Ok(AuthorityStatus::new("autorizado")));
        let result = issuer.reprocess_pending(None, None).await.unwrap();

        assert_eq!(result.resubmitted, 1);
        assert_eq!(result.authorized, 1);
        assert_eq!(result.failed, 0);
        assert_eq!(result.total(), 1);

        // Nothing left to do
        let empty = issuer.reprocess_pending(None, None).await.unwrap();
        assert_eq!(empty, BatchResult::default());
    }

    #[tokio::test]
    async fn test_batch_detects_out_of_band_authorization() {
        let (issuer, authority, _, settlement) = setup().await;
        let invoice = issuer.submit(&settlement).await.unwrap();
        authority.answer(Ok(AuthorityStatus::new("rejeitado").with_message("timeout SEFAZ")));
        let rejected = issuer.poll_status(&invoice.id).await.unwrap();

        // Authorized at the authority in the meantime
        authority.answer(Ok(AuthorityStatus::new("autorizado").with_document_ref("NFC-7")));
        let result = issuer.batch_reprocess(&[rejected]).await;

        assert_eq!(result.authorized, 1);
        assert_eq!(result.resubmitted, 0);
        assert_eq!(authority.submit_count(), 1);
    }
}
