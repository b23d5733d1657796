//! End-to-end till flows against an in-memory database and a scripted
//! fiscal authority.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use caixa_core::{
    AllocationMode, CatalogItem, FiscalStatus, LineItem, Money, MovementKind, Operator, OrderKind,
    OrderStatus, PaymentInstrument, Pricing,
};
use caixa_db::{Database, DbConfig};
use caixa_fiscal::{
    AuthorityStatus, FiscalAuthority, FiscalError, FiscalResult, InvoicePayload, PollerConfig,
};
use caixa_till::{ChannelEmitter, ErrorCode, Till, TillConfig, TillEvent};

// =============================================================================
// Fixtures
// =============================================================================

/// Answers status queries from a script; `processando` once it runs dry.
#[derive(Default)]
struct ScriptedAuthority {
    submitted: Mutex<Vec<String>>,
    payloads: Mutex<Vec<InvoicePayload>>,
    statuses: Mutex<VecDeque<AuthorityStatus>>,
    cancellations: Mutex<Vec<(String, String)>>,
    unreachable: AtomicBool,
}

impl ScriptedAuthority {
    fn answer(&self, status: AuthorityStatus) {
        self.statuses.lock().unwrap().push_back(status);
    }

    fn set_unreachable(&self, down: bool) {
        self.unreachable.store(down, Ordering::SeqCst);
    }

    fn submissions(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    fn last_payload(&self) -> Option<InvoicePayload> {
        self.payloads.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl FiscalAuthority for ScriptedAuthority {
    async fn submit(&self, reference: &str, payload: &InvoicePayload) -> FiscalResult<String> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(FiscalError::ExternalFailure("connection refused".into()));
        }
        assert_eq!(payload.reference, reference);
        self.payloads.lock().unwrap().push(payload.clone());
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(reference.to_string());
        Ok(format!("corr-{}", submitted.len()))
    }

    async fn query_status(&self, _correlation_id: &str) -> FiscalResult<AuthorityStatus> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(FiscalError::ExternalFailure("connection refused".into()));
        }
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| AuthorityStatus::new("processando")))
    }

    async fn request_cancellation(&self, correlation_id: &str, reason: &str) -> FiscalResult<()> {
        self.cancellations
            .lock()
            .unwrap()
            .push((correlation_id.to_string(), reason.to_string()));
        Ok(())
    }
}

fn operator() -> Operator {
    Operator::new("op-1", "Marta")
}

fn fast_polls() -> PollerConfig {
    PollerConfig {
        interval: Duration::from_millis(20),
        timeout: Duration::from_secs(5),
    }
}

async fn plain_till() -> Till {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    Till::new(db, &TillConfig::default()).unwrap()
}

async fn fiscal_till(
    authority: Arc<ScriptedAuthority>,
    polls: PollerConfig,
) -> (Till, broadcast::Receiver<TillEvent>) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let events = ChannelEmitter::default();
    let rx = events.subscribe();
    let till = Till::with_authority(db, &TillConfig::default(), authority)
        .with_emitter(Arc::new(events))
        .with_poller_config(polls);
    (till, rx)
}

/// Waits for the first event that `pick` accepts, skipping the rest.
async fn wait_for<T>(
    rx: &mut broadcast::Receiver<TillEvent>,
    mut pick: impl FnMut(TillEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if let Some(found) = pick(event) {
                return found;
            }
        }
    })
    .await
    .expect("timed out waiting for till event")
}

fn resolved(event: TillEvent) -> Option<caixa_core::FiscalInvoice> {
    match event {
        TillEvent::InvoiceResolved { invoice } => Some(invoice),
        _ => None,
    }
}

fn unit(name: &str, cents: i64) -> LineItem {
    let product = CatalogItem::unit(&name.to_lowercase(), name, Money::from_cents(cents));
    LineItem::from_catalog(&product, Pricing::Unit { quantity: 1 }).unwrap()
}

/// An open session plus an order holding a single item of `cents`.
async fn session_and_order(till: &Till, cents: i64) -> (String, String) {
    let op = operator();
    let session = till.open_session(&op, Money::zero()).await.unwrap();
    let order = till
        .open_order("Mesa 4", OrderKind::Table, &op)
        .await
        .unwrap();
    till.add_item(&order.id, unit("Moqueca", cents)).await.unwrap();
    (session.id, order.id)
}

// =============================================================================
// Allocation & Settlement
// =============================================================================

#[tokio::test]
async fn test_partition_proposal_is_capped_by_outstanding_balance() {
    let till = plain_till().await;
    let op = operator();
    let session = till.open_session(&op, Money::zero()).await.unwrap();
    let order = till
        .open_order("Mesa 2", OrderKind::Table, &op)
        .await
        .unwrap();

    // Ana 60,00 and Bruno 50,00 share a 10,00 courtesy: total 100,00.
    till.add_item(&order.id, unit("Picanha", 6000).with_payer("Ana").unwrap())
        .await
        .unwrap();
    till.add_item(&order.id, unit("Salmao", 5000).with_payer("Bruno").unwrap())
        .await
        .unwrap();
    let order = till
        .apply_discount(&order.id, Money::from_cents(1000))
        .await
        .unwrap();
    assert_eq!(order.total(), Money::from_cents(10000));

    let shares = till.propose(&order.id, AllocationMode::Partition).await.unwrap();
    let cents: Vec<(String, i64)> = shares
        .iter()
        .map(|s| (s.payer.clone(), s.amount.cents()))
        .collect();
    assert_eq!(cents, vec![("Ana".to_string(), 6000), ("Bruno".to_string(), 4000)]);

    let draft = till
        .draft(&order.id, AllocationMode::Partition, PaymentInstrument::Pix)
        .await
        .unwrap();
    let settlement = till
        .confirm_settlement(&order.id, &draft, &session.id, &op)
        .await
        .unwrap();

    assert_eq!(settlement.applied, Money::from_cents(10000));
    assert_eq!(settlement.resulting_status, OrderStatus::Settled);
    assert_eq!(till.order(&order.id).await.unwrap().status, OrderStatus::Settled);
}

#[tokio::test]
async fn test_partial_then_final_settlement() {
    let till = plain_till().await;
    let op = operator();
    let (session_id, order_id) = session_and_order(&till, 10000).await;

    let mut draft = till
        .draft(&order_id, AllocationMode::Lump, PaymentInstrument::Debit)
        .await
        .unwrap();
    draft.set_amount("mesa", Money::from_cents(7000)).unwrap();
    let first = till
        .confirm_settlement(&order_id, &draft, &session_id, &op)
        .await
        .unwrap();

    assert_eq!(first.resulting_status, OrderStatus::PartiallySettled);
    assert_eq!(first.remaining, Money::from_cents(3000));
    let order = till.order(&order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::PartiallySettled);
    assert_eq!(order.outstanding(), Money::from_cents(3000));

    let draft = till
        .draft(&order_id, AllocationMode::Lump, PaymentInstrument::Credit)
        .await
        .unwrap();
    assert_eq!(draft.selected_total(), Money::from_cents(3000));
    let second = till
        .confirm_settlement(&order_id, &draft, &session_id, &op)
        .await
        .unwrap();

    assert_eq!(second.resulting_status, OrderStatus::Settled);
    assert_eq!(second.remaining, Money::zero());
    assert_eq!(second.prior_paid, Money::from_cents(7000));
    assert_eq!(till.order_settlements(&order_id).await.unwrap().len(), 2);
    assert!(till.active_orders().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_confirms_settle_an_order_once() {
    let till = plain_till().await;
    let op = operator();
    let (session_id, order_id) = session_and_order(&till, 4500).await;

    let draft = till
        .draft(&order_id, AllocationMode::Lump, PaymentInstrument::Pix)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        till.confirm_settlement(&order_id, &draft, &session_id, &op),
        till.confirm_settlement(&order_id, &draft, &session_id, &op),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let err = outcomes.into_iter().find_map(Result::err).unwrap();
    assert_eq!(err.code, ErrorCode::InvalidState);

    let order = till.order(&order_id).await.unwrap();
    assert_eq!(order.paid(), Money::from_cents(4500));
}

#[tokio::test]
async fn test_overpayment_beyond_cash_is_refused() {
    let till = plain_till().await;
    let op = operator();
    let (session_id, order_id) = session_and_order(&till, 4500).await;

    let mut draft = till
        .draft(&order_id, AllocationMode::Lump, PaymentInstrument::Credit)
        .await
        .unwrap();
    draft.set_amount("mesa", Money::from_cents(5000)).unwrap();

    let err = till
        .confirm_settlement(&order_id, &draft, &session_id, &op)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationError);
    assert!(till.order_settlements(&order_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_settled_order_rejects_edits() {
    let till = plain_till().await;
    let op = operator();
    let (session_id, order_id) = session_and_order(&till, 2000).await;

    let draft = till
        .draft(&order_id, AllocationMode::Lump, PaymentInstrument::Cash)
        .await
        .unwrap();
    till.confirm_settlement(&order_id, &draft, &session_id, &op)
        .await
        .unwrap();

    let err = till.add_item(&order_id, unit("Cafe", 500)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);
    let err = till.discard_order(&order_id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);
}

// =============================================================================
// Cash Sessions
// =============================================================================

#[tokio::test]
async fn test_session_reconciliation() {
    let till = plain_till().await;
    let op = operator();
    let session = till
        .open_session(&op, Money::from_cents(5000))
        .await
        .unwrap();
    let order = till
        .open_order("Balcão", OrderKind::Counter, &op)
        .await
        .unwrap();
    till.add_item(&order.id, unit("Acai", 3500)).await.unwrap();

    let draft = till
        .draft(&order.id, AllocationMode::Lump, PaymentInstrument::Cash)
        .await
        .unwrap();
    till.confirm_settlement(&order.id, &draft, &session.id, &op)
        .await
        .unwrap();

    till.record_movement(&session.id, MovementKind::Supply, Money::from_cents(2000), "Reforço de troco", &op)
        .await
        .unwrap();
    till.record_movement(&session.id, MovementKind::Withdrawal, Money::from_cents(1000), "Sangria", &op)
        .await
        .unwrap();

    let summary = till.session_summary(&session.id).await.unwrap();
    assert_eq!(summary.expected, Money::from_cents(9500));
    assert_eq!(summary.totals.settlement_count, 1);

    let report = till
        .close_session(&session.id, Money::from_cents(9500))
        .await
        .unwrap();
    assert_eq!(report.expected, Money::from_cents(9500));
    assert_eq!(report.variance, Money::zero());
    assert_eq!(report.totals.supplies, Money::from_cents(2000));
    assert_eq!(report.totals.withdrawals, Money::from_cents(1000));
    let movements: Vec<(MovementKind, i64, &str)> = report
        .movements
        .iter()
        .map(|m| (m.kind, m.amount.cents(), m.reason.as_str()))
        .collect();
    assert_eq!(
        movements,
        vec![
            (MovementKind::Supply, 2000, "Reforço de troco"),
            (MovementKind::Withdrawal, 1000, "Sangria"),
        ]
    );

    assert_eq!(till.session_report(&session.id).await.unwrap(), report);

    let err = till
        .record_movement(&session.id, MovementKind::Supply, Money::from_cents(100), "Depois do fechamento", &op)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);
}

#[tokio::test]
async fn test_short_drawer_is_reported_not_refused() {
    let till = plain_till().await;
    let op = operator();
    let session = till
        .open_session(&op, Money::from_cents(10000))
        .await
        .unwrap();

    let report = till
        .close_session(&session.id, Money::from_cents(9250))
        .await
        .unwrap();
    assert_eq!(report.variance, Money::from_cents(-750));
}

#[tokio::test]
async fn test_second_open_session_conflicts() {
    let till = plain_till().await;
    let op = operator();
    let first = till.open_session(&op, Money::zero()).await.unwrap();

    let err = till.open_session(&op, Money::zero()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);

    let current = till.current_session(&op).await.unwrap().unwrap();
    assert_eq!(current.id, first.id);

    till.close_session(&first.id, Money::zero()).await.unwrap();
    assert!(till.open_session(&op, Money::zero()).await.is_ok());
}

#[tokio::test]
async fn test_settling_against_closed_session_fails() {
    let till = plain_till().await;
    let op = operator();
    let (session_id, order_id) = session_and_order(&till, 3000).await;
    till.close_session(&session_id, Money::zero()).await.unwrap();

    let draft = till
        .draft(&order_id, AllocationMode::Lump, PaymentInstrument::Cash)
        .await
        .unwrap();
    let err = till
        .confirm_settlement(&order_id, &draft, &session_id, &op)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);
    assert_eq!(till.order(&order_id).await.unwrap().status, OrderStatus::Open);
}

// =============================================================================
// Fiscal
// =============================================================================

#[tokio::test]
async fn test_split_sale_is_invoiced_once_when_settled() {
    let authority = Arc::new(ScriptedAuthority::default());
    authority.answer(AuthorityStatus::new("autorizado").with_document_ref("NFC-1"));
    let (till, mut rx) = fiscal_till(authority.clone(), fast_polls()).await;
    let op = operator();
    let (session_id, order_id) = session_and_order(&till, 8900).await;
    till.add_item(&order_id, unit("Suco", 1100)).await.unwrap();
    let order = till
        .apply_surcharge(&order_id, Money::from_cents(1000))
        .await
        .unwrap();
    assert_eq!(order.total(), Money::from_cents(11000));

    let mut draft = till
        .draft(&order_id, AllocationMode::Lump, PaymentInstrument::Pix)
        .await
        .unwrap();
    draft.set_amount("mesa", Money::from_cents(7000)).unwrap();
    let first = till
        .confirm_settlement(&order_id, &draft, &session_id, &op)
        .await
        .unwrap();
    assert_eq!(first.resulting_status, OrderStatus::PartiallySettled);
    assert!(till.invoice_for_settlement(&first.id).await.unwrap().is_none());
    let err = till.submit_invoice(&first.id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);

    let draft = till
        .draft(&order_id, AllocationMode::Lump, PaymentInstrument::Credit)
        .await
        .unwrap();
    let last = till
        .confirm_settlement(&order_id, &draft, &session_id, &op)
        .await
        .unwrap();
    assert_eq!(last.resulting_status, OrderStatus::Settled);

    let authorized = wait_for(&mut rx, resolved).await;
    assert_eq!(authorized.status, FiscalStatus::Authorized);
    assert_eq!(authorized.settlement_id, last.id);
    assert_eq!(authority.submissions(), vec![last.id.clone()]);

    let payload = authority.last_payload().unwrap();
    let items_total: i64 = payload.items.iter().map(|i| i.total_cents).sum();
    assert_eq!(items_total, 10000);
    assert_eq!(payload.surcharge_cents, 1000);
    assert_eq!(
        items_total - payload.discount_cents + payload.surcharge_cents,
        payload.total_cents
    );
    let paid: Vec<i64> = payload.payments.iter().map(|p| p.amount_cents).collect();
    assert_eq!(paid, vec![7000, 4000]);
}

#[tokio::test]
async fn test_fiscal_calls_fail_when_disabled() {
    let till = plain_till().await;
    assert!(!till.fiscal_enabled());
    let err = till.reprocess(None, None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);
}

#[tokio::test]
async fn test_rejected_invoice_resubmitted_until_authorized() {
    let authority = Arc::new(ScriptedAuthority::default());
    authority.answer(AuthorityStatus::new("rejeitado").with_message("CPF inválido"));
    let (till, mut rx) = fiscal_till(authority.clone(), fast_polls()).await;
    let op = operator();
    let (session_id, order_id) = session_and_order(&till, 8900).await;

    let draft = till
        .draft(&order_id, AllocationMode::Lump, PaymentInstrument::Pix)
        .await
        .unwrap();
    let settlement = till
        .confirm_settlement(&order_id, &draft, &session_id, &op)
        .await
        .unwrap();

    let confirmed = wait_for(&mut rx, |e| match e {
        TillEvent::SettlementConfirmed { settlement } => Some(settlement),
        _ => None,
    })
    .await;
    assert_eq!(confirmed.id, settlement.id);

    let rejected = wait_for(&mut rx, resolved).await;
    assert_eq!(rejected.status, FiscalStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("CPF inválido"));

    authority.answer(AuthorityStatus::new("autorizado").with_document_ref("35260312345678000199650010000000011000000010"));
    let resubmitted = till.resubmit_invoice(&rejected.id).await.unwrap();
    assert_eq!(resubmitted.status, FiscalStatus::Processing);

    let authorized = wait_for(&mut rx, resolved).await;
    assert_eq!(authorized.status, FiscalStatus::Authorized);
    assert!(authorized.document_ref.is_some());
    assert_eq!(authorized.attempts, 2);

    let history: Vec<(FiscalStatus, FiscalStatus)> = till
        .invoice_history(&authorized.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| (t.from, t.to))
        .collect();
    assert_eq!(
        history,
        vec![
            (FiscalStatus::NotSubmitted, FiscalStatus::Processing),
            (FiscalStatus::Processing, FiscalStatus::Rejected),
            (FiscalStatus::Rejected, FiscalStatus::Processing),
            (FiscalStatus::Processing, FiscalStatus::Authorized),
        ]
    );
    assert_eq!(authority.submissions(), vec![settlement.id.clone(), settlement.id]);
}

#[tokio::test]
async fn test_cancellation_needs_a_real_reason() {
    let authority = Arc::new(ScriptedAuthority::default());
    authority.answer(AuthorityStatus::new("autorizado").with_document_ref("NFC-1"));
    let (till, mut rx) = fiscal_till(authority.clone(), fast_polls()).await;
    let op = operator();
    let (session_id, order_id) = session_and_order(&till, 2500).await;

    let draft = till
        .draft(&order_id, AllocationMode::Lump, PaymentInstrument::Cash)
        .await
        .unwrap();
    till.confirm_settlement(&order_id, &draft, &session_id, &op)
        .await
        .unwrap();
    let authorized = wait_for(&mut rx, resolved).await;
    assert_eq!(authorized.status, FiscalStatus::Authorized);

    let err = till.cancel_invoice(&authorized.id, "cli").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationError);
    assert!(authority.cancellations.lock().unwrap().is_empty());

    authority.answer(AuthorityStatus::new("cancelado"));
    let pending = till
        .cancel_invoice(&authorized.id, "Produto trocado errado")
        .await
        .unwrap();
    assert_eq!(pending.status, FiscalStatus::Processing);
    assert_eq!(pending.cancellation_reason.as_deref(), Some("Produto trocado errado"));

    let cancelled = wait_for(&mut rx, resolved).await;
    assert_eq!(cancelled.status, FiscalStatus::Cancelled);
}

#[tokio::test]
async fn test_submit_is_idempotent_per_settlement() {
    let authority = Arc::new(ScriptedAuthority::default());
    let (till, mut rx) = fiscal_till(authority.clone(), fast_polls()).await;
    let op = operator();
    let (session_id, order_id) = session_and_order(&till, 1200).await;

    let draft = till
        .draft(&order_id, AllocationMode::Lump, PaymentInstrument::Pix)
        .await
        .unwrap();
    let settlement = till
        .confirm_settlement(&order_id, &draft, &session_id, &op)
        .await
        .unwrap();
    wait_for(&mut rx, |e| match e {
        TillEvent::SettlementConfirmed { .. } => Some(()),
        _ => None,
    })
    .await;

    let first = till.submit_invoice(&settlement.id).await.unwrap();
    let second = till.submit_invoice(&settlement.id).await.unwrap();

    assert_eq!(first.correlation_id, second.correlation_id);
    assert_eq!(authority.submissions().len(), 1);
}

#[tokio::test]
async fn test_unreachable_authority_leaves_invoice_in_error() {
    let authority = Arc::new(ScriptedAuthority::default());
    authority.set_unreachable(true);
    let (till, mut rx) = fiscal_till(authority.clone(), fast_polls()).await;
    let op = operator();
    let (session_id, order_id) = session_and_order(&till, 5600).await;

    let draft = till
        .draft(&order_id, AllocationMode::Lump, PaymentInstrument::Debit)
        .await
        .unwrap();
    let settlement = till
        .confirm_settlement(&order_id, &draft, &session_id, &op)
        .await
        .unwrap();

    let failed = wait_for(&mut rx, resolved).await;
    assert_eq!(failed.status, FiscalStatus::Error);
    assert!(failed.last_message.is_some());
    assert_eq!(
        till.settlement(&settlement.id).await.unwrap().applied,
        Money::from_cents(5600)
    );

    authority.set_unreachable(false);
    authority.answer(AuthorityStatus::new("autorizado"));
    let result = till.reprocess(None, None).await.unwrap();
    assert_eq!(result.resubmitted, 1);
    assert_eq!(result.authorized, 1);

    let invoice = till.invoice(&failed.id).await.unwrap();
    assert_eq!(invoice.status, FiscalStatus::Authorized);
}

#[tokio::test]
async fn test_closing_session_stops_its_polls() {
    let authority = Arc::new(ScriptedAuthority::default());
    let (till, mut rx) = fiscal_till(authority.clone(), fast_polls()).await;
    let op = operator();
    let (session_id, order_id) = session_and_order(&till, 1500).await;

    let draft = till
        .draft(&order_id, AllocationMode::Lump, PaymentInstrument::Cash)
        .await
        .unwrap();
    let settlement = till
        .confirm_settlement(&order_id, &draft, &session_id, &op)
        .await
        .unwrap();
    wait_for(&mut rx, |e| match e {
        TillEvent::SettlementConfirmed { .. } => Some(()),
        _ => None,
    })
    .await;

    // Issuance runs in the background; wait for its poll to register.
    let invoice_id = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(invoice) = till.invoice_for_settlement(&settlement.id).await.unwrap() {
                if till.is_polling(&invoice.id) {
                    return invoice.id;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("poll never started");

    till.close_session(&session_id, Money::from_cents(1500))
        .await
        .unwrap();

    assert!(!till.is_polling(&invoice_id));
    assert_eq!(till.active_polls(), 0);
    let invoice = till.invoice(&invoice_id).await.unwrap();
    assert_eq!(invoice.status, FiscalStatus::Processing);
}

#[tokio::test]
async fn test_poll_ceiling_emits_timeout_without_cancelling() {
    let authority = Arc::new(ScriptedAuthority::default());
    let polls = PollerConfig {
        interval: Duration::from_millis(20),
        timeout: Duration::from_millis(150),
    };
    let (till, mut rx) = fiscal_till(authority.clone(), polls).await;
    let op = operator();
    let (session_id, order_id) = session_and_order(&till, 990).await;

    let draft = till
        .draft(&order_id, AllocationMode::Lump, PaymentInstrument::Pix)
        .await
        .unwrap();
    till.confirm_settlement(&order_id, &draft, &session_id, &op)
        .await
        .unwrap();

    let invoice_id = wait_for(&mut rx, |e| match e {
        TillEvent::PollTimedOut { invoice_id } => Some(invoice_id),
        _ => None,
    })
    .await;

    let invoice = till.invoice(&invoice_id).await.unwrap();
    assert_eq!(invoice.status, FiscalStatus::Processing);
    assert!(invoice.cancellation_reason.is_none());
    assert!(authority.cancellations.lock().unwrap().is_empty());
}
