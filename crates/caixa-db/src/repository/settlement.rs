//! # Settlement Repository
//!
//! Confirmed settlements and the payments they carry.
//!
//! ## Atomic Record
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  record(settlement, order, invoice)          ONE TRANSACTION            │
//! │                                                                         │
//! │  1. cash_sessions      session must still be 'open'                     │
//! │  2. settlements        INSERT (item snapshot as JSON)                   │
//! │  3. settlement_payments INSERT × n                                      │
//! │  4. orders             UPDATE, only while still open/partially settled  │
//! │  5. fiscal_invoices    INSERT 'not_submitted' (when fiscal is enabled)  │
//! │                                                                         │
//! │  Any failure rolls back all five.                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::fiscal::insert_invoice;
use crate::repository::order::update_order;
use caixa_core::{
    FiscalInvoice, LineItem, Money, Order, OrderStatus, Payment, PaymentInstrument,
    SessionStatus, Settlement,
};

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PaymentRow {
    id: String,
    settlement_id: String,
    payer_label: String,
    instrument: PaymentInstrument,
    amount_cents: i64,
    created_at: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            id: row.id,
            settlement_id: row.settlement_id,
            payer_label: row.payer_label,
            instrument: row.instrument,
            amount: Money::from_cents(row.amount_cents),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SettlementRow {
    id: String,
    order_id: String,
    session_id: String,
    total_collected_cents: i64,
    prior_paid_cents: i64,
    applied_cents: i64,
    change_cents: i64,
    written_off_cents: i64,
    remaining_cents: i64,
    resulting_status: OrderStatus,
    items_json: String,
    operator_id: String,
    operator_name: String,
    created_at: DateTime<Utc>,
}

impl SettlementRow {
    fn into_settlement(self, payments: Vec<Payment>) -> DbResult<Settlement> {
        let items: Vec<LineItem> = serde_json::from_str(&self.items_json)?;
        Ok(Settlement {
            id: self.id,
            order_id: self.order_id,
            session_id: self.session_id,
            payments,
            total_collected: Money::from_cents(self.total_collected_cents),
            prior_paid: Money::from_cents(self.prior_paid_cents),
            applied: Money::from_cents(self.applied_cents),
            change: Money::from_cents(self.change_cents),
            written_off: Money::from_cents(self.written_off_cents),
            remaining: Money::from_cents(self.remaining_cents),
            resulting_status: self.resulting_status,
            items,
            operator_id: self.operator_id,
            operator_name: self.operator_name,
            created_at: self.created_at,
        })
    }
}

const SELECT_SETTLEMENT: &str = r#"
    SELECT id, order_id, session_id,
           total_collected_cents, prior_paid_cents, applied_cents,
           change_cents, written_off_cents, remaining_cents,
           resulting_status, items_json, operator_id, operator_name, created_at
    FROM settlements
"#;

const SELECT_PAYMENT: &str = r#"
    SELECT id, settlement_id, payer_label, instrument, amount_cents, created_at
    FROM settlement_payments
"#;

/// Every payment ever recorded against an order, oldest first.
pub(crate) async fn load_order_payments(pool: &SqlitePool, order_id: &str) -> DbResult<Vec<Payment>> {
    let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
        "{} WHERE order_id = ?1 ORDER BY created_at, position",
        SELECT_PAYMENT
    ))
    .bind(order_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Payment::from).collect())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for settlement database operations.
#[derive(Debug, Clone)]
pub struct SettlementRepository {
    pool: SqlitePool,
}

impl SettlementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SettlementRepository { pool }
    }

    /// Persists a confirmed settlement together with the order it changed and,
    /// optionally, the fiscal invoice to issue for it.
    ///
    /// ## Errors
    /// - `NotFound`: the session does not exist
    /// - `PreconditionFailed`: the session is closed, or the order stopped
    ///   accepting payments since it was loaded
    pub async fn record(
        &self,
        settlement: &Settlement,
        order: &Order,
        invoice: Option<&FiscalInvoice>,
    ) -> DbResult<()> {
        debug!(
            id = %settlement.id,
            order_id = %settlement.order_id,
            session_id = %settlement.session_id,
            "Recording settlement"
        );

        let mut tx = self.pool.begin().await?;

        let session_status: Option<SessionStatus> =
            sqlx::query_scalar("SELECT status FROM cash_sessions WHERE id = ?1")
                .bind(&settlement.session_id)
                .fetch_optional(&mut *tx)
                .await?;
        match session_status {
            None => return Err(DbError::not_found("cash session", &settlement.session_id)),
            Some(SessionStatus::Closed) => {
                return Err(DbError::precondition(
                    "cash session",
                    &settlement.session_id,
                    "is closed",
                ))
            }
            Some(SessionStatus::Open) => {}
        }

        sqlx::query(
            r#"
            INSERT INTO settlements (
                id, order_id, session_id,
                total_collected_cents, prior_paid_cents, applied_cents,
                change_cents, written_off_cents, remaining_cents,
                resulting_status, items_json, operator_id, operator_name, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&settlement.id)
        .bind(&settlement.order_id)
        .bind(&settlement.session_id)
        .bind(settlement.total_collected.cents())
        .bind(settlement.prior_paid.cents())
        .bind(settlement.applied.cents())
        .bind(settlement.change.cents())
        .bind(settlement.written_off.cents())
        .bind(settlement.remaining.cents())
        .bind(settlement.resulting_status)
        .bind(serde_json::to_string(&settlement.items)?)
        .bind(&settlement.operator_id)
        .bind(&settlement.operator_name)
        .bind(settlement.created_at)
        .execute(&mut *tx)
        .await?;

        for (position, payment) in settlement.payments.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO settlement_payments (
                    id, settlement_id, order_id, session_id,
                    payer_label, instrument, amount_cents, position, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(&payment.id)
            .bind(&settlement.id)
            .bind(&settlement.order_id)
            .bind(&settlement.session_id)
            .bind(&payment.payer_label)
            .bind(payment.instrument)
            .bind(payment.amount.cents())
            .bind(position as i64)
            .bind(payment.created_at)
            .execute(&mut *tx)
            .await?;
        }

        update_order(&mut *tx, order, true).await?;

        if let Some(invoice) = invoice {
            insert_invoice(&mut *tx, invoice).await?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))?;

        info!(
            id = %settlement.id,
            order_id = %settlement.order_id,
            status = %settlement.resulting_status,
            collected = %settlement.total_collected,
            "Settlement recorded"
        );
        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Settlement>> {
        let row: Option<SettlementRow> =
            sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_SETTLEMENT))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => {
                let payments = self.payments_for(&row.id).await?;
                Ok(Some(row.into_settlement(payments)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list_by_order(&self, order_id: &str) -> DbResult<Vec<Settlement>> {
        let rows: Vec<SettlementRow> = sqlx::query_as(&format!(
            "{} WHERE order_id = ?1 ORDER BY created_at",
            SELECT_SETTLEMENT
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        self.attach_payments(rows).await
    }

    /// Settlements recorded under a cash session.
    pub async fn list_by_session(&self, session_id: &str) -> DbResult<Vec<Settlement>> {
        let rows: Vec<SettlementRow> = sqlx::query_as(&format!(
            "{} WHERE session_id = ?1 ORDER BY created_at",
            SELECT_SETTLEMENT
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        self.attach_payments(rows).await
    }

    /// Settlements created within `[since, until)`, either bound optional.
    pub async fn list_between(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> DbResult<Vec<Settlement>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_SETTLEMENT);
        qb.push(" WHERE 1 = 1");
        if let Some(since) = since {
            qb.push(" AND created_at >= ").push_bind(since);
        }
        if let Some(until) = until {
            qb.push(" AND created_at < ").push_bind(until);
        }
        qb.push(" ORDER BY created_at");

        let rows: Vec<SettlementRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        self.attach_payments(rows).await
    }

    async fn payments_for(&self, settlement_id: &str) -> DbResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "{} WHERE settlement_id = ?1 ORDER BY position",
            SELECT_PAYMENT
        ))
        .bind(settlement_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Payment::from).collect())
    }

    async fn attach_payments(&self, rows: Vec<SettlementRow>) -> DbResult<Vec<Settlement>> {
        let mut settlements = Vec::with_capacity(rows.len());
        for row in rows {
            let payments = self.payments_for(&row.id).await?;
            settlements.push(row.into_settlement(payments)?);
        }
        Ok(settlements)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
