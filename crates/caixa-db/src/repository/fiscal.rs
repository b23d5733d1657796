//! # Fiscal Invoice Repository
//!
//! Invoices and their append-only transition log. Every state change is
//! saved together with the event that describes it.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use caixa_core::{FiscalInvoice, FiscalStatus, InvoiceTransition};

#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    id: String,
    settlement_id: String,
    status: FiscalStatus,
    correlation_id: Option<String>,
    document_ref: Option<String>,
    rejection_reason: Option<String>,
    cancellation_reason: Option<String>,
    last_message: Option<String>,
    attempts: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<InvoiceRow> for FiscalInvoice {
    fn from(row: InvoiceRow) -> Self {
        FiscalInvoice {
            id: row.id,
            settlement_id: row.settlement_id,
            status: row.status,
            correlation_id: row.correlation_id,
            document_ref: row.document_ref,
            rejection_reason: row.rejection_reason,
            cancellation_reason: row.cancellation_reason,
            last_message: row.last_message,
            attempts: row.attempts,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    invoice_id: String,
    from_status: FiscalStatus,
    to_status: FiscalStatus,
    message: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for InvoiceTransition {
    fn from(row: EventRow) -> Self {
        InvoiceTransition {
            invoice_id: row.invoice_id,
            from: row.from_status,
            to: row.to_status,
            message: row.message,
            at: row.created_at,
        }
    }
}

const SELECT_INVOICE: &str = r#"
    SELECT id, settlement_id, status, correlation_id, document_ref,
           rejection_reason, cancellation_reason, last_message, attempts,
           created_at, updated_at
    FROM fiscal_invoices
"#;

/// Inserts an invoice on an existing connection or transaction.
pub(crate) async fn insert_invoice(
    conn: &mut SqliteConnection,
    invoice: &FiscalInvoice,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO fiscal_invoices (
            id, settlement_id, status, correlation_id, document_ref,
            rejection_reason, cancellation_reason, last_message, attempts,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&invoice.id)
    .bind(&invoice.settlement_id)
    .bind(invoice.status)
    .bind(&invoice.correlation_id)
    .bind(&invoice.document_ref)
    .bind(&invoice.rejection_reason)
    .bind(&invoice.cancellation_reason)
    .bind(&invoice.last_message)
    .bind(invoice.attempts)
    .bind(invoice.created_at)
    .bind(invoice.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Repository for fiscal invoice database operations.
#[derive(Debug, Clone)]
pub struct FiscalInvoiceRepository {
    pool: SqlitePool,
}

impl FiscalInvoiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        FiscalInvoiceRepository { pool }
    }

    /// Stores a new invoice for an already recorded settlement.
    ///
    /// ## Errors
    /// `UniqueViolation` when the settlement already has an invoice.
    pub async fn insert(&self, invoice: &FiscalInvoice) -> DbResult<()> {
        debug!(id = %invoice.id, settlement_id = %invoice.settlement_id, "Inserting invoice");
        let mut conn = self.pool.acquire().await?;
        insert_invoice(&mut *conn, invoice).await
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<FiscalInvoice>> {
        let row: Option<InvoiceRow> = sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_INVOICE))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(FiscalInvoice::from))
    }

    pub async fn get_by_settlement(&self, settlement_id: &str) -> DbResult<Option<FiscalInvoice>> {
        let row: Option<InvoiceRow> =
            sqlx::query_as(&format!("{} WHERE settlement_id = ?1", SELECT_INVOICE))
                .bind(settlement_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(FiscalInvoice::from))
    }

    /// Saves the invoice and, when its status moved, the transition event.
    pub async fn save(
        &self,
        invoice: &FiscalInvoice,
        transition: Option<&InvoiceTransition>,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE fiscal_invoices SET
                status = ?2,
                correlation_id = ?3,
                document_ref = ?4,
                rejection_reason = ?5,
                cancellation_reason = ?6,
                last_message = ?7,
                attempts = ?8,
                updated_at = ?9
            WHERE id = ?1
            "#,
        )
        .bind(&invoice.id)
        .bind(invoice.status)
        .bind(&invoice.correlation_id)
        .bind(&invoice.document_ref)
        .bind(&invoice.rejection_reason)
        .bind(&invoice.cancellation_reason)
        .bind(&invoice.last_message)
        .bind(invoice.attempts)
        .bind(invoice.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("fiscal invoice", &invoice.id));
        }

        if let Some(t) = transition {
            debug!(id = %t.invoice_id, from = %t.from, to = %t.to, "Invoice transition");
            sqlx::query(
                r#"
                INSERT INTO fiscal_invoice_events (invoice_id, from_status, to_status, message, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(&t.invoice_id)
            .bind(t.from)
            .bind(t.to)
            .bind(&t.message)
            .bind(t.at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))?;
        Ok(())
    }

    /// Invoices in any of `statuses`, created within `[since, until)`.
    pub async fn list_by_status(
        &self,
        statuses: &[FiscalStatus],
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> DbResult<Vec<FiscalInvoice>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_INVOICE);
        qb.push(" WHERE status IN (");
        let mut separated = qb.separated(", ");
        for status in statuses {
            separated.push_bind(*status);
        }
        separated.push_unseparated(")");
        if let Some(since) = since {
            qb.push(" AND created_at >= ").push_bind(since);
        }
        if let Some(until) = until {
            qb.push(" AND created_at < ").push_bind(until);
        }
        qb.push(" ORDER BY created_at");

        let rows: Vec<InvoiceRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(FiscalInvoice::from).collect())
    }

    /// Transition history, oldest first.
    pub async fn events(&self, invoice_id: &str) -> DbResult<Vec<InvoiceTransition>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT invoice_id, from_status, to_status, message, created_at
            FROM fiscal_invoice_events
            WHERE invoice_id = ?1
            ORDER BY id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(InvoiceTransition::from).collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
