//! # Cash Session Repository
//!
//! Sessions, their movements and the report frozen at close.
//!
//! Writes that depend on the session being open carry the check in their
//! own SQL, so a close racing with a movement or a settlement leaves exactly
//! one of them applied.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use caixa_core::{
    CashSession, ClosedSessionReport, Money, Movement, MovementKind, SessionStatus,
};

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: String,
    operator_id: String,
    operator_name: String,
    terminal_id: String,
    opening_float_cents: i64,
    status: SessionStatus,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    expected_cents: Option<i64>,
    counted_cents: Option<i64>,
    variance_cents: Option<i64>,
}

impl SessionRow {
    fn into_session(self, movements: Vec<Movement>) -> CashSession {
        CashSession {
            id: self.id,
            operator_id: self.operator_id,
            operator_name: self.operator_name,
            terminal_id: self.terminal_id,
            opening_float: Money::from_cents(self.opening_float_cents),
            status: self.status,
            movements,
            opened_at: self.opened_at,
            closed_at: self.closed_at,
            expected: self.expected_cents.map(Money::from_cents),
            counted: self.counted_cents.map(Money::from_cents),
            variance: self.variance_cents.map(Money::from_cents),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MovementRow {
    id: String,
    session_id: String,
    kind: MovementKind,
    amount_cents: i64,
    reason: String,
    operator_id: String,
    created_at: DateTime<Utc>,
}

impl From<MovementRow> for Movement {
    fn from(row: MovementRow) -> Self {
        Movement {
            id: row.id,
            session_id: row.session_id,
            kind: row.kind,
            amount: Money::from_cents(row.amount_cents),
            reason: row.reason,
            operator_id: row.operator_id,
            created_at: row.created_at,
        }
    }
}

const SELECT_SESSION: &str = r#"
    SELECT id, operator_id, operator_name, terminal_id, opening_float_cents,
           status, opened_at, closed_at, expected_cents, counted_cents, variance_cents
    FROM cash_sessions
"#;

/// Repository for cash session database operations.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SessionRepository { pool }
    }

    /// Stores a freshly opened session.
    ///
    /// ## Errors
    /// `UniqueViolation` carrying the existing session id when the operator
    /// already has an open session on this terminal.
    pub async fn open(&self, session: &CashSession) -> DbResult<()> {
        debug!(
            id = %session.id,
            operator_id = %session.operator_id,
            terminal_id = %session.terminal_id,
            "Opening cash session"
        );

        let mut tx = self.pool.begin().await?;

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT id FROM cash_sessions WHERE operator_id = ?1 AND terminal_id = ?2 AND status = 'open'",
        )
        .bind(&session.operator_id)
        .bind(&session.terminal_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(existing) = existing {
            warn!(existing = %existing, "Operator already has an open session");
            return Err(DbError::duplicate("open cash session", existing));
        }

        sqlx::query(
            r#"
            INSERT INTO cash_sessions (
                id, operator_id, operator_name, terminal_id,
                opening_float_cents, status, opened_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&session.id)
        .bind(&session.operator_id)
        .bind(&session.operator_name)
        .bind(&session.terminal_id)
        .bind(session.opening_float.cents())
        .bind(session.status)
        .bind(session.opened_at)
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))?;

        info!(id = %session.id, float = %session.opening_float, "Cash session opened");
        Ok(())
    }

    /// The open session of an operator on a terminal, if any.
    pub async fn find_open(
        &self,
        operator_id: &str,
        terminal_id: &str,
    ) -> DbResult<Option<CashSession>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "{} WHERE operator_id = ?1 AND terminal_id = ?2 AND status = 'open'",
            SELECT_SESSION
        ))
        .bind(operator_id)
        .bind(terminal_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let movements = self.movements(&row.id).await?;
                Ok(Some(row.into_session(movements)))
            }
            None => Ok(None),
        }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<CashSession>> {
        let row: Option<SessionRow> =
            sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_SESSION))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => {
                let movements = self.movements(&row.id).await?;
                Ok(Some(row.into_session(movements)))
            }
            None => Ok(None),
        }
    }

    pub async fn movements(&self, session_id: &str) -> DbResult<Vec<Movement>> {
        let rows: Vec<MovementRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, kind, amount_cents, reason, operator_id, created_at
            FROM cash_movements
            WHERE session_id = ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Movement::from).collect())
    }

    /// Appends a movement, only while the session is still open.
    pub async fn add_movement(&self, movement: &Movement) -> DbResult<()> {
        debug!(
            session_id = %movement.session_id,
            kind = ?movement.kind,
            amount = %movement.amount,
            "Recording cash movement"
        );

        let result = sqlx::query(
            r#"
            INSERT INTO cash_movements (
                id, session_id, kind, amount_cents, reason, operator_id, created_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
            WHERE EXISTS (
                SELECT 1 FROM cash_sessions WHERE id = ?2 AND status = 'open'
            )
            "#,
        )
        .bind(&movement.id)
        .bind(&movement.session_id)
        .bind(movement.kind)
        .bind(movement.amount.cents())
        .bind(&movement.reason)
        .bind(&movement.operator_id)
        .bind(movement.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::precondition(
                "cash session",
                &movement.session_id,
                "is not open",
            ));
        }
        Ok(())
    }

    /// Marks the session closed and stores its report.
    ///
    /// The update only applies if the stored session is still open and holds
    /// exactly the settlements and movements the report was computed from.
    pub async fn close(&self, session: &CashSession, report: &ClosedSessionReport) -> DbResult<()> {
        let report_json = serde_json::to_string(report)?;

        let result = sqlx::query(
            r#"
            UPDATE cash_sessions SET
                status = 'closed',
                closed_at = ?2,
                expected_cents = ?3,
                counted_cents = ?4,
                variance_cents = ?5,
                report_json = ?6
            WHERE id = ?1
              AND status = 'open'
              AND (SELECT COUNT(*) FROM settlements WHERE session_id = ?1) = ?7
              AND (SELECT COUNT(*) FROM cash_movements WHERE session_id = ?1) = ?8
            "#,
        )
        .bind(&report.session_id)
        .bind(report.closed_at)
        .bind(report.expected.cents())
        .bind(report.counted.cents())
        .bind(report.variance.cents())
        .bind(report_json)
        .bind(report.totals.settlement_count as i64)
        .bind(session.movements.len() as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::precondition(
                "cash session",
                &report.session_id,
                "changed or closed while closing",
            ));
        }

        info!(
            id = %report.session_id,
            expected = %report.expected,
            counted = %report.counted,
            variance = %report.variance,
            "Cash session closed"
        );
        Ok(())
    }

    /// The report frozen when the session closed.
    pub async fn get_report(&self, session_id: &str) -> DbResult<Option<ClosedSessionReport>> {
        let json: Option<Option<String>> =
            sqlx::query_scalar("SELECT report_json FROM cash_sessions WHERE id = ?1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;

        match json {
            None => Err(DbError::not_found("cash session", session_id)),
            Some(None) => Ok(None),
            Some(Some(json)) => Ok(Some(serde_json::from_str(&json)?)),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
