//! # Order Repository
//!
//! Persists open tabs. Line items are stored as a JSON array on the order
//! row; the payment history is rebuilt from `settlement_payments`.
//!
//! ## Order Lifecycle in Storage
//! ```text
//! insert()  ──► status 'open', items_json '[...]'
//! update()  ──► items / discount / surcharge edits
//! SettlementRepository::record()
//!           ──► status 'partially_settled' | 'settled' (items_json '[]')
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::settlement::load_order_payments;
use caixa_core::{LineItem, Money, Order, OrderKind, OrderStatus};

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: String,
    label: String,
    kind: OrderKind,
    status: OrderStatus,
    items_json: String,
    discount_cents: i64,
    surcharge_cents: i64,
    change_given_cents: i64,
    written_off_cents: i64,
    opened_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self) -> DbResult<Order> {
        let items: Vec<LineItem> = serde_json::from_str(&self.items_json)?;
        Ok(Order {
            id: self.id,
            label: self.label,
            kind: self.kind,
            status: self.status,
            items,
            discount: Money::from_cents(self.discount_cents),
            surcharge: Money::from_cents(self.surcharge_cents),
            payments: Vec::new(),
            change_given: Money::from_cents(self.change_given_cents),
            written_off: Money::from_cents(self.written_off_cents),
            opened_by: self.opened_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_ORDER: &str = r#"
    SELECT id, label, kind, status, items_json,
           discount_cents, surcharge_cents, change_given_cents, written_off_cents,
           opened_by, created_at, updated_at
    FROM orders
"#;

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Inserts a newly opened order.
    pub async fn insert(&self, order: &Order) -> DbResult<()> {
        debug!(id = %order.id, label = %order.label, "Inserting order");
        let items_json = serde_json::to_string(&order.items)?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, label, kind, status, items_json,
                discount_cents, surcharge_cents, change_given_cents, written_off_cents,
                opened_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&order.id)
        .bind(&order.label)
        .bind(order.kind)
        .bind(order.status)
        .bind(items_json)
        .bind(order.discount.cents())
        .bind(order.surcharge.cents())
        .bind(order.change_given.cents())
        .bind(order.written_off.cents())
        .bind(&order.opened_by)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Saves item, discount and surcharge edits.
    pub async fn update(&self, order: &Order) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        update_order(&mut *conn, order, false).await
    }

    /// Loads an order with its full payment history.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_ORDER))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut order = row.into_order()?;
                order.payments = load_order_payments(&self.pool, &order.id).await?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    /// Orders still accepting items or payments, oldest first.
    pub async fn list_active(&self) -> DbResult<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "{} WHERE status IN ('open', 'partially_settled') ORDER BY created_at",
            SELECT_ORDER
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let mut order = row.into_order()?;
            order.payments = load_order_payments(&self.pool, &order.id).await?;
            orders.push(order);
        }
        Ok(orders)
    }
}

/// Writes the mutable columns of an order.
///
/// With `require_active`, the write only applies while the stored row is
/// still open or partially settled, so two settlements can never both close
/// the same order.
pub(crate) async fn update_order(
    conn: &mut SqliteConnection,
    order: &Order,
    require_active: bool,
) -> DbResult<()> {
    debug!(id = %order.id, status = %order.status, "Updating order");
    let items_json = serde_json::to_string(&order.items)?;

    let guard = if require_active {
        " AND status IN ('open', 'partially_settled')"
    } else {
        ""
    };

    let result = sqlx::query(&format!(
        r#"
        UPDATE orders SET
            status = ?2,
            items_json = ?3,
            discount_cents = ?4,
            surcharge_cents = ?5,
            change_given_cents = ?6,
            written_off_cents = ?7,
            updated_at = ?8
        WHERE id = ?1{}
        "#,
        guard
    ))
    .bind(&order.id)
    .bind(order.status)
    .bind(items_json)
    .bind(order.discount.cents())
    .bind(order.surcharge.cents())
    .bind(order.change_given.cents())
    .bind(order.written_off.cents())
    .bind(order.updated_at)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(if require_active {
            DbError::precondition("order", &order.id, "no longer accepts payments")
        } else {
            DbError::not_found("order", &order.id)
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use caixa_core::{CatalogItem, Operator, Pricing};

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn order() -> Order {
        let op = Operator::new("op-1", "Marta");
        let mut order = Order::new("Mesa 12", OrderKind::Table, &op).unwrap();
        let dish = CatalogItem::unit("p-1", "Feijoada", Money::from_cents(5900));
        let item = LineItem::from_catalog(&dish, Pricing::Unit { quantity: 2 })
            .unwrap()
            .with_note(Some("sem couve".to_string()));
        order.add_item(item).unwrap();
        order
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = db().await;
        let order = order();
        db.orders().insert(&order).await.unwrap();

        let loaded = db.orders().get_by_id(&order.id).await.unwrap().unwrap();
        assert_eq!(loaded.label, "Mesa 12");
        assert_eq!(loaded.kind, OrderKind::Table);
        assert_eq!(loaded.items, order.items);
        assert_eq!(loaded.total().cents(), 11800);
        assert!(loaded.payments.is_empty());
    }

    #[tokio::test]
    async fn test_update_persists_edits() {
        let db = db().await;
        let mut order = order();
        db.orders().insert(&order).await.unwrap();

        order.apply_discount(Money::from_cents(800)).unwrap();
        order.apply_surcharge(Money::from_cents(1100)).unwrap();
        db.orders().update(&order).await.unwrap();

        let loaded = db.orders().get_by_id(&order.id).await.unwrap().unwrap();
        assert_eq!(loaded.discount.cents(), 800);
        assert_eq!(loaded.total().cents(), 12100);
    }

    #[tokio::test]
    async fn test_update_missing_order() {
        let db = db().await;
        let err = db.orders().update(&order()).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_active_skips_cancelled() {
        let db = db().await;
        let open = order();
        let mut discarded = order();
        db.orders().insert(&open).await.unwrap();
        db.orders().insert(&discarded).await.unwrap();

        discarded.discard().unwrap();
        db.orders().update(&discarded).await.unwrap();

        let active = db.orders().list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, open.id);
    }
}
