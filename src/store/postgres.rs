//! PostgreSQL store
//!
//! Orders, their items, and outbox rows live in the same database so one
//! `sqlx::Transaction` covers an aggregate change and its outbox messages.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

use super::{OrderRepository, OutboxRepository, OutboxStats, StoreError, Transactional};
use crate::domain::order::{
    CustomerId, Order, OrderId, OrderItem, OrderNumber, OrderStatus, ProductNumber, Quantity,
    ShippingAddress,
};
use crate::outbox::{OutboxMessage, OutboxStatus};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        id BIGSERIAL PRIMARY KEY,
        order_number TEXT NOT NULL UNIQUE,
        customer_id TEXT NOT NULL,
        order_date TIMESTAMPTZ NOT NULL,
        street TEXT NOT NULL,
        city TEXT NOT NULL,
        state TEXT NOT NULL,
        postal_code TEXT NOT NULL,
        country TEXT NOT NULL,
        status TEXT NOT NULL,
        version BIGINT NOT NULL DEFAULT 1
    )
    "#,
    "ALTER TABLE orders ADD COLUMN IF NOT EXISTS version BIGINT NOT NULL DEFAULT 1",
    r#"
    CREATE TABLE IF NOT EXISTS order_items (
        order_id BIGINT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        product_number TEXT NOT NULL,
        quantity INTEGER NOT NULL CHECK (quantity > 0),
        unit_price NUMERIC(19, 4) NOT NULL CHECK (unit_price > 0),
        PRIMARY KEY (order_id, position)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS outbox (
        id UUID PRIMARY KEY,
        aggregate_type TEXT NOT NULL,
        aggregate_id UUID NOT NULL,
        event_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'PENDING'
            CHECK (status IN ('PENDING', 'PROCESSED', 'FAILED')),
        created_at TIMESTAMPTZ NOT NULL,
        processed_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_outbox_aggregate_event_created
    ON outbox(aggregate_id, event_type, created_at)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_outbox_status_created
    ON outbox(status, created_at)
    WHERE status = 'PENDING'
    "#,
];

const CLAIM_PENDING_SQL: &str = r#"
    SELECT id, aggregate_type, aggregate_id, event_type, payload, status,
           created_at, processed_at
    FROM outbox
    WHERE status = 'PENDING'
    ORDER BY created_at ASC, id ASC
    LIMIT $1
"#;

// Only a PENDING row may move; a second mark matches nothing.
const MARK_TERMINAL_SQL: &str = r#"
    UPDATE outbox
    SET status = $2, processed_at = NOW()
    WHERE id = $1 AND status = 'PENDING'
"#;

const SELECT_ORDERS_SQL: &str = r#"
    SELECT id, order_number, customer_id, order_date, street, city, state,
           postal_code, country, status, version
    FROM orders
"#;

const INSERT_ORDER_SQL: &str = r#"
    INSERT INTO orders (order_number, customer_id, order_date, street, city,
                        state, postal_code, country, status, version)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 1)
    RETURNING id
"#;

// Matches nothing if another transaction bumped the version or deleted the
// row since the order was read.
const UPDATE_ORDER_SQL: &str = r#"
    UPDATE orders
    SET customer_id = $2, order_date = $3, street = $4, city = $5,
        state = $6, postal_code = $7, country = $8, status = $9,
        version = version + 1
    WHERE id = $1 AND version = $10
"#;

// Takes the row lock at once, so an UPDATE racing it waits and then matches
// nothing.
const DELETE_ORDER_SQL: &str = "DELETE FROM orders WHERE order_number = $1";

#[derive(FromRow)]
struct OrderRow {
    id: i64,
    order_number: String,
    customer_id: String,
    order_date: DateTime<Utc>,
    street: String,
    city: String,
    state: String,
    postal_code: String,
    country: String,
    status: String,
    version: i64,
}

#[derive(FromRow)]
struct OrderItemRow {
    order_id: i64,
    product_number: String,
    quantity: i32,
    unit_price: Decimal,
}

#[derive(FromRow)]
struct OutboxRow {
    id: Uuid,
    aggregate_type: String,
    aggregate_id: Uuid,
    event_type: String,
    payload: String,
    status: String,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxMessage {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let status = OutboxStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Corrupt(format!("Invalid outbox status: {}", row.status)))?;
        Ok(OutboxMessage {
            id: row.id,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            payload: row.payload,
            status,
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}

fn corrupt(e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

fn item_from_row(row: OrderItemRow) -> Result<OrderItem, StoreError> {
    let quantity = u32::try_from(row.quantity).map_err(corrupt)?;
    OrderItem::new(
        ProductNumber::new(row.product_number).map_err(corrupt)?,
        Quantity::new(quantity).map_err(corrupt)?,
        row.unit_price,
    )
    .map_err(corrupt)
}

fn order_from_row(row: OrderRow, items: Vec<OrderItem>) -> Result<Order, StoreError> {
    let status = OrderStatus::parse(&row.status)
        .ok_or_else(|| StoreError::Corrupt(format!("Invalid order status: {}", row.status)))?;
    Ok(Order::restore(
        OrderId(row.id),
        OrderNumber::new(row.order_number).map_err(corrupt)?,
        CustomerId::new(row.customer_id).map_err(corrupt)?,
        row.order_date,
        items,
        ShippingAddress {
            street: row.street,
            city: row.city,
            state: row.state,
            postal_code: row.postal_code,
            country: row.country,
        },
        status,
        u64::try_from(row.version).map_err(corrupt)?,
    ))
}

fn version_param(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|e| StoreError::InvalidOrder(e.to_string()))
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Database schema is up to date");
        Ok(())
    }

    async fn mark(&self, id: Uuid, outcome: OutboxStatus) -> Result<bool, StoreError> {
        let result = sqlx::query(MARK_TERMINAL_SQL)
            .bind(id)
            .bind(outcome.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_items(
        tx: &mut Transaction<'static, Postgres>,
        order_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<OrderItem>>, StoreError> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            r#"
            SELECT order_id, product_number, quantity, unit_price
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position
            "#,
        )
        .bind(order_ids)
        .fetch_all(&mut **tx)
        .await?;

        let mut items: HashMap<i64, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            let order_id = row.order_id;
            items.entry(order_id).or_default().push(item_from_row(row)?);
        }
        Ok(items)
    }
}

#[async_trait]
impl Transactional for PostgresStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PostgresStore {
    async fn save(&self, tx: &mut Self::Tx, mut order: Order) -> Result<Order, StoreError> {
        let order_number = order
            .order_number()
            .cloned()
            .ok_or_else(|| StoreError::InvalidOrder("order has no order number".to_string()))?;
        let address = order.shipping_address().clone();
        let expected = order.version();

        let id = match order.id() {
            None => {
                let (id,): (i64,) = sqlx::query_as(INSERT_ORDER_SQL)
                    .bind(order_number.as_str())
                    .bind(order.customer_id().as_str())
                    .bind(order.order_date())
                    .bind(&address.street)
                    .bind(&address.city)
                    .bind(&address.state)
                    .bind(&address.postal_code)
                    .bind(&address.country)
                    .bind(order.status().as_str())
                    .fetch_one(&mut **tx)
                    .await?;
                order
                    .assign_id(OrderId(id))
                    .map_err(|e| StoreError::InvalidOrder(e.to_string()))?;
                id
            }
            Some(OrderId(id)) => {
                let result = sqlx::query(UPDATE_ORDER_SQL)
                    .bind(id)
                    .bind(order.customer_id().as_str())
                    .bind(order.order_date())
                    .bind(&address.street)
                    .bind(&address.city)
                    .bind(&address.state)
                    .bind(&address.postal_code)
                    .bind(&address.country)
                    .bind(order.status().as_str())
                    .bind(version_param(expected)?)
                    .execute(&mut **tx)
                    .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::ConcurrentModification(order_number.to_string()));
                }

                sqlx::query("DELETE FROM order_items WHERE order_id = $1")
                    .bind(id)
                    .execute(&mut **tx)
                    .await?;
                id
            }
        };

        for (position, item) in order.items().iter().enumerate() {
            let quantity = i32::try_from(item.quantity().value())
                .map_err(|e| StoreError::InvalidOrder(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, position, product_number, quantity, unit_price)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(id)
            .bind(position as i32)
            .bind(item.product_number().as_str())
            .bind(quantity)
            .bind(item.unit_price())
            .execute(&mut **tx)
            .await?;
        }

        order.set_version(expected + 1);
        tracing::debug!(
            order_id = id,
            order_number = %order_number,
            version = order.version(),
            "Saved order"
        );
        Ok(order)
    }

    async fn find_by_order_number(
        &self,
        tx: &mut Self::Tx,
        order_number: &OrderNumber,
    ) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "{SELECT_ORDERS_SQL} WHERE order_number = $1"
        ))
        .bind(order_number.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut items = Self::load_items(tx, &[row.id]).await?;
        let order_items = items.remove(&row.id).unwrap_or_default();
        order_from_row(row, order_items).map(Some)
    }

    async fn find_all(&self, tx: &mut Self::Tx) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!("{SELECT_ORDERS_SQL} ORDER BY id"))
            .fetch_all(&mut **tx)
            .await?;

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut items = Self::load_items(tx, &ids).await?;

        rows.into_iter()
            .map(|row| {
                let order_items = items.remove(&row.id).unwrap_or_default();
                order_from_row(row, order_items)
            })
            .collect()
    }

    async fn delete_by_order_number(
        &self,
        tx: &mut Self::Tx,
        order_number: &OrderNumber,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(DELETE_ORDER_SQL)
            .bind(order_number.as_str())
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl OutboxRepository for PostgresStore {
    async fn append(&self, tx: &mut Self::Tx, message: &OutboxMessage) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO outbox (id, aggregate_type, aggregate_id, event_type, payload,
                                status, created_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(message.id)
        .bind(&message.aggregate_type)
        .bind(message.aggregate_id)
        .bind(&message.event_type)
        .bind(&message.payload)
        .bind(message.status.as_str())
        .bind(message.created_at)
        .bind(message.processed_at)
        .execute(&mut **tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateOutboxMessage(message.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<OutboxMessage>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, OutboxRow>(CLAIM_PENDING_SQL)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(OutboxMessage::try_from).collect()
    }

    async fn mark_processed(&self, id: Uuid) -> Result<bool, StoreError> {
        self.mark(id, OutboxStatus::Processed).await
    }

    async fn mark_failed(&self, id: Uuid) -> Result<bool, StoreError> {
        self.mark(id, OutboxStatus::Failed).await
    }

    async fn stats(&self) -> Result<OutboxStats, StoreError> {
        #[derive(FromRow)]
        struct StatsRow {
            pending_count: Option<i64>,
            processed_count: Option<i64>,
            failed_count: Option<i64>,
        }
        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT
                COUNT(CASE WHEN status = 'PENDING' THEN 1 END) as pending_count,
                COUNT(CASE WHEN status = 'PROCESSED' THEN 1 END) as processed_count,
                COUNT(CASE WHEN status = 'FAILED' THEN 1 END) as failed_count
            FROM outbox
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(OutboxStats {
            pending: row.pending_count.unwrap_or(0) as u64,
            processed: row.processed_count.unwrap_or(0) as u64,
            failed: row.failed_count.unwrap_or(0) as u64,
        })
    }
}
