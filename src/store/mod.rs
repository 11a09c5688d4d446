// ============================================================================
// Persistence Ports
// ============================================================================
//
// One store owns both the order rows and the outbox rows so that an aggregate
// mutation and the outbox messages it produced commit in a single local
// transaction.
//
//   begin() -> Tx -> save/append stage writes -> commit(Tx)
//
// Dropping a Tx without committing rolls it back.
//
// ============================================================================

mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::order::{Order, OrderNumber};
use crate::outbox::OutboxMessage;

pub use memory::{InMemoryStore, MemoryTx};
pub use postgres::PostgresStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Duplicate outbox message id: {0}")]
    DuplicateOutboxMessage(Uuid),

    #[error("Cannot persist order: {0}")]
    InvalidOrder(String),

    /// Another transaction changed or removed the order since it was loaded.
    #[error("Order {0} was modified concurrently")]
    ConcurrentModification(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Row counts by outbox status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxStats {
    pub pending: u64,
    pub processed: u64,
    pub failed: u64,
}

#[async_trait]
pub trait Transactional: Send + Sync {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Apply every write staged in `tx`, all or nothing.
    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;
}

#[async_trait]
pub trait OrderRepository: Transactional {
    /// Insert or update. Assigns an identity on first save and bumps the
    /// order's version. The write only takes effect if the stored version
    /// still equals the one the order was loaded at; otherwise the save or the
    /// commit fails with [`StoreError::ConcurrentModification`].
    async fn save(&self, tx: &mut Self::Tx, order: Order) -> Result<Order, StoreError>;

    async fn find_by_order_number(
        &self,
        tx: &mut Self::Tx,
        order_number: &OrderNumber,
    ) -> Result<Option<Order>, StoreError>;

    async fn find_all(&self, tx: &mut Self::Tx) -> Result<Vec<Order>, StoreError>;

    /// Returns whether an order was deleted.
    async fn delete_by_order_number(
        &self,
        tx: &mut Self::Tx,
        order_number: &OrderNumber,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait OutboxRepository: Transactional {
    /// Stage a message in the caller's transaction. Never commits on its own.
    async fn append(&self, tx: &mut Self::Tx, message: &OutboxMessage) -> Result<(), StoreError>;

    /// Up to `limit` PENDING messages, oldest first. Read-only.
    async fn claim_pending(&self, limit: usize) -> Result<Vec<OutboxMessage>, StoreError>;

    /// PENDING -> PROCESSED. `Ok(false)` if the message was already terminal
    /// or does not exist.
    async fn mark_processed(&self, id: Uuid) -> Result<bool, StoreError>;

    /// PENDING -> FAILED. Same idempotency as [`OutboxRepository::mark_processed`].
    async fn mark_failed(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn stats(&self) -> Result<OutboxStats, StoreError>;
}
