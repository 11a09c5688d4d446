use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{OrderRepository, OutboxRepository, OutboxStats, StoreError, Transactional};
use crate::domain::order::{Order, OrderId, OrderNumber};
use crate::outbox::{OutboxMessage, OutboxStatus};

// ============================================================================
// In-Memory Store
// ============================================================================
//
// Writes are staged in a MemoryTx and applied under a single write lock on
// commit, so readers never observe half a unit of work.
//
// Order writes carry the version they were read at. Commit replays them
// against the stored versions first and rejects the whole transaction if any
// order changed or disappeared in between.
//
// ============================================================================

#[derive(Default)]
struct MemoryState {
    orders: BTreeMap<i64, Order>,
    // insertion order doubles as the tie-breaker for equal created_at
    outbox: Vec<OutboxMessage>,
}

#[derive(Debug, Clone)]
enum StagedWrite {
    Upsert { order: Order, expected: u64 },
    Delete { id: i64, number: OrderNumber, expected: u64 },
    Append(OutboxMessage),
}

/// Pending unit of work against an [`InMemoryStore`].
#[derive(Debug, Default)]
pub struct MemoryTx {
    writes: Vec<StagedWrite>,
}

impl MemoryTx {
    pub fn staged_writes(&self) -> usize {
        self.writes.len()
    }

    fn staged_order(&self, order_number: &OrderNumber) -> Option<Option<Order>> {
        self.writes.iter().rev().find_map(|write| match write {
            StagedWrite::Upsert { order, .. } if order.order_number() == Some(order_number) => {
                Some(Some(order.clone()))
            }
            StagedWrite::Delete { number, .. } if number == order_number => Some(None),
            _ => None,
        })
    }
}

#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
    next_order_id: Arc<AtomicI64>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            next_order_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Every outbox row in insertion order.
    pub async fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.state.read().await.outbox.clone()
    }

    pub async fn outbox_message(&self, id: Uuid) -> Option<OutboxMessage> {
        self.state
            .read()
            .await
            .outbox
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    async fn complete(&self, id: Uuid, outcome: OutboxStatus) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(message) = state.outbox.iter_mut().find(|m| m.id == id) else {
            tracing::debug!(message_id = %id, "Outbox message not found, nothing to mark");
            return Ok(false);
        };
        Ok(message.complete(outcome, Utc::now()))
    }
}

#[async_trait]
impl Transactional for InMemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        Ok(MemoryTx::default())
    }

    async fn commit(&self, tx: MemoryTx) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        // Validate everything before touching state
        let mut seen: HashSet<Uuid> = state.outbox.iter().map(|m| m.id).collect();
        // order id -> version as of this point in the replay, None once deleted
        let mut versions: HashMap<i64, Option<u64>> = HashMap::new();
        for write in &tx.writes {
            match write {
                StagedWrite::Append(message) => {
                    if !seen.insert(message.id) {
                        return Err(StoreError::DuplicateOutboxMessage(message.id));
                    }
                }
                StagedWrite::Upsert { order, expected } => {
                    let Some(OrderId(id)) = order.id() else {
                        return Err(StoreError::InvalidOrder("staged order has no id".to_string()));
                    };
                    let current = *versions
                        .entry(id)
                        .or_insert_with(|| state.orders.get(&id).map(Order::version));
                    // an unsaved order expects nothing stored yet
                    if current.unwrap_or(0) != *expected {
                        return Err(conflict(order.order_number()));
                    }
                    versions.insert(id, Some(order.version()));
                }
                StagedWrite::Delete {
                    id,
                    number,
                    expected,
                } => {
                    let current = *versions
                        .entry(*id)
                        .or_insert_with(|| state.orders.get(id).map(Order::version));
                    if current != Some(*expected) {
                        return Err(conflict(Some(number)));
                    }
                    versions.insert(*id, None);
                }
            }
        }

        let write_count = tx.writes.len();
        for write in tx.writes {
            match write {
                StagedWrite::Upsert { order, .. } => {
                    if let Some(OrderId(id)) = order.id() {
                        state.orders.insert(id, order);
                    }
                }
                StagedWrite::Delete { id, .. } => {
                    state.orders.remove(&id);
                }
                StagedWrite::Append(message) => state.outbox.push(message),
            }
        }

        tracing::debug!(write_count, "Committed in-memory transaction");
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn save(&self, tx: &mut MemoryTx, mut order: Order) -> Result<Order, StoreError> {
        if order.id().is_none() {
            let id = OrderId(self.next_order_id.fetch_add(1, Ordering::SeqCst));
            order
                .assign_id(id)
                .map_err(|e| StoreError::InvalidOrder(e.to_string()))?;
        }
        let expected = order.version();
        order.set_version(expected + 1);
        tx.writes.push(StagedWrite::Upsert {
            order: order.persisted_copy(),
            expected,
        });
        Ok(order)
    }

    async fn find_by_order_number(
        &self,
        tx: &mut MemoryTx,
        order_number: &OrderNumber,
    ) -> Result<Option<Order>, StoreError> {
        if let Some(staged) = tx.staged_order(order_number) {
            return Ok(staged);
        }
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .find(|order| order.order_number() == Some(order_number))
            .cloned())
    }

    async fn find_all(&self, tx: &mut MemoryTx) -> Result<Vec<Order>, StoreError> {
        let mut orders = self.state.read().await.orders.clone();
        for write in &tx.writes {
            match write {
                StagedWrite::Upsert { order, .. } => {
                    if let Some(OrderId(id)) = order.id() {
                        orders.insert(id, order.clone());
                    }
                }
                StagedWrite::Delete { id, .. } => {
                    orders.remove(id);
                }
                StagedWrite::Append(_) => {}
            }
        }
        Ok(orders.into_values().collect())
    }

    async fn delete_by_order_number(
        &self,
        tx: &mut MemoryTx,
        order_number: &OrderNumber,
    ) -> Result<bool, StoreError> {
        let Some(order) = self.find_by_order_number(tx, order_number).await? else {
            return Ok(false);
        };
        let Some(OrderId(id)) = order.id() else {
            return Ok(false);
        };
        tx.writes.push(StagedWrite::Delete {
            id,
            number: order_number.clone(),
            expected: order.version(),
        });
        Ok(true)
    }
}

#[async_trait]
impl OutboxRepository for InMemoryStore {
    async fn append(&self, tx: &mut MemoryTx, message: &OutboxMessage) -> Result<(), StoreError> {
        tx.writes.push(StagedWrite::Append(message.clone()));
        Ok(())
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<OutboxMessage>, StoreError> {
        let state = self.state.read().await;
        let mut pending: Vec<OutboxMessage> = state
            .outbox
            .iter()
            .filter(|m| m.status == OutboxStatus::Pending)
            .cloned()
            .collect();
        // stable: equal timestamps keep insertion order
        pending.sort_by_key(|m| m.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_processed(&self, id: Uuid) -> Result<bool, StoreError> {
        self.complete(id, OutboxStatus::Processed).await
    }

    async fn mark_failed(&self, id: Uuid) -> Result<bool, StoreError> {
        self.complete(id, OutboxStatus::Failed).await
    }

    async fn stats(&self) -> Result<OutboxStats, StoreError> {
        let state = self.state.read().await;
        let mut stats = OutboxStats::default();
        for message in &state.outbox {
            match message.status {
                OutboxStatus::Pending => stats.pending += 1,
                OutboxStatus::Processed => stats.processed += 1,
                OutboxStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

fn conflict(order_number: Option<&OrderNumber>) -> StoreError {
    StoreError::ConcurrentModification(
        order_number.map_or_else(|| "<unnumbered>".to_string(), ToString::to_string),
    )
}

// ============================================================================
// Unit Tests
// ============================================================================
