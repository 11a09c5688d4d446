use std::sync::Arc;

use super::aggregate::{Order, OrderDraft};
use super::errors::OrderError;
use super::events::OrderEvent;
use super::integration::integration_event_for;
use super::number::OrderNumberGenerator;
use super::validation::OrderValidationService;
use super::value_objects::{OrderItem, OrderNumber};
use crate::metrics::Metrics;
use crate::notify::EventNotifier;
use crate::outbox::{aggregate_id_for, OutboxMessage};
use crate::store::{OrderRepository, OutboxRepository};

pub const ORDER_AGGREGATE_TYPE: &str = "Order";

// ============================================================================
// Order Service
// ============================================================================
//
// Orchestrates: load -> mutate aggregate -> save -> drain events -> append
// outbox rows -> commit, all in one store transaction. Any failure before
// commit drops the transaction and nothing is written. A commit that loses
// a race with another write to the same order fails with
// StoreError::ConcurrentModification and also writes nothing.
//
// Outbox rows carry integration events, not the domain events themselves.
//
// In-process notification happens only after commit and is best-effort.
//
// ============================================================================

pub struct OrderService<S> {
    store: Arc<S>,
    numbers: Arc<dyn OrderNumberGenerator>,
    validator: Arc<dyn OrderValidationService>,
    notifier: EventNotifier,
    metrics: Option<Arc<Metrics>>,
}

impl<S> OrderService<S>
where
    S: OrderRepository + OutboxRepository,
{
    pub fn new(
        store: Arc<S>,
        numbers: Arc<dyn OrderNumberGenerator>,
        validator: Arc<dyn OrderValidationService>,
        notifier: EventNotifier,
    ) -> Self {
        Self {
            store,
            numbers,
            validator,
            notifier,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn notifier(&self) -> &EventNotifier {
        &self.notifier
    }

    /// Validate, number, and persist a new order together with its
    /// `OrderCreated` outbox row.
    pub async fn create_order(&self, draft: OrderDraft) -> Result<Order, OrderError> {
        self.validator.validate(&draft)?;

        let order_number = self.numbers.generate();
        let order = Order::create(Some(order_number.clone()), draft)?;

        let mut tx = self.store.begin().await?;
        let (order, events) = self.persist(&mut tx, order).await?;
        self.store.commit(tx).await?;

        tracing::info!(
            order_number = %order_number,
            order_id = ?order.id(),
            events = events.len(),
            "Order created"
        );
        if let Some(metrics) = &self.metrics {
            metrics.orders_created.inc();
        }
        self.notify(events);
        Ok(order)
    }

    /// PENDING -> CONFIRMED, with its `OrderConfirmed` outbox row.
    pub async fn confirm_order(&self, order_number: &OrderNumber) -> Result<Order, OrderError> {
        let mut tx = self.store.begin().await?;
        let mut order = self.load(&mut tx, order_number).await?;

        order.confirm()?;

        let (order, events) = self.persist(&mut tx, order).await?;
        self.store.commit(tx).await?;

        tracing::info!(order_number = %order_number, "Order confirmed");
        if let Some(metrics) = &self.metrics {
            metrics.orders_confirmed.inc();
        }
        self.notify(events);
        Ok(order)
    }

    pub async fn get_order(&self, order_number: &OrderNumber) -> Result<Option<Order>, OrderError> {
        let mut tx = self.store.begin().await?;
        Ok(self.store.find_by_order_number(&mut tx, order_number).await?)
    }

    pub async fn list_orders(&self) -> Result<Vec<Order>, OrderError> {
        let mut tx = self.store.begin().await?;
        Ok(self.store.find_all(&mut tx).await?)
    }

    /// Remove an order. Raises no event.
    pub async fn delete_order(&self, order_number: &OrderNumber) -> Result<(), OrderError> {
        let mut tx = self.store.begin().await?;
        if !self.store.delete_by_order_number(&mut tx, order_number).await? {
            return Err(OrderError::NotFound(order_number.clone()));
        }
        self.store.commit(tx).await?;

        tracing::info!(order_number = %order_number, "Order deleted");
        Ok(())
    }

    /// Add a line item to a PENDING order, with its `OrderItemAdded` outbox row.
    pub async fn add_item(
        &self,
        order_number: &OrderNumber,
        item: OrderItem,
    ) -> Result<Order, OrderError> {
        let mut tx = self.store.begin().await?;
        let mut order = self.load(&mut tx, order_number).await?;

        order.add_item(item)?;

        let (order, events) = self.persist(&mut tx, order).await?;
        self.store.commit(tx).await?;

        tracing::debug!(order_number = %order_number, items = order.items().len(), "Item added");
        self.notify(events);
        Ok(order)
    }

    /// Remove a line item from a PENDING order. Returns whether one matched.
    pub async fn remove_item(
        &self,
        order_number: &OrderNumber,
        item: &OrderItem,
    ) -> Result<bool, OrderError> {
        let mut tx = self.store.begin().await?;
        let mut order = self.load(&mut tx, order_number).await?;

        if !order.remove_item(item)? {
            return Ok(false);
        }

        let (order, events) = self.persist(&mut tx, order).await?;
        self.store.commit(tx).await?;

        tracing::debug!(order_number = %order_number, items = order.items().len(), "Item removed");
        self.notify(events);
        Ok(true)
    }

    async fn load(&self, tx: &mut S::Tx, order_number: &OrderNumber) -> Result<Order, OrderError> {
        self.store
            .find_by_order_number(tx, order_number)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_number.clone()))
    }

    /// Save the order and stage one outbox row per drained event that has a
    /// published form.
    async fn persist(
        &self,
        tx: &mut S::Tx,
        order: Order,
    ) -> Result<(Order, Vec<OrderEvent>), OrderError> {
        let mut order = self.store.save(tx, order).await?;
        let events = order.drain_domain_events();

        for event in &events {
            let Some(published) = integration_event_for(event) else {
                tracing::debug!(
                    event_id = %event.event_id(),
                    event_type = event.event_type(),
                    "Domain event has no integration event, not publishing"
                );
                continue;
            };

            let message = OutboxMessage::create_pending(
                ORDER_AGGREGATE_TYPE,
                aggregate_id_for(published.order_number().as_str()),
                published.event_type(),
                published.payload()?,
            );
            self.store.append(tx, &message).await?;

            tracing::debug!(
                message_id = %message.id,
                event_id = %event.event_id(),
                event_type = %message.event_type,
                "Staged outbox message"
            );
        }

        Ok((order, events))
    }

    fn notify(&self, events: Vec<OrderEvent>) {
        for event in events {
            self.notifier.publish(event);
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{
        CustomerId, DefaultOrderValidator, OrderStatus, ProductNumber, Quantity, ShippingAddress,
        UuidOrderNumberGenerator,
    };
    use crate::messaging::{MessagePublisher, PublishError, TopicMapper};
    use crate::outbox::{OutboxProcessor, OutboxProcessorConfig, OutboxStatus};
    use crate::store::{
        InMemoryStore, MemoryTx, OutboxStats, StoreError, Transactional,
    };
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    // ========================================================================
    // Test doubles
    // ========================================================================

    /// Delegates to an in-memory store, failing chosen writes.
    #[derive(Default)]
    struct FaultyStore {
        inner: InMemoryStore,
        fail_save: bool,
        fail_append: bool,
    }

    #[async_trait]
    impl Transactional for FaultyStore {
        type Tx = MemoryTx;

        async fn begin(&self) -> Result<MemoryTx, StoreError> {
            self.inner.begin().await
        }

        async fn commit(&self, tx: MemoryTx) -> Result<(), StoreError> {
            self.inner.commit(tx).await
        }
    }

    #[async_trait]
    impl OrderRepository for FaultyStore {
        async fn save(&self, tx: &mut MemoryTx, order: Order) -> Result<Order, StoreError> {
            if self.fail_save {
                return Err(StoreError::Unavailable("orders table offline".to_string()));
            }
            self.inner.save(tx, order).await
        }

        async fn find_by_order_number(
            &self,
            tx: &mut MemoryTx,
            order_number: &OrderNumber,
        ) -> Result<Option<Order>, StoreError> {
            self.inner.find_by_order_number(tx, order_number).await
        }

        async fn find_all(&self, tx: &mut MemoryTx) -> Result<Vec<Order>, StoreError> {
            self.inner.find_all(tx).await
        }

        async fn delete_by_order_number(
            &self,
            tx: &mut MemoryTx,
            order_number: &OrderNumber,
        ) -> Result<bool, StoreError> {
            self.inner.delete_by_order_number(tx, order_number).await
        }
    }

    #[async_trait]
    impl OutboxRepository for FaultyStore {
        async fn append(&self, tx: &mut MemoryTx, message: &OutboxMessage) -> Result<(), StoreError> {
            if self.fail_append {
                return Err(StoreError::Unavailable("outbox table offline".to_string()));
            }
            self.inner.append(tx, message).await
        }

        async fn claim_pending(&self, limit: usize) -> Result<Vec<OutboxMessage>, StoreError> {
            self.inner.claim_pending(limit).await
        }

        async fn mark_processed(&self, id: Uuid) -> Result<bool, StoreError> {
            self.inner.mark_processed(id).await
        }

        async fn mark_failed(&self, id: Uuid) -> Result<bool, StoreError> {
            self.inner.mark_failed(id).await
        }

        async fn stats(&self) -> Result<OutboxStats, StoreError> {
            self.inner.stats().await
        }
    }

    /// Fails every publish to destinations containing `fail_on`.
    struct SelectivePublisher {
        fail_on: &'static str,
    }

    #[async_trait]
    impl MessagePublisher for SelectivePublisher {
        async fn publish(&self, destination: &str, _payload: &str) -> Result<(), PublishError> {
            if destination.contains(self.fail_on) {
                return Err(PublishError::Rejected(destination.to_string()));
            }
            Ok(())
        }
    }

    // ========================================================================
    // Fixtures
    // ========================================================================

    fn item(product: &str, quantity: u32) -> OrderItem {
        OrderItem::new(
            ProductNumber::new(product).unwrap(),
            Quantity::new(quantity).unwrap(),
            Decimal::new(2500, 2),
        )
        .unwrap()
    }

    fn draft(items: Vec<OrderItem>) -> OrderDraft {
        OrderDraft::new(
            CustomerId::new("CUST-001").unwrap(),
            items,
            ShippingAddress {
                street: "123 Main St".to_string(),
                city: "Springfield".to_string(),
                state: "IL".to_string(),
                postal_code: "62701".to_string(),
                country: "USA".to_string(),
            },
        )
    }

    fn service<S: OrderRepository + OutboxRepository>(store: Arc<S>) -> OrderService<S> {
        OrderService::new(
            store,
            Arc::new(UuidOrderNumberGenerator),
            Arc::new(DefaultOrderValidator::default()),
            EventNotifier::default(),
        )
    }

    fn number(order: &Order) -> OrderNumber {
        order.order_number().cloned().unwrap()
    }

    // ========================================================================
    // Tests
    // ========================================================================

    #[tokio::test]
    async fn test_create_order_writes_one_pending_created_row() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(store.clone());

        let order = service
            .create_order(draft(vec![item("PROD-001", 1), item("PROD-002", 2)]))
            .await
            .unwrap();

        assert!(order.id().is_some());
        assert!(!number(&order).as_str().is_empty());
        assert!(order.domain_events().is_empty());

        let rows = store.outbox_messages().await;
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.aggregate_type, "Order");
        assert_eq!(row.event_type, "OrderCreated");
        assert_eq!(row.status, OutboxStatus::Pending);
        assert_eq!(row.aggregate_id, aggregate_id_for(number(&order).as_str()));

        let payload: serde_json::Value = serde_json::from_str(&row.payload).unwrap();
        assert_eq!(payload["orderNumber"], number(&order).as_str());
        assert_eq!(payload["shippingAddress"]["city"], "Springfield");
    }

    #[tokio::test]
    async fn test_create_order_rejects_invalid_draft() {
        let store = Arc::new(InMemoryStore::new());
        let err = service(store.clone())
            .create_order(draft(vec![]))
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::Validation(_)));
        assert!(err.is_client_error());
        assert_eq!(store.order_count().await, 0);
        assert!(store.outbox_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_save_appends_nothing() {
        let store = Arc::new(FaultyStore {
            fail_save: true,
            ..Default::default()
        });

        let err = service(store.clone())
            .create_order(draft(vec![item("PROD-001", 1)]))
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::Persistence(_)));
        assert!(!err.is_client_error());
        assert!(store.inner.outbox_messages().await.is_empty());
        assert_eq!(store.inner.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_append_rolls_back_order() {
        let store = Arc::new(FaultyStore {
            fail_append: true,
            ..Default::default()
        });

        let err = service(store.clone())
            .create_order(draft(vec![item("PROD-001", 1)]))
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::Persistence(_)));
        assert_eq!(store.inner.order_count().await, 0);
        assert!(store.inner.outbox_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_confirm_append_keeps_order_pending() {
        let store = Arc::new(FaultyStore::default());
        let order = service(store.clone())
            .create_order(draft(vec![item("PROD-001", 1)]))
            .await
            .unwrap();

        let broken = Arc::new(FaultyStore {
            inner: store.inner.clone(),
            fail_append: true,
            ..Default::default()
        });
        let err = service(broken.clone())
            .confirm_order(&number(&order))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Persistence(_)));

        let reloaded = service(store.clone())
            .get_order(&number(&order))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.status(), OrderStatus::Pending);
        assert_eq!(store.inner.outbox_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_order() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(store.clone());
        let order = service
            .create_order(draft(vec![item("PROD-001", 1)]))
            .await
            .unwrap();

        let confirmed = service.confirm_order(&number(&order)).await.unwrap();
        assert_eq!(confirmed.status(), OrderStatus::Confirmed);

        let err = service.confirm_order(&number(&order)).await.unwrap_err();
        assert!(matches!(err, OrderError::InvalidStateTransition { .. }));

        let types: Vec<_> = store
            .outbox_messages()
            .await
            .into_iter()
            .map(|m| m.event_type)
            .collect();
        assert_eq!(types, vec!["OrderCreated", "OrderConfirmed"]);
    }

    #[tokio::test]
    async fn test_confirm_row_carries_integration_payload() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(store.clone());
        let order = service
            .create_order(draft(vec![item("PROD-001", 1)]))
            .await
            .unwrap();

        service.confirm_order(&number(&order)).await.unwrap();

        let row = store.outbox_messages().await.pop().unwrap();
        assert_eq!(row.event_type, "OrderConfirmed");
        let payload: serde_json::Value = serde_json::from_str(&row.payload).unwrap();
        assert_eq!(payload["orderNumber"], number(&order).as_str());
        assert_eq!(payload["eventType"], "OrderConfirmed");
        assert!(payload.get("confirmedAt").is_some());
        assert!(payload.get("orderId").is_none());
        assert!(payload.get("eventId").is_none());
    }

    #[tokio::test]
    async fn test_interleaved_confirms_publish_once() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(store.clone());
        let order = service
            .create_order(draft(vec![item("PROD-001", 1)]))
            .await
            .unwrap();
        let order_number = number(&order);

        // both transactions read the order while it is still PENDING
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let mut a = service.load(&mut first, &order_number).await.unwrap();
        let mut b = service.load(&mut second, &order_number).await.unwrap();
        a.confirm().unwrap();
        b.confirm().unwrap();
        service.persist(&mut first, a).await.unwrap();
        service.persist(&mut second, b).await.unwrap();

        store.commit(first).await.unwrap();
        let err = store.commit(second).await.unwrap_err();
        assert!(matches!(err, StoreError::ConcurrentModification(_)));

        let confirmed_rows = store
            .outbox_messages()
            .await
            .into_iter()
            .filter(|m| m.event_type == "OrderConfirmed")
            .count();
        assert_eq!(confirmed_rows, 1);
    }

    #[tokio::test]
    async fn test_stale_confirm_cannot_resurrect_deleted_order() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(store.clone());
        let order = service
            .create_order(draft(vec![item("PROD-001", 1)]))
            .await
            .unwrap();
        let order_number = number(&order);

        let mut stale = store.begin().await.unwrap();
        let mut loaded = service.load(&mut stale, &order_number).await.unwrap();

        service.delete_order(&order_number).await.unwrap();

        loaded.confirm().unwrap();
        service.persist(&mut stale, loaded).await.unwrap();
        assert!(store.commit(stale).await.is_err());

        assert!(service.get_order(&order_number).await.unwrap().is_none());
        assert_eq!(store.outbox_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_modification_surfaces_as_persistence_error() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(store.clone());
        let order = service
            .create_order(draft(vec![item("PROD-001", 1)]))
            .await
            .unwrap();
        let order_number = number(&order);

        // a confirm staged but not yet committed
        let mut pending = store.begin().await.unwrap();
        let mut loaded = service.load(&mut pending, &order_number).await.unwrap();
        loaded.confirm().unwrap();
        service.persist(&mut pending, loaded).await.unwrap();

        service
            .add_item(&order_number, item("PROD-002", 1))
            .await
            .unwrap();

        let err: OrderError = store.commit(pending).await.unwrap_err().into();
        assert!(matches!(
            err,
            OrderError::Persistence(StoreError::ConcurrentModification(_))
        ));
        assert!(!err.is_client_error());
        let reloaded = service.get_order(&order_number).await.unwrap().unwrap();
        assert_eq!(reloaded.status(), OrderStatus::Pending);
        assert_eq!(reloaded.items().len(), 2);
    }

    #[tokio::test]
    async fn test_confirm_unknown_order_is_not_found() {
        let service = service(Arc::new(InMemoryStore::new()));
        let err = service
            .confirm_order(&OrderNumber::new("ORD-404").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::NotFound(n) if n.as_str() == "ORD-404"));
    }

    #[tokio::test]
    async fn test_get_list_delete() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(store.clone());
        let a = service.create_order(draft(vec![item("PROD-001", 1)])).await.unwrap();
        let b = service.create_order(draft(vec![item("PROD-002", 1)])).await.unwrap();

        assert_eq!(service.list_orders().await.unwrap().len(), 2);
        let fetched = service.get_order(&number(&a)).await.unwrap().unwrap();
        assert_eq!(fetched.id(), a.id());
        assert_eq!(fetched.total(), Decimal::new(2500, 2));

        service.delete_order(&number(&a)).await.unwrap();
        assert!(service.get_order(&number(&a)).await.unwrap().is_none());
        assert_eq!(service.list_orders().await.unwrap()[0].id(), b.id());

        let err = service.delete_order(&number(&a)).await.unwrap_err();
        assert!(matches!(err, OrderError::NotFound(_)));
        // deletion raises no outbox row
        assert_eq!(store.outbox_messages().await.len(), 2);
    }

    #[tokio::test]
    async fn test_add_and_remove_items() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(store.clone());
        let order = service.create_order(draft(vec![item("PROD-001", 1)])).await.unwrap();

        let updated = service
            .add_item(&number(&order), item("PROD-002", 4))
            .await
            .unwrap();
        assert_eq!(updated.items().len(), 2);

        let rows = store.outbox_messages().await;
        assert_eq!(rows[1].event_type, "OrderItemAdded");
        let payload: serde_json::Value = serde_json::from_str(&rows[1].payload).unwrap();
        assert_eq!(payload["itemId"], 2);
        assert_eq!(payload["productNumber"], "PROD-002");
        assert_eq!(payload["quantity"], 4);

        assert!(service
            .remove_item(&number(&order), &item("PROD-002", 4))
            .await
            .unwrap());
        assert!(!service
            .remove_item(&number(&order), &item("PROD-999", 1))
            .await
            .unwrap());
        let reloaded = service.get_order(&number(&order)).await.unwrap().unwrap();
        assert_eq!(reloaded.items().len(), 1);
        assert_eq!(store.outbox_messages().await.len(), 2);
    }

    #[tokio::test]
    async fn test_items_frozen_after_confirm() {
        let service = service(Arc::new(InMemoryStore::new()));
        let order = service.create_order(draft(vec![item("PROD-001", 1)])).await.unwrap();
        service.confirm_order(&number(&order)).await.unwrap();

        let err = service
            .add_item(&number(&order), item("PROD-002", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::InvalidStateTransition { .. }));

        let err = service
            .remove_item(&number(&order), &item("PROD-001", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_notifies_after_commit_only() {
        let store = Arc::new(FaultyStore::default());
        let service = service(store.clone());
        let mut rx = service.notifier().subscribe();

        let order = service.create_order(draft(vec![item("PROD-001", 1)])).await.unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type(), "OrderCreated");
        assert_eq!(event.order_number(), &number(&order));

        let broken = OrderService::new(
            Arc::new(FaultyStore {
                inner: store.inner.clone(),
                fail_append: true,
                ..Default::default()
            }),
            Arc::new(UuidOrderNumberGenerator),
            Arc::new(DefaultOrderValidator::default()),
            service.notifier().clone(),
        );
        assert!(broken.confirm_order(&number(&order)).await.is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_metrics_count_lifecycle() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let service = service(Arc::new(InMemoryStore::new())).with_metrics(metrics.clone());

        let order = service.create_order(draft(vec![item("PROD-001", 1)])).await.unwrap();
        service.confirm_order(&number(&order)).await.unwrap();

        assert_eq!(metrics.orders_created.get(), 1);
        assert_eq!(metrics.orders_confirmed.get(), 1);
    }

    #[tokio::test]
    async fn test_created_and_item_added_rows_settle_independently() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(store.clone());
        let order = service
            .create_order(draft(vec![item("PROD-001", 1), item("PROD-002", 1)]))
            .await
            .unwrap();
        service
            .add_item(&number(&order), item("PROD-003", 1))
            .await
            .unwrap();

        let processor = OutboxProcessor::new(
            store.clone(),
            Arc::new(SelectivePublisher {
                fail_on: "order-created",
            }),
            Arc::new(TopicMapper::default()),
            OutboxProcessorConfig::default(),
        );
        let report = processor.run_once().await.unwrap();
        assert_eq!(report.claimed, 2);

        let rows = store.outbox_messages().await;
        assert_eq!(rows[0].event_type, "OrderCreated");
        assert_eq!(rows[0].status, OutboxStatus::Failed);
        assert_eq!(rows[1].event_type, "OrderItemAdded");
        assert_eq!(rows[1].status, OutboxStatus::Processed);
        assert!(rows[0].processed_at.is_some());
        assert!(rows[1].processed_at.is_some());
    }
}
