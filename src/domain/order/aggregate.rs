use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::errors::OrderError;
use super::events::{OrderConfirmed, OrderCreated, OrderEvent, OrderItemAdded};
use super::value_objects::{
    CustomerId, OrderId, OrderItem, OrderNumber, OrderStatus, ShippingAddress,
};

// ============================================================================
// Order Draft - unvalidated input for order creation
// ============================================================================

/// Raw order data as received at the boundary. Every field may be missing;
/// [`Order::create`] decides what is acceptable.
#[derive(Debug, Clone, Default)]
pub struct OrderDraft {
    pub customer_id: Option<CustomerId>,
    pub order_date: Option<DateTime<Utc>>,
    pub items: Option<Vec<OrderItem>>,
    pub shipping_address: Option<ShippingAddress>,
    pub status: Option<OrderStatus>,
}

impl OrderDraft {
    /// A complete draft dated now, in PENDING status.
    pub fn new(
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        shipping_address: ShippingAddress,
    ) -> Self {
        Self {
            customer_id: Some(customer_id),
            order_date: Some(Utc::now()),
            items: Some(items),
            shipping_address: Some(shipping_address),
            status: Some(OrderStatus::Pending),
        }
    }
}

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================

#[derive(Debug, Clone)]
pub struct Order {
    // Identity
    id: Option<OrderId>,
    order_number: Option<OrderNumber>,

    // Current State
    customer_id: CustomerId,
    order_date: DateTime<Utc>,
    items: Vec<OrderItem>,
    shipping_address: ShippingAddress,
    status: OrderStatus,

    // Stored revision; 0 until first saved
    version: u64,

    // Raised since the last drain; never persisted
    domain_events: Vec<OrderEvent>,
}

impl Order {
    /// Build a new, not yet persisted order from a draft.
    ///
    /// An order created with a number raises `OrderCreated`. Without a number
    /// the instance is a plain unsaved value and raises nothing.
    pub fn create(order_number: Option<OrderNumber>, draft: OrderDraft) -> Result<Self, OrderError> {
        let customer_id = draft
            .customer_id
            .ok_or_else(|| missing("customer ID"))?;
        let order_date = draft.order_date.ok_or_else(|| missing("order date"))?;
        let items = draft.items.ok_or_else(|| missing("items"))?;
        let shipping_address = draft
            .shipping_address
            .ok_or_else(|| missing("shipping address"))?;
        let status = draft.status.ok_or_else(|| missing("status"))?;

        let mut order = Self {
            id: None,
            order_number,
            customer_id,
            order_date,
            items,
            shipping_address,
            status,
            version: 0,
            domain_events: Vec::new(),
        };

        if let Some(number) = order.order_number.clone() {
            order.domain_events.push(OrderEvent::Created(OrderCreated {
                event_id: Uuid::new_v4(),
                occurred_at: Utc::now(),
                order_id: None,
                order_number: number,
                shipping_address: order.shipping_address.clone(),
            }));
        }

        Ok(order)
    }

    /// Rehydrate a persisted order at the given stored version. Raises no events.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: OrderId,
        order_number: OrderNumber,
        customer_id: CustomerId,
        order_date: DateTime<Utc>,
        items: Vec<OrderItem>,
        shipping_address: ShippingAddress,
        status: OrderStatus,
        version: u64,
    ) -> Self {
        Self {
            id: Some(id),
            order_number: Some(order_number),
            customer_id,
            order_date,
            items,
            shipping_address,
            status,
            version,
            domain_events: Vec::new(),
        }
    }

    /// Called by the store when the order is first persisted.
    pub fn assign_id(&mut self, id: OrderId) -> Result<(), OrderError> {
        if self.order_number.is_none() {
            return Err(OrderError::InvalidAggregateState(
                "Order number cannot be absent for persisted orders".to_string(),
            ));
        }
        match self.id {
            Some(existing) if existing != id => Err(OrderError::InvalidAggregateState(format!(
                "Order already has identity {existing}, cannot reassign to {id}"
            ))),
            _ => {
                self.id = Some(id);
                Ok(())
            }
        }
    }

    pub fn id(&self) -> Option<OrderId> {
        self.id
    }

    pub fn order_number(&self) -> Option<&OrderNumber> {
        self.order_number.as_ref()
    }

    pub fn customer_id(&self) -> &CustomerId {
        &self.customer_id
    }

    pub fn order_date(&self) -> DateTime<Utc> {
        self.order_date
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn shipping_address(&self) -> &ShippingAddress {
        &self.shipping_address
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Revision this instance was loaded at, or the one its last save wrote.
    /// Stores only accept a write whose version still matches what they hold.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn total(&self) -> Decimal {
        self.items.iter().map(OrderItem::line_total).sum()
    }

    /// Events raised since the last drain, oldest first.
    pub fn domain_events(&self) -> &[OrderEvent] {
        &self.domain_events
    }

    /// Take the buffered events, leaving the buffer empty.
    pub fn drain_domain_events(&mut self) -> Vec<OrderEvent> {
        std::mem::take(&mut self.domain_events)
    }

    /// PENDING -> CONFIRMED. Confirming twice is an error, not a no-op.
    pub fn confirm(&mut self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Pending {
            return Err(OrderError::InvalidStateTransition {
                from: self.status,
                action: "confirm",
            });
        }
        let order_number = self.require_number()?;

        self.status = OrderStatus::Confirmed;
        self.domain_events.push(OrderEvent::Confirmed(OrderConfirmed {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            order_id: self.id,
            order_number,
        }));
        Ok(())
    }

    pub fn add_item(&mut self, item: OrderItem) -> Result<(), OrderError> {
        self.ensure_modifiable("add item to")?;
        let order_number = self.require_number()?;

        let product_number = item.product_number().clone();
        let quantity = item.quantity();
        self.items.push(item);

        self.domain_events.push(OrderEvent::ItemAdded(OrderItemAdded {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            order_id: self.id,
            order_number,
            item_id: self.items.len() as u32,
            product_number,
            quantity,
        }));
        Ok(())
    }

    /// Remove the first item equal to `item`. Returns whether one was removed.
    /// The last remaining item cannot be removed.
    pub fn remove_item(&mut self, item: &OrderItem) -> Result<bool, OrderError> {
        self.ensure_modifiable("remove item from")?;

        let Some(position) = self.items.iter().position(|existing| existing == item) else {
            return Ok(false);
        };
        if self.items.len() == 1 {
            return Err(OrderError::InvalidAggregateState(
                "Order must keep at least one item".to_string(),
            ));
        }
        self.items.remove(position);
        Ok(true)
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Copy for storage: same state, empty event buffer.
    pub(crate) fn persisted_copy(&self) -> Order {
        Order {
            domain_events: Vec::new(),
            ..self.clone()
        }
    }

    fn ensure_modifiable(&self, action: &'static str) -> Result<(), OrderError> {
        if self.status != OrderStatus::Pending {
            return Err(OrderError::InvalidStateTransition {
                from: self.status,
                action,
            });
        }
        Ok(())
    }

    fn require_number(&self) -> Result<OrderNumber, OrderError> {
        self.order_number.clone().ok_or_else(|| {
            OrderError::InvalidAggregateState("Order has no order number yet".to_string())
        })
    }
}

fn missing(field: &str) -> OrderError {
    OrderError::InvalidAggregateState(format!("Order {field} is required"))
}

// ============================================================================
// Unit Tests
// ============================================================================
