use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::{OrderId, OrderNumber, ProductNumber, Quantity, ShippingAddress};

// ============================================================================
// Order Events - Domain Events raised by the Order aggregate
// ============================================================================

/// Order Event - Union type for all order events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Created(OrderCreated),
    ItemAdded(OrderItemAdded),
    Confirmed(OrderConfirmed),
}

impl OrderEvent {
    /// Event name as seen by in-process subscribers and in logs.
    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Created(_) => "OrderCreated",
            OrderEvent::ItemAdded(_) => "OrderItemAdded",
            OrderEvent::Confirmed(_) => "OrderConfirmed",
        }
    }

    pub fn event_id(&self) -> Uuid {
        match self {
            OrderEvent::Created(e) => e.event_id,
            OrderEvent::ItemAdded(e) => e.event_id,
            OrderEvent::Confirmed(e) => e.event_id,
        }
    }

    pub fn order_number(&self) -> &OrderNumber {
        match self {
            OrderEvent::Created(e) => &e.order_number,
            OrderEvent::ItemAdded(e) => &e.order_number,
            OrderEvent::Confirmed(e) => &e.order_number,
        }
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Order Created - Initial event in order lifecycle
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub order_id: Option<OrderId>,
    pub order_number: OrderNumber,
    pub shipping_address: ShippingAddress,
}

/// Order Item Added - a line item joined the order
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemAdded {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub order_id: Option<OrderId>,
    pub order_number: OrderNumber,
    pub item_id: u32,
    pub product_number: ProductNumber,
    pub quantity: Quantity,
}

/// Order Confirmed - Order accepted for fulfillment
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfirmed {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub order_id: Option<OrderId>,
    pub order_number: OrderNumber,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed() -> OrderEvent {
        OrderEvent::Confirmed(OrderConfirmed {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            order_id: Some(OrderId(42)),
            order_number: OrderNumber::new("ORD-42").unwrap(),
        })
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(confirmed().event_type(), "OrderConfirmed");
    }

    #[test]
    fn test_tagged_union_serialization() {
        let event = confirmed();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Confirmed\""));

        let back: OrderEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
