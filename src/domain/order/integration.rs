use chrono::{DateTime, Utc};
use serde::Serialize;

use super::events::OrderEvent;
use super::value_objects::{OrderNumber, ProductNumber, Quantity, ShippingAddress};

// ============================================================================
// Integration Events - the external contract written to the outbox
// ============================================================================
//
// Domain events are internal and may change with the aggregate. What leaves
// the service is an integration event: a small, stable payload keyed by
// order number, with no internal ids. `integration_event_for` is the single
// place that decides which domain events are published and in what shape.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IntegrationEvent {
    OrderCreated(OrderCreatedIntegrationEvent),
    OrderItemAdded(OrderItemAddedIntegrationEvent),
    OrderConfirmed(OrderConfirmedIntegrationEvent),
}

impl IntegrationEvent {
    /// Value of the outbox `event_type` column and of the payload's
    /// `eventType` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            IntegrationEvent::OrderCreated(_) => "OrderCreated",
            IntegrationEvent::OrderItemAdded(_) => "OrderItemAdded",
            IntegrationEvent::OrderConfirmed(_) => "OrderConfirmed",
        }
    }

    pub fn order_number(&self) -> &OrderNumber {
        match self {
            IntegrationEvent::OrderCreated(e) => &e.order_number,
            IntegrationEvent::OrderItemAdded(e) => &e.order_number,
            IntegrationEvent::OrderConfirmed(e) => &e.order_number,
        }
    }

    pub fn payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedIntegrationEvent {
    pub order_number: OrderNumber,
    pub event_type: &'static str,
    pub shipping_address: ShippingAddress,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemAddedIntegrationEvent {
    pub order_number: OrderNumber,
    pub event_type: &'static str,
    pub item_id: u32,
    pub product_number: ProductNumber,
    pub quantity: Quantity,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfirmedIntegrationEvent {
    pub order_number: OrderNumber,
    pub event_type: &'static str,
    pub confirmed_at: DateTime<Utc>,
}

/// The integration event a domain event is published as, or `None` if it
/// stays internal.
pub fn integration_event_for(event: &OrderEvent) -> Option<IntegrationEvent> {
    let published = match event {
        OrderEvent::Created(e) => IntegrationEvent::OrderCreated(OrderCreatedIntegrationEvent {
            order_number: e.order_number.clone(),
            event_type: "OrderCreated",
            shipping_address: e.shipping_address.clone(),
            created_at: e.occurred_at,
        }),
        OrderEvent::ItemAdded(e) => {
            IntegrationEvent::OrderItemAdded(OrderItemAddedIntegrationEvent {
                order_number: e.order_number.clone(),
                event_type: "OrderItemAdded",
                item_id: e.item_id,
                product_number: e.product_number.clone(),
                quantity: e.quantity,
                added_at: e.occurred_at,
            })
        }
        OrderEvent::Confirmed(e) => {
            IntegrationEvent::OrderConfirmed(OrderConfirmedIntegrationEvent {
                order_number: e.order_number.clone(),
                event_type: "OrderConfirmed",
                confirmed_at: e.occurred_at,
            })
        }
    };
    Some(published)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderConfirmed, OrderId};
    use uuid::Uuid;

    fn confirmed() -> OrderConfirmed {
        OrderConfirmed {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            order_id: Some(OrderId(42)),
            order_number: OrderNumber::new("ORD-42").unwrap(),
        }
    }

    #[test]
    fn test_confirmed_payload_is_stable_contract() {
        let event = confirmed();
        let published = integration_event_for(&OrderEvent::Confirmed(event.clone())).unwrap();
        assert_eq!(published.event_type(), "OrderConfirmed");

        let value: serde_json::Value = serde_json::from_str(&published.payload().unwrap()).unwrap();

        assert_eq!(value["orderNumber"], "ORD-42");
        assert_eq!(value["eventType"], "OrderConfirmed");
        assert_eq!(
            value["confirmedAt"],
            serde_json::to_value(event.occurred_at).unwrap()
        );
        // internal ids never leave the service
        let mut fields: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        fields.sort_unstable();
        assert_eq!(fields, vec!["confirmedAt", "eventType", "orderNumber"]);
    }

    #[test]
    fn test_event_type_matches_payload_field() {
        let published = integration_event_for(&OrderEvent::Confirmed(confirmed())).unwrap();
        let value: serde_json::Value = serde_json::from_str(&published.payload().unwrap()).unwrap();

        assert_eq!(value["eventType"], published.event_type());
        assert_eq!(published.order_number().as_str(), "ORD-42");
    }
}
