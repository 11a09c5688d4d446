use super::aggregate::OrderDraft;
use super::errors::OrderError;

// ============================================================================
// Order Validation Service
// ============================================================================
//
// Business rules that span the whole draft rather than a single field.
// Field-level well-formedness is already enforced by the value objects.
//
// ============================================================================

pub trait OrderValidationService: Send + Sync {
    /// Fails with [`OrderError::Validation`] if the draft breaks a rule.
    fn validate(&self, draft: &OrderDraft) -> Result<(), OrderError>;
}

#[derive(Debug, Clone)]
pub struct DefaultOrderValidator {
    pub max_items: usize,
}

impl Default for DefaultOrderValidator {
    fn default() -> Self {
        Self { max_items: 100 }
    }
}

impl OrderValidationService for DefaultOrderValidator {
    fn validate(&self, draft: &OrderDraft) -> Result<(), OrderError> {
        if draft.customer_id.is_none() {
            return Err(OrderError::Validation("customer is required".to_string()));
        }
        if draft.shipping_address.is_none() {
            return Err(OrderError::Validation(
                "shipping address is required".to_string(),
            ));
        }

        let items = draft.items.as_deref().unwrap_or_default();
        if items.is_empty() {
            return Err(OrderError::Validation(
                "order must contain at least one item".to_string(),
            ));
        }
        if items.len() > self.max_items {
            return Err(OrderError::Validation(format!(
                "order cannot contain more than {} items",
                self.max_items
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::value_objects::{
        CustomerId, OrderItem, ProductNumber, Quantity, ShippingAddress,
    };
    use rust_decimal::Decimal;

    fn item() -> OrderItem {
        OrderItem::new(
            ProductNumber::new("PROD-001").unwrap(),
            Quantity::new(1).unwrap(),
            Decimal::ONE,
        )
        .unwrap()
    }

    fn draft(items: Vec<OrderItem>) -> OrderDraft {
        OrderDraft::new(
            CustomerId::new("CUST-001").unwrap(),
            items,
            ShippingAddress {
                street: "1 Road".to_string(),
                city: "Town".to_string(),
                state: "ST".to_string(),
                postal_code: "00000".to_string(),
                country: "Nowhere".to_string(),
            },
        )
    }

    #[test]
    fn test_accepts_well_formed_draft() {
        assert!(DefaultOrderValidator::default().validate(&draft(vec![item()])).is_ok());
    }

    #[test]
    fn test_rejects_empty_items() {
        let err = DefaultOrderValidator::default()
            .validate(&draft(vec![]))
            .unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[test]
    fn test_rejects_missing_items_and_customer() {
        let validator = DefaultOrderValidator::default();

        let mut no_items = draft(vec![item()]);
        no_items.items = None;
        assert!(validator.validate(&no_items).is_err());

        let mut no_customer = draft(vec![item()]);
        no_customer.customer_id = None;
        assert!(validator.validate(&no_customer).is_err());
    }

    #[test]
    fn test_rejects_too_many_items() {
        let validator = DefaultOrderValidator { max_items: 2 };
        assert!(validator.validate(&draft(vec![item(), item(), item()])).is_err());
    }
}
