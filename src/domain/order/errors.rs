use super::value_objects::{OrderNumber, OrderStatus};
use crate::store::StoreError;

// ============================================================================
// Order Errors
// ============================================================================
//
// Client errors: Validation, NotFound, InvalidStateTransition,
//                InvalidAggregateState, InvalidArgument
// Unit-of-work errors: Persistence, Serialization (transaction rolled back)
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order validation failed: {0}")]
    Validation(String),

    #[error("Order not found with number: {0}")]
    NotFound(OrderNumber),

    #[error("Cannot {action} order in status {from}")]
    InvalidStateTransition {
        from: OrderStatus,
        action: &'static str,
    },

    #[error("Invalid order state: {0}")]
    InvalidAggregateState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("Failed to serialize event payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrderError {
    /// True for errors caused by the caller's input or the aggregate's
    /// current state, as opposed to infrastructure failures.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            OrderError::Validation(_)
                | OrderError::NotFound(_)
                | OrderError::InvalidStateTransition { .. }
                | OrderError::InvalidAggregateState(_)
                | OrderError::InvalidArgument(_)
        )
    }
}
