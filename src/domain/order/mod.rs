// ============================================================================
// Order Domain - Business Logic for Order Aggregate
// ============================================================================
//
// - Value objects (OrderNumber, OrderItem, OrderStatus, ...)
// - Events (OrderCreated, OrderItemAdded, OrderConfirmed)
// - Integration events (the published form of those events)
// - Errors (OrderError)
// - Aggregate (Order) and its creation draft
// - Collaborators (validation, order-number generation)
// - Service (OrderService, the transactional orchestrator)
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod integration;
pub mod errors;
pub mod aggregate;
pub mod validation;
pub mod number;
pub mod service;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use integration::*;
pub use errors::*;
pub use aggregate::*;
pub use validation::*;
pub use number::*;
pub use service::*;
