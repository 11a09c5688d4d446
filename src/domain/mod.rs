// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Each aggregate has its own subdirectory with its value objects, events,
// errors, aggregate implementation and application service.
//
// ============================================================================

pub mod order;
