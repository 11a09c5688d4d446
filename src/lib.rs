//! Order management core with a transactional outbox.
//!
//! Order changes and the outbox messages describing them commit together;
//! an [`outbox::OutboxProcessor`] later relays pending messages to the
//! broker and records each outcome.

pub mod config;
pub mod domain;
pub mod messaging;
pub mod metrics;
pub mod notify;
pub mod outbox;
pub mod store;
pub mod utils;
