mod message;
mod processor;

pub use message::{aggregate_id_for, OutboxMessage, OutboxStatus, AGGREGATE_ID_NAMESPACE};
pub use processor::{BatchReport, OutboxProcessor, OutboxProcessorConfig, ProcessorError};
