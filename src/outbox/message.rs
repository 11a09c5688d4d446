use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Outbox Message - durable delivery intent
// ============================================================================
//
// Lifecycle: PENDING -> PROCESSED | FAILED. Terminal states are final; the
// processor never re-queues a message on its own.
//
// ============================================================================

/// Fixed namespace for aggregate-id derivation. Changing it changes every
/// derived id, so it is part of the persisted contract.
pub const AGGREGATE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_8b0d_4c1f_9a57_3e2d_1b0c_8f64);

/// Stable outbox `aggregate_id` for a business key (UUIDv5).
///
/// The same key always maps to the same id, which makes outbox rows
/// addressable per aggregate. It does not serialize concurrent writers.
pub fn aggregate_id_for(business_key: &str) -> Uuid {
    Uuid::new_v5(&AGGREGATE_ID_NAMESPACE, business_key.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processed => "PROCESSED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(OutboxStatus::Pending),
            "PROCESSED" => Some(OutboxStatus::Processed),
            "FAILED" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OutboxStatus::Pending)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: String,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    /// New PENDING message with a fresh time-ordered id.
    pub fn create_pending(
        aggregate_type: impl Into<String>,
        aggregate_id: Uuid,
        event_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            event_type: event_type.into(),
            payload: payload.into(),
            status: OutboxStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Move to a terminal state, stamping `processed_at`.
    ///
    /// Returns `false` and leaves the message untouched if it is already
    /// terminal.
    pub fn complete(&mut self, outcome: OutboxStatus, at: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || !outcome.is_terminal() {
            return false;
        }
        self.status = outcome;
        self.processed_at = Some(at);
        true
    }
}
