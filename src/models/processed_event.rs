// src/models/processed_event.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, Type as SqlxType};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, SqlxType)]
#[sqlx(type_name = "event_status_enum", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventProcessingStatus {
  Processing,
  Completed,
  Failed,
}

impl EventProcessingStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      EventProcessingStatus::Processing => "processing",
      EventProcessingStatus::Completed => "completed",
      EventProcessingStatus::Failed => "failed",
    }
  }
}

/// Idempotency record for an inbound webhook delivery. At most one row
/// per upstream event id; the unique constraint on `event_id` is the
/// system's only mandatory mutual-exclusion point.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProcessedEvent {
  pub id: Uuid,
  pub event_id: String,
  pub event_type: String,
  pub status: EventProcessingStatus,
  pub payload: Option<JsonValue>,
  pub error_message: Option<String>,
  pub processed_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
}
