// src/db/events.rs

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use tracing::{error, info};

use crate::errors::Result;
use crate::models::{EventProcessingStatus, ProcessedEvent};

/// Outcome of claiming an event id for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginProcessing {
  Started,
  /// The unique constraint fired: another delivery of the same event is
  /// already in flight. The caller must exit without side effects.
  Conflict,
}

#[async_trait]
pub trait EventLedger: Send + Sync {
  async fn check_processed(&self, event_id: &str) -> Result<Option<ProcessedEvent>>;
  async fn begin_processing(&self, event_id: &str, event_type: &str, payload: &JsonValue) -> Result<BeginProcessing>;

  /// Always invoked after the handler runs, on both arms, so the ledger
  /// ends in a terminal auditable state.
  async fn finish_processing(
    &self,
    event_id: &str,
    status: EventProcessingStatus,
    error_message: Option<&str>,
  ) -> Result<()>;
}

pub struct PgEventLedger {
  pool: PgPool,
}

impl PgEventLedger {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl EventLedger for PgEventLedger {
  async fn check_processed(&self, event_id: &str) -> Result<Option<ProcessedEvent>> {
    // An in-flight `processing` row is not a duplicate; the unique
    // constraint in begin_processing decides that race.
    let record: Option<ProcessedEvent> = sqlx::query_as(
      "SELECT id, event_id, event_type, status, payload, error_message, processed_at, completed_at \
       FROM processed_events WHERE event_id = $1 AND status != 'processing'::event_status_enum",
    )
    .bind(event_id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(record)
  }

  async fn begin_processing(&self, event_id: &str, event_type: &str, payload: &JsonValue) -> Result<BeginProcessing> {
    let inserted = sqlx::query(
      "INSERT INTO processed_events (event_id, event_type, status, payload) \
       VALUES ($1, $2, 'processing'::event_status_enum, $3)",
    )
    .bind(event_id)
    .bind(event_type)
    .bind(payload)
    .execute(&self.pool)
    .await;

    match inserted {
      Ok(_) => Ok(BeginProcessing::Started),
      Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
        info!(%event_id, "Concurrent delivery detected; event already claimed");
        Ok(BeginProcessing::Conflict)
      }
      Err(e) => {
        error!(%event_id, error = %e, "Failed to insert processed_events record");
        Err(e.into())
      }
    }
  }

  async fn finish_processing(
    &self,
    event_id: &str,
    status: EventProcessingStatus,
    error_message: Option<&str>,
  ) -> Result<()> {
    sqlx::query(
      "UPDATE processed_events SET status = $1, error_message = $2, completed_at = now() WHERE event_id = $3",
    )
    .bind(status)
    .bind(error_message)
    .bind(event_id)
    .execute(&self.pool)
    .await?;
    Ok(())
  }
}
