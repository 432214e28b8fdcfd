// src/metrics.rs

//! Context-scoped metrics sink. Injected through `AppState` so components
//! never share a process-wide mutable counter.

use std::sync::Arc;

pub trait MetricsSink: Send + Sync {
  fn incr_api_call(&self, operation: &str);
  fn incr_api_error(&self, operation: &str);
  fn incr_event(&self, event_type: &str, outcome: &str);
}

pub type SharedMetrics = Arc<dyn MetricsSink>;

/// Default sink: structured tracing events, scraped downstream.
#[derive(Debug, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
  fn incr_api_call(&self, operation: &str) {
    tracing::debug!(target: "metrics", counter = "api_call", %operation);
  }

  fn incr_api_error(&self, operation: &str) {
    tracing::warn!(target: "metrics", counter = "api_error", %operation);
  }

  fn incr_event(&self, event_type: &str, outcome: &str) {
    tracing::info!(target: "metrics", counter = "webhook_event", %event_type, %outcome);
  }
}
