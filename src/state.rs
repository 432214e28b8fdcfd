// src/state.rs

use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::{PgEventLedger, PgOrderStore, PgPackageStore, PgUserOrderStore};
use crate::fulfillment::FulfillmentOrchestrator;
use crate::metrics::{SharedMetrics, TracingMetrics};
use crate::services::email::BrevoMailer;
use crate::services::notifications::NotificationDispatcher;
use crate::services::polling::QrPollingEngine;
use crate::services::provisioning::{HttpProvisioningApi, ProvisioningClient, RetryPolicy};

/// Shared per-worker state. Everything behind `Arc` so the Actix factory
/// closure can clone it cheaply.
#[derive(Clone)]
pub struct AppState {
  pub db_pool: PgPool,
  pub orchestrator: Arc<FulfillmentOrchestrator>,
  pub config: Arc<AppConfig>,
}

impl AppState {
  /// Wires the Postgres stores, the provisioning client and the mailer
  /// into one orchestrator. Used by `main`; tests assemble the
  /// orchestrator from in-memory pieces instead.
  pub fn new(db_pool: PgPool, config: Arc<AppConfig>) -> Self {
    let metrics: SharedMetrics = Arc::new(TracingMetrics);

    let provisioning_api = Arc::new(HttpProvisioningApi::new(
      config.provisioning_api_url.clone(),
      config.provisioning_api_key.clone(),
    ));
    let provisioning = Arc::new(ProvisioningClient::new(
      provisioning_api,
      RetryPolicy::default(),
      metrics.clone(),
    ));

    let mailer = Arc::new(BrevoMailer::new(
      config.brevo_api_url.clone(),
      config.brevo_api_key.clone(),
      config.email_sender.clone(),
    ));
    let notifications = Arc::new(NotificationDispatcher::new(mailer, config.frontend_url.clone()));

    let orchestrator = Arc::new(FulfillmentOrchestrator::new(
      Arc::new(PgOrderStore::new(db_pool.clone())),
      Arc::new(PgPackageStore::new(db_pool.clone())),
      Arc::new(PgUserOrderStore::new(db_pool.clone())),
      Arc::new(PgEventLedger::new(db_pool.clone())),
      provisioning,
      QrPollingEngine::default(),
      notifications,
      metrics,
      config.guest_user_id,
    ));

    Self {
      db_pool,
      orchestrator,
      config,
    }
  }
}
