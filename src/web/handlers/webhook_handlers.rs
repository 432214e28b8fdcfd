// src/web/handlers/webhook_handlers.rs

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::errors::AppError;
use crate::fulfillment::{StripeEvent, WebhookOutcome};
use crate::services::signature::verify_signature;
use crate::state::AppState;

/// Stripe webhook endpoint. The body is taken raw because the signature
/// covers the exact bytes on the wire; deserializing first would break
/// verification.
#[instrument(
  name = "handler::stripe_webhook",
  skip(app_state, req, body),
  fields(payload_bytes = body.len())
)]
pub async fn stripe_webhook_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  body: web::Bytes,
) -> Result<HttpResponse, AppError> {
  let Some(secret) = app_state.config.stripe_webhook_secret.as_deref() else {
    error!("STRIPE_WEBHOOK_SECRET is not configured; rejecting delivery");
    return Err(AppError::Config("Webhook secret not configured".to_string()));
  };

  let signature_header = req
    .headers()
    .get("stripe-signature")
    .and_then(|h| h.to_str().ok())
    .ok_or_else(|| AppError::Auth("Missing stripe-signature header".to_string()))?;

  verify_signature(&body, signature_header, secret)?;

  let event = StripeEvent::parse(&body)?;
  info!(event_id = %event.id, event_type = %event.event_type, "Webhook signature verified");

  match app_state.orchestrator.process_event(event).await? {
    WebhookOutcome::Processed => Ok(HttpResponse::Ok().json(json!({ "received": true }))),
    WebhookOutcome::Duplicate { previous_status } => {
      // Acknowledge so the sender stops retrying an already-settled event.
      Ok(HttpResponse::Ok().json(json!({
        "received": true,
        "message": "Event already processed",
        "status": previous_status,
      })))
    }
    WebhookOutcome::InFlight => {
      warn!("Concurrent delivery of an in-flight event acknowledged without processing");
      Ok(HttpResponse::Ok().json(json!({
        "received": true,
        "message": "Event being processed by another instance",
      })))
    }
  }
}
