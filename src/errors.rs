// src/errors.rs

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::services::provisioning::ProvisioningError;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Validation Error: {0}")]
  Validation(String),

  #[error("Authentication Failed: {0}")]
  Auth(String),

  #[error("Resource Not Found: {0}")]
  NotFound(String),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Database Error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("Stripe API Error: {0}")]
  Stripe(String),

  #[error("Provisioning Error: {0}")]
  Provisioning(#[from] ProvisioningError),

  #[error("Brevo Email Error: {0}")]
  Brevo(String),

  #[error("Internal Server Error: {0}")]
  Internal(String),
}

impl ResponseError for AppError {
  fn error_response(&self) -> HttpResponse {
    // Log the full error when it's turned into a response.
    tracing::error!(application_error = %self, "Responding with error");
    match self {
      AppError::Validation(m) => HttpResponse::BadRequest().json(json!({"error": m})),
      AppError::Auth(m) => HttpResponse::BadRequest().json(json!({"error": m})),
      AppError::NotFound(m) => HttpResponse::NotFound().json(json!({"error": m})),
      AppError::Config(m) => {
        HttpResponse::InternalServerError().json(json!({"error": "Configuration issue", "detail": m}))
      }
      AppError::Sqlx(_) => HttpResponse::InternalServerError().json(json!({"error": "Database operation failed"})),
      AppError::Stripe(m) => {
        HttpResponse::InternalServerError().json(json!({"error": "Payment provider error", "detail": m}))
      }
      AppError::Provisioning(_) | AppError::Brevo(_) | AppError::Internal(_) => {
        HttpResponse::InternalServerError().json(json!({"error": "Webhook handler failed"}))
      }
    }
  }
}

// Result type alias for the application.
pub type Result<T, E = AppError> = std::result::Result<T, E>;
