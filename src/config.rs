// src/config.rs

use crate::errors::{AppError, Result};
use dotenvy::dotenv;
use std::env;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  pub database_url: String,
  pub frontend_url: String,

  pub stripe_webhook_secret: Option<String>,

  pub provisioning_api_url: String,
  pub provisioning_api_key: String,

  pub brevo_api_url: String,
  pub brevo_api_key: String,
  pub email_sender: String,

  /// Sentinel account that owns `user_orders` rows for guest checkouts.
  pub guest_user_id: Uuid,
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok();

    let get_env = |var_name: &str| {
      env::var(var_name).map_err(|e| AppError::Config(format!("Missing environment variable '{}': {}", var_name, e)))
    };

    let server_host = get_env("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let server_port = get_env("SERVER_PORT")
      .unwrap_or_else(|_| "8080".to_string())
      .parse::<u16>()
      .map_err(|e| AppError::Config(format!("Invalid SERVER_PORT: {}", e)))?;
    let database_url = get_env("DATABASE_URL")?;
    let frontend_url = get_env("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    // The webhook secret is checked again per request so a deployment
    // without it rejects deliveries instead of refusing to boot.
    let stripe_webhook_secret = env::var("STRIPE_WEBHOOK_SECRET").ok();

    let provisioning_api_url = get_env("ROAMIFY_API_URL").unwrap_or_else(|_| "https://api.getroamify.com".to_string());
    let provisioning_api_key = get_env("ROAMIFY_API_KEY")?;

    let brevo_api_url = get_env("BREVO_API_URL").unwrap_or_else(|_| "https://api.brevo.com".to_string());
    let brevo_api_key = get_env("BREVO_API_KEY")?;
    let email_sender = get_env("EMAIL_SENDER").unwrap_or_else(|_| "noreply@example.com".to_string());

    let guest_user_id = get_env("GUEST_USER_ID")
      .ok()
      .map(|raw| Uuid::parse_str(&raw).map_err(|e| AppError::Config(format!("Invalid GUEST_USER_ID: {}", e))))
      .transpose()?
      .unwrap_or(Uuid::nil());

    tracing::info!("Application configuration loaded successfully.");

    Ok(Self {
      server_host,
      server_port,
      database_url,
      frontend_url,
      stripe_webhook_secret,
      provisioning_api_url,
      provisioning_api_key,
      brevo_api_url,
      brevo_api_key,
      email_sender,
      guest_user_id,
    })
  }
}
