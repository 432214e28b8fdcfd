// src/services/email.rs

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info};

use crate::errors::{AppError, Result};

#[derive(Debug, Clone)]
pub struct EmailMessage {
  pub to: String,
  pub subject: String,
  pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
  async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Transactional email via the Brevo SMTP API.
pub struct BrevoMailer {
  http: reqwest::Client,
  base_url: String,
  api_key: String,
  sender: String,
}

impl BrevoMailer {
  pub fn new(base_url: String, api_key: String, sender: String) -> Self {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(15))
      .build()
      .unwrap_or_default();
    Self {
      http,
      base_url,
      api_key,
      sender,
    }
  }
}

#[async_trait]
impl Mailer for BrevoMailer {
  async fn send(&self, message: &EmailMessage) -> Result<()> {
    let url = format!("{}/v3/smtp/email", self.base_url);
    let body = json!({
      "sender": { "email": self.sender },
      "to": [{ "email": message.to }],
      "subject": message.subject,
      "htmlContent": message.html,
    });

    let response = self
      .http
      .post(&url)
      .header("api-key", &self.api_key)
      .json(&body)
      .send()
      .await
      .map_err(|e| AppError::Brevo(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      let detail = response.text().await.unwrap_or_default();
      error!(status = status.as_u16(), detail = %detail, to = %message.to, "Brevo rejected email");
      return Err(AppError::Brevo(format!("status {}: {}", status, detail)));
    }

    info!(to = %message.to, subject = %message.subject, "Email sent");
    Ok(())
  }
}
