// src/services/provisioning.rs

//! Client for the eSIM provisioning provider. Raw endpoint calls live
//! behind [`ProvisioningApi`]; [`ProvisioningClient`] layers bounded
//! retry and fallback-package substitution on top.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::metrics::SharedMetrics;

#[derive(Debug, Error)]
pub enum ProvisioningError {
  #[error("Provider API error (status {status}): {body}")]
  Api { status: u16, body: String },

  #[error("Provider transport error: {0}")]
  Transport(String),

  #[error("Provider response had an unrecognized shape: {0}")]
  UnexpectedShape(String),

  #[error("No eSIM ID received from provider")]
  MissingEsimId,

  #[error("QR code not ready within {budget_secs}s polling budget")]
  QrTimeout { budget_secs: u64 },

  #[error("{operation} failed after {attempts} attempts: {last_error}")]
  AllAttemptsFailed {
    operation: String,
    attempts: u32,
    last_error: String,
  },
}

impl ProvisioningError {
  /// Network failures and provider 5xx responses are transient; 4xx
  /// means the request itself is wrong and retrying cannot help.
  pub fn is_transient(&self) -> bool {
    match self {
      ProvisioningError::Transport(_) => true,
      ProvisioningError::Api { status, .. } => *status >= 500,
      _ => false,
    }
  }

  pub fn is_server_error(&self) -> bool {
    matches!(self, ProvisioningError::Api { status, .. } if *status >= 500)
  }
}

impl From<reqwest::Error> for ProvisioningError {
  fn from(err: reqwest::Error) -> Self {
    ProvisioningError::Transport(err.to_string())
  }
}

/// Installable profile payload. All fields may arrive empty while the
/// provider is still generating the profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EsimProfile {
  pub qr_code_url: Option<String>,
  pub lpa_code: Option<String>,
  pub activation_code: Option<String>,
  pub ios_quick_install: Option<String>,
}

impl EsimProfile {
  /// "Ready" means at least one installable field is non-empty. A
  /// response with all of them empty is "not ready yet", not success.
  pub fn is_complete(&self) -> bool {
    let non_empty = |field: &Option<String>| field.as_deref().is_some_and(|s| !s.is_empty());
    non_empty(&self.qr_code_url) || non_empty(&self.lpa_code) || non_empty(&self.activation_code)
  }
}

/// Raw result of the provider's order-create endpoint.
#[derive(Debug, Clone)]
pub struct CreatedOrder {
  pub provider_order_id: String,
  pub esim_id: String,
}

/// Order-create outcome after retry/fallback handling. When the original
/// slug kept failing with 5xx and a substitute succeeded, `fallback_used`
/// is set and both slugs are populated so the caller can record the swap.
#[derive(Debug, Clone)]
pub struct EsimOrder {
  pub provider_order_id: String,
  pub esim_id: String,
  pub fallback_used: bool,
  pub original_slug: String,
  pub fallback_slug: Option<String>,
}

/// Raw provider endpoints, one method per REST call. No retry here.
#[async_trait]
pub trait ProvisioningApi: Send + Sync {
  async fn create_order(&self, slug: &str, quantity: u32) -> Result<CreatedOrder, ProvisioningError>;
  async fn apply_profile(&self, esim_id: &str) -> Result<EsimProfile, ProvisioningError>;
  async fn get_profile_status(&self, esim_id: &str) -> Result<EsimProfile, ProvisioningError>;
  async fn get_iccid(&self, esim_id: &str) -> Result<Option<String>, ProvisioningError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay: Duration::from_secs(2),
    }
  }
}

pub struct ProvisioningClient {
  api: Arc<dyn ProvisioningApi>,
  retry: RetryPolicy,
  metrics: SharedMetrics,
}

impl ProvisioningClient {
  pub fn new(api: Arc<dyn ProvisioningApi>, retry: RetryPolicy, metrics: SharedMetrics) -> Self {
    Self { api, retry, metrics }
  }

  pub fn api(&self) -> &Arc<dyn ProvisioningApi> {
    &self.api
  }

  /// Creates a provider order with bounded retry (linear backoff,
  /// transient errors only). When the retry budget is spent on a 5xx,
  /// a geography-matched fallback slug gets one final attempt.
  pub async fn create_order(&self, slug: &str, quantity: u32) -> Result<EsimOrder, ProvisioningError> {
    match self.create_order_with_retry(slug, quantity).await {
      Ok(created) => Ok(EsimOrder {
        provider_order_id: created.provider_order_id,
        esim_id: created.esim_id,
        fallback_used: false,
        original_slug: slug.to_string(),
        fallback_slug: None,
      }),
      Err(err) if err.is_server_error() => {
        let fallback = fallback_slug_for(slug);
        warn!(
          original_slug = %slug,
          fallback_slug = %fallback,
          error = %err,
          "Order creation kept failing with 5xx; trying fallback package"
        );
        self.metrics.incr_api_error("create_order");
        let created = self.call_create_order(&fallback, quantity).await?;
        Ok(EsimOrder {
          provider_order_id: created.provider_order_id,
          esim_id: created.esim_id,
          fallback_used: true,
          original_slug: slug.to_string(),
          fallback_slug: Some(fallback),
        })
      }
      Err(err) => Err(err),
    }
  }

  async fn create_order_with_retry(&self, slug: &str, quantity: u32) -> Result<CreatedOrder, ProvisioningError> {
    let mut last_error: Option<ProvisioningError> = None;
    for attempt in 1..=self.retry.max_attempts {
      match self.call_create_order(slug, quantity).await {
        Ok(created) => return Ok(created),
        Err(err) => {
          if !err.is_transient() {
            error!(slug = %slug, attempt, error = %err, "Order creation failed with client error; not retrying");
            return Err(err);
          }
          warn!(
            slug = %slug,
            attempt,
            max_attempts = self.retry.max_attempts,
            error = %err,
            "Order creation attempt failed"
          );
          let is_server_error = err.is_server_error();
          last_error = Some(err);
          if attempt < self.retry.max_attempts {
            tokio::time::sleep(self.retry.base_delay * attempt).await;
          } else if is_server_error {
            // Surface the 5xx itself so the caller routes to fallback.
            return Err(last_error.take().unwrap_or(ProvisioningError::MissingEsimId));
          }
        }
      }
    }
    Err(ProvisioningError::AllAttemptsFailed {
      operation: format!("eSIM order creation for package {}", slug),
      attempts: self.retry.max_attempts,
      last_error: last_error.map(|e| e.to_string()).unwrap_or_else(|| "unknown".to_string()),
    })
  }

  async fn call_create_order(&self, slug: &str, quantity: u32) -> Result<CreatedOrder, ProvisioningError> {
    self.metrics.incr_api_call("create_order");
    self.api.create_order(slug, quantity).await.inspect_err(|_| {
      self.metrics.incr_api_error("create_order");
    })
  }

  /// Queried only after a profile is confirmed ready. Values without the
  /// carrier prefix are treated as absent.
  pub async fn get_iccid(&self, esim_id: &str) -> Result<Option<String>, ProvisioningError> {
    self.metrics.incr_api_call("get_iccid");
    let iccid = self.api.get_iccid(esim_id).await.inspect_err(|_| {
      self.metrics.incr_api_error("get_iccid");
    })?;
    Ok(iccid.filter(|value| value.starts_with("89")))
  }
}

/// Rough geography match on the failing slug, defaulting to the global
/// region. Substituting a known-good package keeps one misconfigured slug
/// from blocking fulfillment; the swap is always surfaced to the caller.
pub fn fallback_slug_for(slug: &str) -> String {
  let lowered = slug.to_lowercase();
  let region = [
    ("europe", "esim-europe-30days-10gb"),
    ("asia", "esim-asia-30days-10gb"),
    ("africa", "esim-africa-30days-3gb"),
    ("america", "esim-latam-30days-5gb"),
    ("usa", "esim-usa-30days-10gb"),
    ("united-states", "esim-usa-30days-10gb"),
  ]
  .iter()
  .find(|(needle, _)| lowered.contains(needle))
  .map(|(_, fallback)| *fallback);
  region.unwrap_or("esim-global-30days-10gb").to_string()
}

// --- HTTP implementation ---

pub struct HttpProvisioningApi {
  http: reqwest::Client,
  base_url: String,
  api_key: String,
}

impl HttpProvisioningApi {
  pub fn new(base_url: String, api_key: String) -> Self {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .unwrap_or_default();
    Self { http, base_url, api_key }
  }

  async fn read_json(&self, response: reqwest::Response) -> Result<JsonValue, ProvisioningError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
      error!(status = status.as_u16(), body = %body, "Provider API returned an error response");
      return Err(ProvisioningError::Api {
        status: status.as_u16(),
        body,
      });
    }
    serde_json::from_str(&body).map_err(|e| ProvisioningError::UnexpectedShape(format!("invalid JSON: {}", e)))
  }
}

/// The provider nests payloads inconsistently across endpoints:
/// `{"data": {"data": {...}}}`, `{"data": {...}}`, or a flat object.
/// Peel here, once, instead of optional-chaining in business logic.
fn peel_envelope(value: &JsonValue) -> Result<&JsonValue, ProvisioningError> {
  match value.get("data") {
    Some(inner) if inner.is_object() => match inner.get("data") {
      Some(innermost) if innermost.is_object() => Ok(innermost),
      _ => Ok(inner),
    },
    None if value.is_object() => Ok(value),
    _ => Err(ProvisioningError::UnexpectedShape(format!(
      "expected an object payload, got: {}",
      value
    ))),
  }
}

fn profile_from_payload(payload: &JsonValue) -> EsimProfile {
  // Some endpoints wrap the profile in an `esim` object, some don't.
  let esim = payload.get("esim").unwrap_or(payload);
  let field = |key: &str| {
    esim
      .get(key)
      .and_then(JsonValue::as_str)
      .filter(|s| !s.is_empty())
      .map(String::from)
  };
  EsimProfile {
    qr_code_url: field("qrCodeUrl"),
    lpa_code: field("lpaCode"),
    activation_code: field("activationCode"),
    ios_quick_install: field("iosQuickInstall"),
  }
}

#[async_trait]
impl ProvisioningApi for HttpProvisioningApi {
  async fn create_order(&self, slug: &str, quantity: u32) -> Result<CreatedOrder, ProvisioningError> {
    let payload = json!({
      "items": [{ "packageId": slug, "quantity": quantity }]
    });

    // Some deployments of the provider expose the plural route, some the
    // singular one; a 404 on the first means try the second.
    let endpoints = [
      format!("{}/api/esim/orders", self.base_url),
      format!("{}/api/esim/order", self.base_url),
    ];

    let mut last_error = ProvisioningError::MissingEsimId;
    for url in &endpoints {
      info!(%url, %slug, quantity, "Creating eSIM order with provider");
      let response = self
        .http
        .post(url)
        .bearer_auth(&self.api_key)
        .json(&payload)
        .send()
        .await;

      let body = match response {
        Ok(resp) => match self.read_json(resp).await {
          Ok(body) => body,
          Err(ProvisioningError::Api { status: 404, body }) => {
            info!(%url, "Order endpoint returned 404, trying next endpoint");
            last_error = ProvisioningError::Api { status: 404, body };
            continue;
          }
          Err(e) => return Err(e),
        },
        Err(e) => return Err(e.into()),
      };

      let result = peel_envelope(&body)?;
      let pick = |keys: &[&str]| {
        keys
          .iter()
          .find_map(|k| result.get(*k).and_then(JsonValue::as_str))
          .map(String::from)
      };
      let esim_id = pick(&["esimId", "iccid", "esim_code", "code", "id"]).ok_or(ProvisioningError::MissingEsimId)?;
      let provider_order_id = pick(&["orderId", "id", "order_id"]).unwrap_or_else(|| esim_id.clone());
      info!(%provider_order_id, %esim_id, "eSIM order created successfully");
      return Ok(CreatedOrder {
        provider_order_id,
        esim_id,
      });
    }
    Err(last_error)
  }

  async fn apply_profile(&self, esim_id: &str) -> Result<EsimProfile, ProvisioningError> {
    let url = format!("{}/api/esim/apply", self.base_url);
    info!(%esim_id, "Requesting profile generation");
    let response = self
      .http
      .post(&url)
      .bearer_auth(&self.api_key)
      .json(&json!({ "esimId": esim_id }))
      .send()
      .await?;
    let body = self.read_json(response).await?;
    Ok(profile_from_payload(peel_envelope(&body)?))
  }

  async fn get_profile_status(&self, esim_id: &str) -> Result<EsimProfile, ProvisioningError> {
    let url = format!("{}/api/esim", self.base_url);
    let response = self
      .http
      .get(&url)
      .bearer_auth(&self.api_key)
      .query(&[("esimId", esim_id)])
      .send()
      .await?;
    let body = self.read_json(response).await?;
    Ok(profile_from_payload(peel_envelope(&body)?))
  }

  async fn get_iccid(&self, esim_id: &str) -> Result<Option<String>, ProvisioningError> {
    let url = format!("{}/api/esim", self.base_url);
    let response = self
      .http
      .get(&url)
      .bearer_auth(&self.api_key)
      .query(&[("iccid", esim_id)])
      .send()
      .await?;
    let body = self.read_json(response).await?;
    let payload = peel_envelope(&body)?;
    let esim = payload.get("esim").unwrap_or(payload);
    Ok(
      esim
        .get("iccid")
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn profile_with_all_fields_empty_is_not_complete() {
    let profile = EsimProfile::default();
    assert!(!profile.is_complete());
    let profile = EsimProfile {
      qr_code_url: Some(String::new()),
      ..Default::default()
    };
    assert!(!profile.is_complete());
  }

  #[test]
  fn profile_with_any_field_is_complete() {
    let profile = EsimProfile {
      lpa_code: Some("LPA:1$rsp.example$ABC".to_string()),
      ..Default::default()
    };
    assert!(profile.is_complete());
  }

  #[test]
  fn peel_handles_double_nesting() {
    let body = json!({"data": {"data": {"esimId": "esim-1"}}});
    let peeled = peel_envelope(&body).unwrap();
    assert_eq!(peeled["esimId"], "esim-1");
  }

  #[test]
  fn peel_handles_single_nesting_and_flat() {
    let body = json!({"data": {"esimId": "esim-2"}});
    assert_eq!(peel_envelope(&body).unwrap()["esimId"], "esim-2");
    let body = json!({"esimId": "esim-3"});
    assert_eq!(peel_envelope(&body).unwrap()["esimId"], "esim-3");
  }

  #[test]
  fn peel_rejects_non_object_payloads() {
    let body = json!({"data": "oops"});
    assert!(matches!(
      peel_envelope(&body),
      Err(ProvisioningError::UnexpectedShape(_))
    ));
  }

  #[test]
  fn fallback_slug_matches_geography() {
    assert_eq!(fallback_slug_for("esim-europe-7days-1gb"), "esim-europe-30days-10gb");
    assert_eq!(fallback_slug_for("esim-usa-5days-1gb"), "esim-usa-30days-10gb");
    assert_eq!(fallback_slug_for("esim-montenegro-7days-1gb"), "esim-global-30days-10gb");
  }

  #[test]
  fn client_errors_are_not_transient() {
    let err = ProvisioningError::Api {
      status: 422,
      body: "bad package".to_string(),
    };
    assert!(!err.is_transient());
    let err = ProvisioningError::Api {
      status: 503,
      body: "down".to_string(),
    };
    assert!(err.is_transient() && err.is_server_error());
  }
}
