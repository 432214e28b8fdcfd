// src/services/signature.rs

//! Payment-processor webhook signature verification. The signature
//! header carries `t=<unix>,v1=<hex hmac-sha256 of "{t}.{body}">`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::errors::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Replay window for the timestamp embedded in the signature header.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &str) -> Result<()> {
  let now = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map_err(|e| AppError::Internal(format!("System time error: {}", e)))?
    .as_secs() as i64;
  verify_signature_at(payload, signature_header, secret, now)
}

pub fn verify_signature_at(payload: &[u8], signature_header: &str, secret: &str, now: i64) -> Result<()> {
  let mut timestamp: Option<i64> = None;
  let mut v1_signature: Option<&str> = None;

  for part in signature_header.split(',') {
    match part.split_once('=') {
      Some(("t", value)) => timestamp = value.parse().ok(),
      Some(("v1", value)) => v1_signature = Some(value),
      _ => {}
    }
  }

  let timestamp = timestamp.ok_or_else(|| {
    warn!("Webhook signature header missing timestamp");
    AppError::Auth("Invalid signature".to_string())
  })?;
  let v1_signature = v1_signature.ok_or_else(|| {
    warn!("Webhook signature header missing v1 signature");
    AppError::Auth("Invalid signature".to_string())
  })?;

  if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
    warn!(timestamp, now, "Webhook signature timestamp outside tolerance");
    return Err(AppError::Auth("Invalid signature".to_string()));
  }

  let expected = hex::decode(v1_signature).map_err(|_| AppError::Auth("Invalid signature".to_string()))?;

  let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
    .map_err(|_| AppError::Config("Invalid webhook secret".to_string()))?;
  mac.update(timestamp.to_string().as_bytes());
  mac.update(b".");
  mac.update(payload);

  mac
    .verify_slice(&expected)
    .map_err(|_| AppError::Auth("Invalid signature".to_string()))
}

/// Builds a valid signature header for the given payload. Test support.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
  let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
  mac.update(timestamp.to_string().as_bytes());
  mac.update(b".");
  mac.update(payload);
  format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}
