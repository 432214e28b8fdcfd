// src/fulfillment/events.rs

//! Inbound webhook event envelope and the typed views of the payloads
//! the orchestrator works with.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeEvent {
  pub id: String,
  #[serde(rename = "type")]
  pub event_type: String,
  pub data: EventData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
  pub object: JsonValue,
}

impl StripeEvent {
  pub fn parse(payload: &[u8]) -> Result<Self, AppError> {
    serde_json::from_slice(payload).map_err(|e| AppError::Validation(format!("Invalid webhook payload: {}", e)))
  }

  pub fn kind(&self) -> EventType {
    EventType::from_str(&self.event_type)
  }

  pub fn object<T: serde::de::DeserializeOwned>(&self) -> Result<T, AppError> {
    serde_json::from_value(self.data.object.clone())
      .map_err(|e| AppError::Validation(format!("Malformed {} payload: {}", self.event_type, e)))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
  PaymentIntentSucceeded,
  PaymentIntentFailed,
  PaymentIntentCanceled,
  CheckoutSessionCompleted,
  ChargeRefunded,
  SubscriptionCreated,
  SubscriptionUpdated,
  SubscriptionDeleted,
  Unknown,
}

impl EventType {
  pub fn from_str(raw: &str) -> Self {
    match raw {
      "payment_intent.succeeded" => EventType::PaymentIntentSucceeded,
      "payment_intent.payment_failed" => EventType::PaymentIntentFailed,
      "payment_intent.canceled" => EventType::PaymentIntentCanceled,
      "checkout.session.completed" => EventType::CheckoutSessionCompleted,
      "charge.refunded" => EventType::ChargeRefunded,
      "customer.subscription.created" => EventType::SubscriptionCreated,
      "customer.subscription.updated" => EventType::SubscriptionUpdated,
      "customer.subscription.deleted" => EventType::SubscriptionDeleted,
      _ => EventType::Unknown,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
  pub id: String,
  #[serde(default)]
  pub amount: i64,
  #[serde(default)]
  pub currency: String,
  pub customer: Option<String>,
  #[serde(default)]
  pub metadata: HashMap<String, String>,
  pub last_payment_error: Option<LastPaymentError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LastPaymentError {
  pub message: Option<String>,
}

impl PaymentIntent {
  pub fn meta(&self, key: &str) -> Option<&str> {
    self.metadata.get(key).map(String::as_str).filter(|v| !v.is_empty())
  }

  pub fn amount_major(&self) -> f64 {
    self.amount as f64 / 100.0
  }

  pub fn failure_message(&self) -> &str {
    self
      .last_payment_error
      .as_ref()
      .and_then(|e| e.message.as_deref())
      .unwrap_or("Payment failed")
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
  pub id: String,
  pub payment_intent: Option<String>,
  pub customer: Option<String>,
  #[serde(default)]
  pub amount_total: i64,
  pub customer_email: Option<String>,
  pub customer_details: Option<CustomerDetails>,
  #[serde(default)]
  pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerDetails {
  pub email: Option<String>,
}

impl CheckoutSession {
  pub fn meta(&self, key: &str) -> Option<&str> {
    self.metadata.get(key).map(String::as_str).filter(|v| !v.is_empty())
  }

  pub fn buyer_email(&self) -> Option<&str> {
    self
      .customer_details
      .as_ref()
      .and_then(|d| d.email.as_deref())
      .or(self.customer_email.as_deref())
      .filter(|v| !v.is_empty())
  }

  pub fn amount_major(&self) -> f64 {
    self.amount_total as f64 / 100.0
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Charge {
  pub id: String,
  pub payment_intent: Option<String>,
  #[serde(default)]
  pub amount_refunded: i64,
  pub refunds: Option<RefundList>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundList {
  #[serde(default)]
  pub data: Vec<Refund>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Refund {
  pub id: String,
}

impl Charge {
  pub fn refund_id(&self) -> Option<&str> {
    self.refunds.as_ref().and_then(|r| r.data.first()).map(|r| r.id.as_str())
  }

  pub fn amount_refunded_major(&self) -> f64 {
    self.amount_refunded as f64 / 100.0
  }
}
