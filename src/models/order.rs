// src/models/order.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, Type as SqlxType};
use uuid::Uuid;

/// Order lifecycle states. Transitions are restricted to the successor
/// sets returned by [`OrderStatus::allowed_successors`]; `expired`,
/// `cancelled` and `refunded` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, SqlxType)]
#[sqlx(type_name = "order_status_enum", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
  Pending,
  Paid,
  Activated,
  Expired,
  Refunded,
  Cancelled,
  Failed,
  PaidButPackageMissing,
  PendingEsim,
  PendingQr,
  Completed,
}

impl OrderStatus {
  pub fn allowed_successors(self) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match self {
      Pending => &[Paid, PaidButPackageMissing, Cancelled, Failed],
      Paid => &[
        Activated,
        Completed,
        PendingEsim,
        PendingQr,
        PaidButPackageMissing,
        Refunded,
        Failed,
      ],
      PaidButPackageMissing => &[Paid, Refunded, Failed],
      PendingEsim => &[PendingQr, Completed, Refunded, Failed],
      PendingQr => &[Completed, Refunded, Failed],
      Completed => &[Activated, Expired, Refunded],
      Activated => &[Expired, Refunded],
      Failed => &[Refunded],
      Expired | Cancelled | Refunded => &[],
    }
  }

  pub fn can_transition_to(self, target: OrderStatus) -> bool {
    self.allowed_successors().contains(&target)
  }

  pub fn is_absorbing(self) -> bool {
    matches!(self, OrderStatus::Expired | OrderStatus::Cancelled | OrderStatus::Refunded)
  }

  pub fn as_str(self) -> &'static str {
    use OrderStatus::*;
    match self {
      Pending => "pending",
      Paid => "paid",
      Activated => "activated",
      Expired => "expired",
      Refunded => "refunded",
      Cancelled => "cancelled",
      Failed => "failed",
      PaidButPackageMissing => "paid_but_package_missing",
      PendingEsim => "pending_esim",
      PendingQr => "pending_qr",
      Completed => "completed",
    }
  }
}

impl std::fmt::Display for OrderStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The central order aggregate. Mutated only by the fulfillment
/// orchestrator (and admin tooling outside this crate); never deleted.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Order {
  pub id: Uuid,
  pub package_id: Option<Uuid>,
  pub user_email: String,
  pub user_name: Option<String>,
  pub name: Option<String>,
  pub surname: Option<String>,
  pub amount: f64,
  pub currency: String,
  pub payment_intent_id: Option<String>,
  pub checkout_session_id: Option<String>,
  pub stripe_customer_id: Option<String>,
  pub provider_order_id: Option<String>,
  pub esim_id: Option<String>,
  pub iccid: Option<String>,
  pub lpa_code: Option<String>,
  pub qr_code_url: Option<String>,
  pub activation_code: Option<String>,
  pub status: OrderStatus,
  /// Diagnostic flag side channel. Always merged additively, never
  /// overwritten wholesale.
  pub metadata: Option<JsonValue>,
  pub failure_reason: Option<String>,
  pub refund_id: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub paid_at: Option<DateTime<Utc>>,
  pub failed_at: Option<DateTime<Utc>>,
  pub cancelled_at: Option<DateTime<Utc>>,
  pub refunded_at: Option<DateTime<Utc>>,
}

impl Order {
  pub fn metadata_flag(&self, key: &str) -> bool {
    self
      .metadata
      .as_ref()
      .and_then(|m| m.get(key))
      .and_then(JsonValue::as_bool)
      .unwrap_or(false)
  }
}

/// Column values for inserting a checkout-session order, which is
/// created directly as `paid` with profile data already attached.
#[derive(Debug, Clone)]
pub struct NewOrder {
  pub package_id: Uuid,
  pub user_email: String,
  pub user_name: String,
  pub name: Option<String>,
  pub surname: Option<String>,
  pub amount: f64,
  pub currency: String,
  pub payment_intent_id: Option<String>,
  pub checkout_session_id: Option<String>,
  pub stripe_customer_id: Option<String>,
  pub provider_order_id: Option<String>,
  pub esim_id: Option<String>,
  pub lpa_code: Option<String>,
  pub qr_code_url: Option<String>,
  pub activation_code: Option<String>,
  pub status: OrderStatus,
  pub metadata: JsonValue,
}
