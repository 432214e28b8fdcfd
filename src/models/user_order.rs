// src/models/user_order.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, Type as SqlxType};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, SqlxType)]
#[sqlx(type_name = "user_order_status_enum", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserOrderStatus {
  Pending,
  Active,
  Expired,
  Cancelled,
}

/// Per-buyer dashboard record. Created opportunistically by the
/// orchestrator; a failure to create one never blocks eSIM delivery.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserOrder {
  pub id: Uuid,
  pub user_id: Uuid,
  pub order_id: Uuid,
  pub status: UserOrderStatus,
  pub iccid: Option<String>,
  pub qr_code_url: Option<String>,
  pub created_at: DateTime<Utc>,
}

/// Values for a new `user_orders` row.
#[derive(Debug, Clone)]
pub struct NewUserOrder {
  pub user_id: Uuid,
  pub order_id: Uuid,
  pub status: UserOrderStatus,
  pub iccid: Option<String>,
  pub qr_code_url: Option<String>,
}
