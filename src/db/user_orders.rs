// src/db/user_orders.rs

use async_trait::async_trait;
use sqlx::PgPool;

use crate::errors::Result;
use crate::models::{NewUserOrder, UserOrder};

/// Best-effort side table for buyer dashboards. Callers treat failures
/// here as non-fatal.
#[async_trait]
pub trait UserOrderStore: Send + Sync {
  async fn insert(&self, new_user_order: NewUserOrder) -> Result<UserOrder>;
}

pub struct PgUserOrderStore {
  pool: PgPool,
}

impl PgUserOrderStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl UserOrderStore for PgUserOrderStore {
  async fn insert(&self, new_user_order: NewUserOrder) -> Result<UserOrder> {
    let user_order: UserOrder = sqlx::query_as(
      "INSERT INTO user_orders (user_id, order_id, status, iccid, qr_code_url) \
       VALUES ($1, $2, $3, $4, $5) \
       RETURNING id, user_id, order_id, status, iccid, qr_code_url, created_at",
    )
    .bind(new_user_order.user_id)
    .bind(new_user_order.order_id)
    .bind(new_user_order.status)
    .bind(&new_user_order.iccid)
    .bind(&new_user_order.qr_code_url)
    .fetch_one(&self.pool)
    .await?;
    Ok(user_order)
  }
}
