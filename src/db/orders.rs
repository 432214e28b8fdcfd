// src/db/orders.rs

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::{NewOrder, Order, OrderStatus};

const ORDER_COLUMNS: &str = "id, package_id, user_email, user_name, name, surname, amount, currency, \
   payment_intent_id, checkout_session_id, stripe_customer_id, provider_order_id, esim_id, iccid, \
   lpa_code, qr_code_url, activation_code, status, metadata, failure_reason, refund_id, \
   created_at, updated_at, paid_at, failed_at, cancelled_at, refunded_at";

#[async_trait]
pub trait OrderStore: Send + Sync {
  async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>>;
  async fn find_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Order>>;
  async fn insert(&self, new_order: NewOrder) -> Result<Order>;

  /// Moves the order along the status graph. Rejects transitions not in
  /// the current status's successor set and stamps the timestamp column
  /// that belongs to the target status.
  async fn transition(&self, id: Uuid, target: OrderStatus) -> Result<Order>;

  /// Additive jsonb merge; independent steps append flags concurrently,
  /// so the map is never overwritten wholesale.
  async fn merge_metadata(&self, id: Uuid, patch: JsonValue) -> Result<()>;

  async fn set_provisioning_refs(&self, id: Uuid, provider_order_id: &str, esim_id: &str) -> Result<()>;
  async fn set_qr_payload(
    &self,
    id: Uuid,
    lpa_code: Option<&str>,
    qr_code_url: Option<&str>,
    activation_code: Option<&str>,
  ) -> Result<()>;
  async fn set_iccid(&self, id: Uuid, iccid: &str) -> Result<()>;
  async fn set_failure_reason(&self, id: Uuid, reason: &str) -> Result<()>;
  async fn set_refund_id(&self, id: Uuid, refund_id: &str) -> Result<()>;
}

pub struct PgOrderStore {
  pool: PgPool,
}

impl PgOrderStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl OrderStore for PgOrderStore {
  async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
    let order: Option<Order> = sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(order)
  }

  async fn find_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Order>> {
    let order: Option<Order> =
      sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE payment_intent_id = $1"))
        .bind(payment_intent_id)
        .fetch_optional(&self.pool)
        .await?;
    Ok(order)
  }

  async fn insert(&self, new_order: NewOrder) -> Result<Order> {
    let order: Order = sqlx::query_as(&format!(
      "INSERT INTO orders (package_id, user_email, user_name, name, surname, amount, currency, \
         payment_intent_id, checkout_session_id, stripe_customer_id, provider_order_id, esim_id, \
         lpa_code, qr_code_url, activation_code, status, metadata, paid_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
         CASE WHEN $16 = 'paid'::order_status_enum THEN now() END) \
       RETURNING {ORDER_COLUMNS}"
    ))
    .bind(new_order.package_id)
    .bind(&new_order.user_email)
    .bind(&new_order.user_name)
    .bind(&new_order.name)
    .bind(&new_order.surname)
    .bind(new_order.amount)
    .bind(&new_order.currency)
    .bind(&new_order.payment_intent_id)
    .bind(&new_order.checkout_session_id)
    .bind(&new_order.stripe_customer_id)
    .bind(&new_order.provider_order_id)
    .bind(&new_order.esim_id)
    .bind(&new_order.lpa_code)
    .bind(&new_order.qr_code_url)
    .bind(&new_order.activation_code)
    .bind(new_order.status)
    .bind(&new_order.metadata)
    .fetch_one(&self.pool)
    .await?;
    Ok(order)
  }

  async fn transition(&self, id: Uuid, target: OrderStatus) -> Result<Order> {
    let current = self
      .find_by_id(id)
      .await?
      .ok_or_else(|| AppError::NotFound(format!("Order {} not found for status transition", id)))?;

    if !current.status.can_transition_to(target) {
      warn!(order_id = %id, from = %current.status, to = %target, "Rejected illegal order status transition");
      return Err(AppError::Validation(format!(
        "Illegal order status transition {} -> {} for order {}",
        current.status, target, id
      )));
    }

    let timestamp_column = match target {
      OrderStatus::Paid => ", paid_at = now()",
      OrderStatus::Failed => ", failed_at = now()",
      OrderStatus::Cancelled => ", cancelled_at = now()",
      OrderStatus::Refunded => ", refunded_at = now()",
      _ => "",
    };

    // Compare-and-set on the previous status so an interleaved update
    // cannot silently skip a hop in the graph.
    let updated: Option<Order> = sqlx::query_as(&format!(
      "UPDATE orders SET status = $1, updated_at = now(){timestamp_column} \
       WHERE id = $2 AND status = $3 RETURNING {ORDER_COLUMNS}"
    ))
    .bind(target)
    .bind(id)
    .bind(current.status)
    .fetch_optional(&self.pool)
    .await?;

    updated.ok_or_else(|| {
      AppError::Validation(format!(
        "Order {} changed status concurrently; transition to {} not applied",
        id, target
      ))
    })
  }

  async fn merge_metadata(&self, id: Uuid, patch: JsonValue) -> Result<()> {
    sqlx::query("UPDATE orders SET metadata = COALESCE(metadata, '{}'::jsonb) || $1, updated_at = now() WHERE id = $2")
      .bind(patch)
      .bind(id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn set_provisioning_refs(&self, id: Uuid, provider_order_id: &str, esim_id: &str) -> Result<()> {
    sqlx::query("UPDATE orders SET provider_order_id = $1, esim_id = $2, updated_at = now() WHERE id = $3")
      .bind(provider_order_id)
      .bind(esim_id)
      .bind(id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn set_qr_payload(
    &self,
    id: Uuid,
    lpa_code: Option<&str>,
    qr_code_url: Option<&str>,
    activation_code: Option<&str>,
  ) -> Result<()> {
    sqlx::query(
      "UPDATE orders SET lpa_code = $1, qr_code_url = $2, activation_code = $3, updated_at = now() WHERE id = $4",
    )
    .bind(lpa_code)
    .bind(qr_code_url)
    .bind(activation_code)
    .bind(id)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn set_iccid(&self, id: Uuid, iccid: &str) -> Result<()> {
    sqlx::query("UPDATE orders SET iccid = $1, updated_at = now() WHERE id = $2")
      .bind(iccid)
      .bind(id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn set_failure_reason(&self, id: Uuid, reason: &str) -> Result<()> {
    sqlx::query("UPDATE orders SET failure_reason = $1, updated_at = now() WHERE id = $2")
      .bind(reason)
      .bind(id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn set_refund_id(&self, id: Uuid, refund_id: &str) -> Result<()> {
    sqlx::query("UPDATE orders SET refund_id = $1, updated_at = now() WHERE id = $2")
      .bind(refund_id)
      .bind(id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }
}
