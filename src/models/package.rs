// src/models/package.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Catalog entry, read-only to the fulfillment core. `provisioning_slug`
/// is the exact identifier the provider's order endpoint expects; a
/// package without one cannot be fulfilled.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Package {
  pub id: Uuid,
  pub name: String,
  pub country_name: Option<String>,
  pub data_amount: i32,
  pub validity_days: i32,
  pub price: f64,
  pub location_slug: Option<String>,
  pub provisioning_slug: Option<String>,
  pub created_at: DateTime<Utc>,
}
