// src/db/packages.rs

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::Package;

const PACKAGE_COLUMNS: &str =
  "id, name, country_name, data_amount, validity_days, price, location_slug, provisioning_slug, created_at";

/// Read-only catalog access.
#[async_trait]
pub trait PackageStore: Send + Sync {
  async fn find_by_id(&self, id: Uuid) -> Result<Option<Package>>;
  async fn find_by_location_slug(&self, slug: &str) -> Result<Option<Package>>;
}

pub struct PgPackageStore {
  pool: PgPool,
}

impl PgPackageStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl PackageStore for PgPackageStore {
  async fn find_by_id(&self, id: Uuid) -> Result<Option<Package>> {
    let package: Option<Package> = sqlx::query_as(&format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE id = $1"))
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(package)
  }

  async fn find_by_location_slug(&self, slug: &str) -> Result<Option<Package>> {
    let package: Option<Package> =
      sqlx::query_as(&format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE location_slug = $1"))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
    Ok(package)
  }
}
