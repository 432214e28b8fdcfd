// src/services/polling.rs

//! Bounded-time wait for the provider to produce an installable profile
//! after an order is placed.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::services::provisioning::{EsimProfile, ProvisioningApi, ProvisioningError};

#[derive(Debug, Clone)]
pub struct QrPollingEngine {
  pub poll_interval: Duration,
  pub budget: Duration,
}

impl Default for QrPollingEngine {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_secs(10),
      budget: Duration::from_secs(5 * 60),
    }
  }
}

impl QrPollingEngine {
  pub fn new(poll_interval: Duration, budget: Duration) -> Self {
    Self { poll_interval, budget }
  }

  /// Applies the profile once and then polls the status endpoint until a
  /// complete payload appears or the wall-clock budget runs out. A
  /// payload with all installable fields empty counts as "not ready".
  /// Budget exhaustion returns [`ProvisioningError::QrTimeout`] so the
  /// orchestrator can route to `pending_qr` instead of a generic failure.
  pub async fn wait_for_profile(
    &self,
    api: &Arc<dyn ProvisioningApi>,
    esim_id: &str,
  ) -> Result<EsimProfile, ProvisioningError> {
    let deadline = Instant::now() + self.budget;

    let profile = api.apply_profile(esim_id).await?;
    if profile.is_complete() {
      info!(%esim_id, "Profile ready immediately after apply");
      return Ok(profile);
    }

    let mut attempt = 0u32;
    loop {
      if Instant::now() + self.poll_interval > deadline {
        warn!(%esim_id, attempt, budget_secs = self.budget.as_secs(), "QR polling budget exhausted");
        return Err(ProvisioningError::QrTimeout {
          budget_secs: self.budget.as_secs(),
        });
      }
      tokio::time::sleep(self.poll_interval).await;
      attempt += 1;

      let profile = api.get_profile_status(esim_id).await?;
      if profile.is_complete() {
        info!(%esim_id, attempt, "Profile ready");
        return Ok(profile);
      }
      info!(%esim_id, attempt, "Profile not ready yet");
    }
  }
}
