// src/fulfillment/fallback.rs

//! Locally generated eSIM credentials for the checkout path when the
//! provider is unreachable. These codes are marked for admin review and
//! never presented to the buyer as an installable profile.

use chrono::Utc;
use rand::Rng;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// `ESIM-XXXX-XXXX-XXXX` from an unambiguous alphabet (no O/0, I/1).
pub fn generate_esim_code() -> String {
  let mut rng = rand::thread_rng();
  let mut group = || {
    (0..4)
      .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
      .collect::<String>()
  };
  format!("ESIM-{}-{}-{}", group(), group(), group())
}

/// LPA-shaped string for the generated code so the stored row matches
/// the provider-sourced column format.
pub fn generate_lpa_payload(code: &str) -> String {
  format!("LPA:1$pending.provisioning${}", code)
}

pub fn fallback_order_id() -> String {
  format!("fallback-{}", Utc::now().timestamp_millis())
}
