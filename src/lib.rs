// src/lib.rs

//! Order fulfillment service for an eSIM storefront: verifies payment
//! provider webhooks, records them idempotently, provisions eSIMs with
//! retry and fallback, waits for the installable QR payload, and sends
//! the buyer-facing emails.

pub mod config;
pub mod db;
pub mod errors;
pub mod fulfillment;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod web;

pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use state::AppState;
