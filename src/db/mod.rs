// src/db/mod.rs

//! Store traits and their Postgres implementations. The orchestrator only
//! sees the traits; tests substitute in-memory doubles.

pub mod events;
pub mod orders;
pub mod packages;
pub mod user_orders;

pub use events::{BeginProcessing, EventLedger, PgEventLedger};
pub use orders::{OrderStore, PgOrderStore};
pub use packages::{PackageStore, PgPackageStore};
pub use user_orders::{PgUserOrderStore, UserOrderStore};
