// src/services/mod.rs

//! External-facing service clients and their contracts.

pub mod email;
pub mod notifications;
pub mod polling;
pub mod provisioning;
pub mod signature;
