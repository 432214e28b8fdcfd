// src/web/handlers/mod.rs

pub mod webhook_handlers;
