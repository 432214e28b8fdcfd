// src/fulfillment/mod.rs

pub mod events;
pub mod fallback;
pub mod orchestrator;

pub use events::{Charge, CheckoutSession, EventType, PaymentIntent, StripeEvent};
pub use orchestrator::{FulfillmentOrchestrator, WebhookOutcome};
