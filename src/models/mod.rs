// src/models/mod.rs

//! Data structures representing database entities.

pub mod order;
pub mod package;
pub mod processed_event;
pub mod user_order;

pub use order::{NewOrder, Order, OrderStatus};
pub use package::Package;
pub use processed_event::{EventProcessingStatus, ProcessedEvent};
pub use user_order::{NewUserOrder, UserOrder, UserOrderStatus};
