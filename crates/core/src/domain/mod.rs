pub mod action;
pub mod inventory;
pub mod message;
pub mod metrics;
pub mod session;
