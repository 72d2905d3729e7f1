//! Adyen payment gateway bridge for a billing platform.
//!
//! Records the gateway's responses to operations this service initiates and
//! reconciles the gateway's asynchronous notifications into transaction
//! status changes on the billing platform.

pub mod api;
pub mod billing;
pub mod config;
#[cfg(feature = "database")]
pub mod database;
pub mod error;
pub mod notifications;
pub mod payments;
pub mod tenant;

pub use error::{AppError, AppErrorKind, AppResult};
