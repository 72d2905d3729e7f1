//! Gateway provider implementations

pub mod adyen;

pub use adyen::{AdyenClient, AdyenConfig, HmacSha256Signer};
