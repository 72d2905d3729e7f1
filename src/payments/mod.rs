//! Payment processing module
//!
//! Domain types, the storage/gateway ports, the gateway-facing processor and
//! the Adyen provider.

pub mod in_memory;
pub mod processor;
pub mod providers;
pub mod traits;
pub mod types;

pub use in_memory::InMemoryResponseStore;
pub use processor::{PaymentContext, PaymentDetails, PaymentProcessor};
pub use traits::{GatewayClient, ResponseStore, Signer};
