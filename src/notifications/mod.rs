//! Gateway notification reconciliation
//!
//! Turns asynchronous gateway notifications into billing-platform status
//! changes: [`item`] parses the envelope, [`matcher`] finds the local
//! transaction, [`resolver`] decides the target status and [`handler`]
//! applies it and writes the audit trail.

pub mod handler;
pub mod item;
pub mod matcher;
pub mod resolver;

pub use handler::{ItemOutcome, NotificationHandler, NotificationReport};
pub use item::{parse_notification, Acknowledgement, EventCode, NotificationItem, ACCEPTED};
pub use matcher::{MatchOutcome, MatchSource, MatchedTransaction, TransactionMatcher};
pub use resolver::{Resolution, StatusResolver, Transition, TransitionTarget};
