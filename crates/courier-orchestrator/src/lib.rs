//! Delivery orchestration runtime for Courier.
//!
//! Ties the contract and channel crates together: resolves recipients and
//! preferences, filters channels through consent/preference/contact checks,
//! enforces sliding-window rate limits, defers non-urgent sends through quiet
//! hours, fans dispatch out across provider adapters, and guarantees one
//! durable inbox entry per dispatched delivery.

pub mod channel_eligibility;
pub mod delivery_orchestrator;
pub mod message_store;
pub mod quiet_hours;
pub mod rate_limiter;
pub mod recipient_directory;

pub use channel_eligibility::*;
pub use delivery_orchestrator::*;
pub use message_store::*;
pub use quiet_hours::*;
pub use rate_limiter::*;
pub use recipient_directory::*;
