//! Message contract schema for Courier orchestration.
//!
//! Defines the channel/category/priority vocabulary, template and variable
//! schemas with registration-time validation, delivery and per-channel status
//! records, recipient/preference views, and the durable inbox message shape.
//! Orchestrator and channel crates only consume well-formed contract values.
//!
//! ```rust
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use courier_contract::{Channel, MessageCategory, MessageTemplate, TemplateContent};
//!
//! let template = MessageTemplate::builder("order-confirmed", "Order confirmed")
//!     .category(MessageCategory::Transactional)
//!     .content(
//!         Channel::Inapp,
//!         TemplateContent::inapp("Order {{ order_id }} confirmed", "We received your order."),
//!     )
//!     .build();
//! template.validate()?;
//! assert_eq!(template.channels(), vec![Channel::Inapp]);
//! # Ok(())
//! # }
//! ```

pub mod inbox_message;
pub mod message_contract;
pub mod message_delivery;
pub mod template_store;

pub use inbox_message::*;
pub use message_contract::*;
pub use message_delivery::*;
pub use template_store::*;
