//! Channel renderers and provider adapters for Courier.
//!
//! Renderers are pure functions from (content block, variable bindings) to
//! validated channel-ready content. Adapters sit behind one async contract so
//! the orchestrator never touches a provider wire format; webhook payloads are
//! normalized into the shared per-channel status transition model.
//!
//! ```rust
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::collections::BTreeMap;
//! use courier_channels::{render_channel_content, RenderedContent};
//! use courier_contract::{Channel, MessageTemplate, TemplateContent, VariableSpec, VariableType};
//!
//! let template = MessageTemplate::builder("order-confirmed", "Order confirmed")
//!     .variable(VariableSpec::required("order_id", VariableType::String))
//!     .content(Channel::Inapp, TemplateContent::inapp("Order {{ order_id }}", "On its way."))
//!     .build();
//! let bindings = BTreeMap::from([("order_id".to_string(), serde_json::json!("ord-7"))]);
//! let rendered = render_channel_content(&template, Channel::Inapp, &bindings, 0)?;
//! match rendered {
//!     RenderedContent::Inapp(inapp) => assert_eq!(inapp.title, "Order ord-7"),
//!     _ => unreachable!(),
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel_adapter;
pub mod channel_http_adapters;
pub mod channel_render;
pub mod channel_webhook;

pub use channel_adapter::*;
pub use channel_http_adapters::*;
pub use channel_render::*;
pub use channel_webhook::*;
