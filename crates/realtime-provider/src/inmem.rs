//! In-memory provider implementation
//!
//! Delivers change events emitted by the caller to every matching registration,
//! in-process. Useful for:
//!
//! - Testing code built on top of [`ChannelProvider`](crate::ChannelProvider)
//! - Replaying captured change feeds locally
//! - Simulating connection errors and timeouts
//!
//! # Example
//!
//! ```rust,no_run
//! use realtime_provider::inmem::InMemProvider;
//! use realtime_provider::{ChangeEvent, ChangePayload, ChangeSpec, ChannelProvider, StatusSink};
//! use std::sync::Arc;
//!
//! let provider = InMemProvider::new();
//! let handle = provider.open("realtime:orders", StatusSink::noop()).unwrap();
//!
//! provider
//!     .on(&handle, ChangeSpec::new("public", "orders", ChangeEvent::Any), Arc::new(|p: &ChangePayload| println!("{}", p.event_type)))
//!     .unwrap();
//!
//! // Deliver one insert to every matching registration
//! let delivered = provider.emit(&ChangePayload::insert("orders", serde_json::json!({ "id": 1 })));
//! assert_eq!(delivered, 1);
//!
//! // Simulate the connection dropping
//! provider.fail("realtime:orders", "socket reset");
//! ```

#![cfg(feature = "inmem")]

mod channel;
mod provider;

pub use channel::InMemHandle;
pub use provider::InMemProvider;
