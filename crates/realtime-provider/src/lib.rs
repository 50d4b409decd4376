//! Realtime Provider Crate
//!
//! Describes the boundary between the subscription multiplexer and whatever
//! managed service actually delivers row-change events.
//!
//! # Features
//!
//! - `inmem` - Enable an in-process provider that delivers events emitted by
//!   the caller, used for tests and local replay
//!
//! # Architecture
//!
//! A provider opens one channel per topic, accepts change registrations on that
//! channel and reports the channel's lifecycle through a [`StatusSink`]. Wire
//! protocol, reconnection and delivery guarantees belong to the provider.
//!
//! # Example
//!
//! ```rust,no_run
//! use realtime_provider::{ChangeEvent, ChangePayload, ChangeSpec, ChannelProvider, StatusSink};
//! use std::sync::Arc;
//!
//! #[cfg(feature = "inmem")]
//! fn example_inmem() {
//!     use realtime_provider::InMemProvider;
//!
//!     let provider = InMemProvider::new();
//!     let handle = provider.open("realtime:orders", StatusSink::noop()).unwrap();
//!
//!     let spec = ChangeSpec::new("public", "orders", ChangeEvent::Insert);
//!     provider
//!         .on(&handle, spec, Arc::new(|payload: &ChangePayload| println!("{:?}", payload.new)))
//!         .unwrap();
//!
//!     provider.emit(&ChangePayload::insert("orders", serde_json::json!({ "id": 1 })));
//! }
//! ```

pub mod error;
pub mod filter;
pub mod traits;
pub mod types;

pub use error::{ProviderError, Result};
pub use filter::{FilterError, FilterOp, RowFilter};
pub use traits::{ChangeHandler, ChannelProvider};
pub use types::{ChangeEvent, ChangePayload, ChangeSpec, ChannelStatus, StatusSink, StatusUpdate};

#[cfg(feature = "inmem")]
pub mod inmem;

#[cfg(feature = "inmem")]
pub use inmem::{InMemHandle, InMemProvider};
