//! # Realtime Mux Crate
//!
//! This crate implements a *table-change subscription multiplexer*: many
//! independent listeners share at most one provider channel per table.
//!
//! ## Overview
//!
//! [`RealtimeMux`] keeps three pieces of bookkeeping:
//!
//! 1. **Channels**: one provider connection per table, opened lazily on the
//!    first subscription and identified by a generation number.
//! 2. **Listener groups**: callbacks sharing a `(table, event, filter)` key.
//!    Each key owns exactly one provider registration; every change delivered
//!    to it is fanned out to all callbacks in registration order.
//! 3. **Registrations**: an id → record arena, so removal touches exactly the
//!    callback a caller registered and nothing else with the same shape.
//!
//! Provider status reports (subscribed / error / timeout / close) are queued
//! and applied by [`RealtimeMux::drain_status`] or a [`StatusWorker`]. A lost
//! channel is dropped immediately and never retried by the multiplexer itself;
//! the [`ChannelErrorPolicy`] decides what happens to its listener groups.
//!
//! ## Failure model
//!
//! - Nothing a provider does is surfaced to subscribers as an error. Losses are
//!   visible in logs and in [`RealtimeMux::get_stats`].
//! - A panicking callback is isolated; its group peers still receive the event.
//! - Callers that cannot tolerate missed events run a [`PollingFallback`].
//!
//! ## API Summary
//!
//! ```rust,ignore
//! let mux = RealtimeMux::new(provider);
//!
//! // One channel for `orders`, one provider registration for the key
//! let a = mux.subscribe("orders", ChangeEvent::Insert, |p| println!("a {:?}", p.new))?;
//! let b = mux.subscribe("orders", ChangeEvent::Insert, |p| println!("b {:?}", p.new))?;
//!
//! // Scoped registration, removed when the guard drops
//! let _guard = mux.subscribe_guarded("orders", ChangeEvent::Update, Some("owner_id=eq.7"), |_| {})?;
//!
//! mux.unsubscribe(a);
//! mux.unsubscribe(a); // unknown id, logged and ignored
//!
//! let stats = mux.get_stats();
//! assert_eq!(stats.total_channels, 1);
//! ```

pub mod config;
pub mod errors;
pub mod mux;
pub mod types;

pub use config::MuxConfig;
pub use errors::MuxError;
pub use mux::fallback::{FallbackStats, PollingFallback, PollingFallbackBuilder, Refresh, RefreshError};
pub use mux::guard::ListenerGuard;
pub use mux::multiplexer::{RealtimeMux, RealtimeMuxBuilder};
pub use mux::policy::{ChannelErrorPolicy, ChannelFailure, ErrorAction, LogAndDrop};
pub use mux::worker::{StatusWorker, StatusWorkerBuilder, WorkerStats};
pub use types::{Callback, ListenerId, ListenerKey, MuxStats};

pub use realtime_provider::{ChangeEvent, ChangePayload, ChannelProvider, ChannelStatus};
