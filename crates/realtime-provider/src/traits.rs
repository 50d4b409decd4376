use crate::error::Result;
use crate::types::{ChangePayload, ChangeSpec, StatusSink};
use std::sync::Arc;

/// Handler invoked once per matching row change.
pub type ChangeHandler = Arc<dyn Fn(&ChangePayload) + Send + Sync>;

/// Core channel interface that every realtime backend must satisfy.
///
/// Calls are synchronous and must not block on the network: the connection
/// handshake happens in the background and its outcome is reported through
/// the [`StatusSink`] passed to [`ChannelProvider::open`].
///
/// Implementations must not invoke change handlers or status sinks from inside
/// `open`, `on` or `close` in a way that waits on the caller; handlers run
/// later, as events arrive.
pub trait ChannelProvider: Send + Sync + 'static {
	/// Handle identifying one open channel.
	type Handle: Clone + Send + Sync + std::fmt::Debug + 'static;

	/// Opens a channel for `topic` and starts its handshake.
	///
	/// # Errors
	/// Returns an error when the provider refuses to create the channel.
	fn open(&self, topic: &str, status: StatusSink) -> Result<Self::Handle>;

	/// Registers `handler` for changes matching `spec` on an open channel.
	///
	/// # Errors
	/// Returns an error when the channel is unknown or already closed.
	fn on(&self, handle: &Self::Handle, spec: ChangeSpec, handler: ChangeHandler) -> Result<()>;

	/// Closes the channel and drops every registration on it.
	///
	/// # Errors
	/// Returns an error when the channel is unknown.
	fn close(&self, handle: &Self::Handle) -> Result<()>;
}

impl<P: ChannelProvider> ChannelProvider for Arc<P> {
	type Handle = P::Handle;

	fn open(&self, topic: &str, status: StatusSink) -> Result<Self::Handle> {
		(**self).open(topic, status)
	}

	fn on(&self, handle: &Self::Handle, spec: ChangeSpec, handler: ChangeHandler) -> Result<()> {
		(**self).on(handle, spec, handler)
	}

	fn close(&self, handle: &Self::Handle) -> Result<()> {
		(**self).close(handle)
	}
}
