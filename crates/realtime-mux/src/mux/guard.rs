use super::multiplexer::RealtimeMux;
use crate::types::ListenerId;
use realtime_provider::ChannelProvider;

/// Registration that is removed when dropped
pub struct ListenerGuard<P: ChannelProvider> {
	mux: RealtimeMux<P>,
	id: ListenerId,
	armed: bool,
}

impl<P: ChannelProvider> ListenerGuard<P> {
	pub(crate) const fn new(mux: RealtimeMux<P>, id: ListenerId) -> Self {
		Self { mux, id, armed: true }
	}

	#[must_use]
	pub const fn id(&self) -> ListenerId {
		self.id
	}

	/// Unsubscribe now instead of on drop.
	pub fn release(mut self) -> bool {
		self.armed = false;
		self.mux.unsubscribe(self.id)
	}

	/// Keep the registration alive past the guard. The caller owns the id.
	#[must_use]
	pub fn forget(mut self) -> ListenerId {
		self.armed = false;
		self.id
	}
}

impl<P: ChannelProvider> Drop for ListenerGuard<P> {
	fn drop(&mut self) {
		if self.armed {
			self.mux.unsubscribe(self.id);
		}
	}
}
