use crate::types::ListenerKey;
use realtime_provider::ChannelStatus;
use std::{
	collections::HashSet,
	time::{Duration, Instant},
};

/// One provider connection, owned by the multiplexer
#[derive(Debug)]
pub(crate) struct Channel<H> {
	pub table: String,
	pub topic: String,
	pub handle: H,
	pub status: ChannelStatus,
	pub generation: u64,
	pub opened_at: Instant,
	/// Keys that already hold a provider registration on this channel
	attached: HashSet<ListenerKey>,
}

impl<H> Channel<H> {
	pub fn new(table: String, topic: String, handle: H, generation: u64) -> Self {
		Self {
			table,
			topic,
			handle,
			status: ChannelStatus::Connecting,
			generation,
			opened_at: Instant::now(),
			attached: HashSet::new(),
		}
	}

	pub fn is_attached(&self, key: &ListenerKey) -> bool {
		self.attached.contains(key)
	}

	pub fn mark_attached(&mut self, key: ListenerKey) -> bool {
		self.attached.insert(key)
	}

	pub fn attached_count(&self) -> usize {
		self.attached.len()
	}

	pub fn age(&self) -> Duration {
		self.opened_at.elapsed()
	}
}
