use realtime_provider::{ChangeEvent, ChangePayload, ChangeSpec, ChannelStatus};
use serde::Serialize;
use std::{collections::BTreeMap, fmt, sync::Arc};

/// Callback invoked with every change delivered to its listener group.
pub type Callback = Arc<dyn Fn(&ChangePayload) + Send + Sync>;

/// Listener id, unique for the lifetime of one multiplexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ListenerId(u64);

impl ListenerId {
	pub(crate) const fn new(raw: u64) -> Self {
		Self(raw)
	}

	#[must_use]
	pub const fn as_u64(&self) -> u64 {
		self.0
	}
}

impl fmt::Display for ListenerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "listener-{}", self.0)
	}
}

/// Composite key shared by every callback in one listener group
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerKey {
	pub table: String,
	pub event: ChangeEvent,
	pub filter: Option<String>,
}

impl ListenerKey {
	pub fn new(table: impl Into<String>, event: ChangeEvent, filter: Option<String>) -> Self {
		Self {
			table: table.into(),
			event,
			filter,
		}
	}

	/// Provider registration spec for this key.
	#[must_use]
	pub fn spec(&self, schema: &str) -> ChangeSpec {
		let spec = ChangeSpec::new(schema, self.table.clone(), self.event);
		match &self.filter {
			Some(filter) => spec.with_filter(filter.clone()),
			None => spec,
		}
	}
}

impl fmt::Display for ListenerKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}:{}", self.table, self.event, self.filter.as_deref().unwrap_or("*"))
	}
}

/// Point-in-time view of multiplexer bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MuxStats {
	pub total_channels: usize,
	pub total_listeners: usize,
	/// Callbacks per table, summed over every key on that table
	pub listeners_by_table: BTreeMap<String, usize>,
	/// Callbacks per composite key (`table:EVENT:filter`)
	pub listeners_by_key: BTreeMap<String, usize>,
	/// Provider topics of the open channels, sorted
	pub channel_names: Vec<String>,
	pub channel_status: BTreeMap<String, ChannelStatus>,
}
