use crate::filter::RowFilter;
use crate::traits::ChangeHandler;
use crate::types::{ChangePayload, ChangeSpec, ChannelStatus, StatusSink};
use std::fmt;

/// Handle to a channel opened on an [`InMemProvider`](super::InMemProvider).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InMemHandle {
	pub(crate) id: u64,
	pub(crate) topic: String,
}

impl InMemHandle {
	#[must_use]
	pub const fn id(&self) -> u64 {
		self.id
	}

	#[must_use]
	pub fn topic(&self) -> &str {
		&self.topic
	}
}

impl fmt::Display for InMemHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}#{}", self.topic, self.id)
	}
}

pub(crate) struct Binding {
	pub spec: ChangeSpec,
	pub filter: Option<RowFilter>,
	pub handler: ChangeHandler,
}

impl Binding {
	pub fn matches(&self, payload: &ChangePayload) -> bool {
		self.spec.table == payload.table
			&& self.spec.schema == payload.schema
			&& self.spec.event.accepts(payload.event_type)
			&& self.filter.as_ref().is_none_or(|f| f.matches(payload.record()))
	}
}

/// Provider-side state of one open channel
pub(crate) struct InMemChannel {
	pub topic: String,
	pub status: ChannelStatus,
	pub sink: StatusSink,
	pub bindings: Vec<Binding>,
}

impl InMemChannel {
	pub fn new(topic: String, sink: StatusSink) -> Self {
		Self {
			topic,
			status: ChannelStatus::Connecting,
			sink,
			bindings: Vec::new(),
		}
	}

	pub fn is_live(&self) -> bool {
		!self.status.is_terminal()
	}
}
