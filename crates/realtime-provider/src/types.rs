use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};

/// Kind of row change a listener is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeEvent {
	#[serde(rename = "INSERT")]
	Insert,
	#[serde(rename = "UPDATE")]
	Update,
	#[serde(rename = "DELETE")]
	Delete,
	#[serde(rename = "*", alias = "ANY")]
	Any,
}

impl ChangeEvent {
	#[must_use]
	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::Insert => "INSERT",
			Self::Update => "UPDATE",
			Self::Delete => "DELETE",
			Self::Any => "*",
		}
	}

	/// Whether a listener registered for `self` should see an `actual` change.
	#[must_use]
	pub fn accepts(&self, actual: Self) -> bool {
		*self == Self::Any || *self == actual
	}
}

impl fmt::Display for ChangeEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ChangeEvent {
	type Err = ProviderError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_uppercase().as_str() {
			"INSERT" => Ok(Self::Insert),
			"UPDATE" => Ok(Self::Update),
			"DELETE" => Ok(Self::Delete),
			"*" | "ANY" => Ok(Self::Any),
			other => Err(ProviderError::UnknownEvent(other.to_string())),
		}
	}
}

/// What a channel registration listens for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeSpec {
	pub event: ChangeEvent,
	pub schema: String,
	pub table: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub filter: Option<String>,
}

impl ChangeSpec {
	pub fn new(schema: impl Into<String>, table: impl Into<String>, event: ChangeEvent) -> Self {
		Self {
			event,
			schema: schema.into(),
			table: table.into(),
			filter: None,
		}
	}

	#[must_use]
	pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
		self.filter = Some(filter.into());
		self
	}
}

/// A single row change as delivered by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
	#[serde(default = "default_schema")]
	pub schema: String,
	pub table: String,
	#[serde(rename = "eventType")]
	pub event_type: ChangeEvent,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub commit_timestamp: Option<String>,
	#[serde(default)]
	pub new: serde_json::Value,
	#[serde(default)]
	pub old: serde_json::Value,
}

fn default_schema() -> String {
	"public".to_string()
}

impl ChangePayload {
	pub fn new(table: impl Into<String>, event_type: ChangeEvent) -> Self {
		Self {
			schema: default_schema(),
			table: table.into(),
			event_type,
			commit_timestamp: None,
			new: serde_json::Value::Null,
			old: serde_json::Value::Null,
		}
	}

	pub fn insert(table: impl Into<String>, new: serde_json::Value) -> Self {
		Self::new(table, ChangeEvent::Insert).with_new(new)
	}

	pub fn update(table: impl Into<String>, old: serde_json::Value, new: serde_json::Value) -> Self {
		Self::new(table, ChangeEvent::Update).with_old(old).with_new(new)
	}

	pub fn delete(table: impl Into<String>, old: serde_json::Value) -> Self {
		Self::new(table, ChangeEvent::Delete).with_old(old)
	}

	#[must_use]
	pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
		self.schema = schema.into();
		self
	}

	#[must_use]
	pub fn with_new(mut self, new: serde_json::Value) -> Self {
		self.new = new;
		self
	}

	#[must_use]
	pub fn with_old(mut self, old: serde_json::Value) -> Self {
		self.old = old;
		self
	}

	/// The row image filters are evaluated against: the old row for deletes,
	/// the new row otherwise.
	#[must_use]
	pub fn record(&self) -> &serde_json::Value {
		match self.event_type {
			ChangeEvent::Delete => &self.old,
			_ => &self.new,
		}
	}
}

/// Lifecycle of an underlying realtime channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
	Connecting,
	Subscribed,
	Errored,
	TimedOut,
	Closed,
}

impl ChannelStatus {
	/// Errored, timed out and closed channels are never reused.
	#[must_use]
	pub const fn is_terminal(&self) -> bool {
		matches!(self, Self::Errored | Self::TimedOut | Self::Closed)
	}
}

impl fmt::Display for ChannelStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Connecting => write!(f, "connecting"),
			Self::Subscribed => write!(f, "subscribed"),
			Self::Errored => write!(f, "errored"),
			Self::TimedOut => write!(f, "timed_out"),
			Self::Closed => write!(f, "closed"),
		}
	}
}

/// A status report for one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
	pub status: ChannelStatus,
	pub reason: Option<String>,
}

impl StatusUpdate {
	#[must_use]
	pub const fn subscribed() -> Self {
		Self {
			status: ChannelStatus::Subscribed,
			reason: None,
		}
	}

	pub fn errored(reason: impl Into<String>) -> Self {
		Self {
			status: ChannelStatus::Errored,
			reason: Some(reason.into()),
		}
	}

	#[must_use]
	pub const fn timed_out() -> Self {
		Self {
			status: ChannelStatus::TimedOut,
			reason: None,
		}
	}

	#[must_use]
	pub const fn closed() -> Self {
		Self {
			status: ChannelStatus::Closed,
			reason: None,
		}
	}
}

/// Callback a provider uses to report channel status.
///
/// Reporting must never block and must never call back into the code that
/// opened the channel; the multiplexer's sink only enqueues.
#[derive(Clone)]
pub struct StatusSink {
	notify: Arc<dyn Fn(StatusUpdate) + Send + Sync>,
}

impl StatusSink {
	pub fn new<F>(notify: F) -> Self
	where
		F: Fn(StatusUpdate) + Send + Sync + 'static,
	{
		Self { notify: Arc::new(notify) }
	}

	/// Sink that discards every report.
	#[must_use]
	pub fn noop() -> Self {
		Self::new(|_| {})
	}

	pub fn report(&self, update: StatusUpdate) {
		(self.notify)(update);
	}
}

impl fmt::Debug for StatusSink {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StatusSink").finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_change_event_parse() {
		assert_eq!("insert".parse::<ChangeEvent>().unwrap(), ChangeEvent::Insert);
		assert_eq!(" UPDATE ".parse::<ChangeEvent>().unwrap(), ChangeEvent::Update);
		assert_eq!("*".parse::<ChangeEvent>().unwrap(), ChangeEvent::Any);
		assert_eq!("any".parse::<ChangeEvent>().unwrap(), ChangeEvent::Any);
		assert!(matches!("TRUNCATE".parse::<ChangeEvent>(), Err(ProviderError::UnknownEvent(_))));
	}

	#[test]
	fn test_any_accepts_everything() {
		for actual in [ChangeEvent::Insert, ChangeEvent::Update, ChangeEvent::Delete] {
			assert!(ChangeEvent::Any.accepts(actual));
		}
		assert!(ChangeEvent::Insert.accepts(ChangeEvent::Insert));
		assert!(!ChangeEvent::Insert.accepts(ChangeEvent::Delete));
	}

	#[test]
	fn test_payload_wire_shape() {
		let raw = json!({
			"schema": "public",
			"table": "orders",
			"eventType": "UPDATE",
			"commit_timestamp": "2024-01-01T00:00:00Z",
			"new": { "id": 1, "status": "paid" },
			"old": { "id": 1, "status": "pending" }
		});

		let payload: ChangePayload = serde_json::from_value(raw).unwrap();
		assert_eq!(payload.event_type, ChangeEvent::Update);
		assert_eq!(payload.record()["status"], "paid");
		assert_eq!(payload.commit_timestamp.as_deref(), Some("2024-01-01T00:00:00Z"));
	}

	#[test]
	fn test_payload_defaults() {
		let payload: ChangePayload = serde_json::from_value(json!({ "table": "orders", "eventType": "DELETE", "old": { "id": 9 } })).unwrap();
		assert_eq!(payload.schema, "public");
		assert!(payload.new.is_null());
		assert_eq!(payload.record()["id"], 9);
	}

	#[test]
	fn test_terminal_statuses() {
		assert!(!ChannelStatus::Connecting.is_terminal());
		assert!(!ChannelStatus::Subscribed.is_terminal());
		assert!(ChannelStatus::Errored.is_terminal());
		assert!(ChannelStatus::TimedOut.is_terminal());
		assert!(ChannelStatus::Closed.is_terminal());
	}
}
