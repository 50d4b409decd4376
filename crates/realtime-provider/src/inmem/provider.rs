use super::channel::{Binding, InMemChannel, InMemHandle};
use crate::error::{ProviderError, Result};
use crate::filter::RowFilter;
use crate::traits::{ChangeHandler, ChannelProvider};
use crate::types::{ChangePayload, ChangeSpec, ChannelStatus, StatusSink, StatusUpdate};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// In-memory channel provider.
///
/// Each `open` creates an independent channel, even for a topic that is
/// already open, so callers can observe duplicate connections. Events only
/// flow when [`InMemProvider::emit`] is called, and status changes only when
/// the caller simulates them (or on open, when auto-confirm is enabled).
///
/// # Example
///
/// ```rust,no_run
/// use realtime_provider::inmem::InMemProvider;
///
/// // Channels stay `Connecting` until `confirm` is called
/// let provider = InMemProvider::manual();
/// assert_eq!(provider.open_count(), 0);
/// ```
#[derive(Clone)]
pub struct InMemProvider {
	inner: Arc<Inner>,
}

struct Inner {
	channels: DashMap<u64, InMemChannel>,
	next_id: AtomicU64,
	opened: AtomicU64,
	auto_confirm: bool,
}

impl InMemProvider {
	/// Provider that confirms every channel as soon as it is opened.
	#[must_use]
	pub fn new() -> Self {
		Self::with_auto_confirm(true)
	}

	/// Provider that leaves channels connecting until [`Self::confirm`].
	#[must_use]
	pub fn manual() -> Self {
		Self::with_auto_confirm(false)
	}

	fn with_auto_confirm(auto_confirm: bool) -> Self {
		Self {
			inner: Arc::new(Inner {
				channels: DashMap::new(),
				next_id: AtomicU64::new(0),
				opened: AtomicU64::new(0),
				auto_confirm,
			}),
		}
	}

	/// Delivers `payload` to every matching registration on live channels.
	/// Returns the number of handler invocations.
	pub fn emit(&self, payload: &ChangePayload) -> usize {
		// Collect first so no shard lock is held while handlers run.
		let handlers: Vec<ChangeHandler> = self
			.inner
			.channels
			.iter()
			.filter(|entry| entry.value().is_live())
			.flat_map(|entry| entry.value().bindings.iter().filter(|b| b.matches(payload)).map(|b| Arc::clone(&b.handler)).collect::<Vec<_>>())
			.collect();

		for handler in &handlers {
			handler(payload);
		}

		debug!(table = %payload.table, event = %payload.event_type, delivered = handlers.len(), "In-memory change emitted");
		handlers.len()
	}

	/// Confirms every live channel on `topic`.
	pub fn confirm(&self, topic: &str) -> usize {
		self.transition(topic, StatusUpdate::subscribed())
	}

	/// Simulates a connection error on every live channel for `topic`.
	pub fn fail(&self, topic: &str, reason: impl Into<String>) -> usize {
		self.transition(topic, StatusUpdate::errored(reason))
	}

	/// Simulates a handshake timeout on every live channel for `topic`.
	pub fn time_out(&self, topic: &str) -> usize {
		self.transition(topic, StatusUpdate::timed_out())
	}

	/// Simulates the remote side closing every live channel for `topic`.
	pub fn close_remote(&self, topic: &str) -> usize {
		self.transition(topic, StatusUpdate::closed())
	}

	fn transition(&self, topic: &str, update: StatusUpdate) -> usize {
		let mut sinks = Vec::new();

		for mut entry in self.inner.channels.iter_mut() {
			let channel = entry.value_mut();
			if channel.topic == topic && channel.is_live() {
				channel.status = update.status;
				sinks.push(channel.sink.clone());
			}
		}

		for sink in &sinks {
			sink.report(update.clone());
		}

		sinks.len()
	}

	/// Total channels ever opened.
	#[must_use]
	pub fn open_count(&self) -> u64 {
		self.inner.opened.load(Ordering::SeqCst)
	}

	/// Channels opened and not yet closed by their owner.
	#[must_use]
	pub fn active_channels(&self) -> usize {
		self.inner.channels.len()
	}

	/// Registrations across all channels on `topic`.
	#[must_use]
	pub fn binding_count(&self, topic: &str) -> usize {
		self.inner.channels.iter().filter(|entry| entry.value().topic == topic).map(|entry| entry.value().bindings.len()).sum()
	}

	/// Status of the most recently opened channel on `topic`.
	#[must_use]
	pub fn status(&self, topic: &str) -> Option<ChannelStatus> {
		self
			.inner
			.channels
			.iter()
			.filter(|entry| entry.value().topic == topic)
			.max_by_key(|entry| *entry.key())
			.map(|entry| entry.value().status)
	}
}

impl Default for InMemProvider {
	fn default() -> Self {
		Self::new()
	}
}

impl ChannelProvider for InMemProvider {
	type Handle = InMemHandle;

	fn open(&self, topic: &str, status: StatusSink) -> Result<Self::Handle> {
		if topic.trim().is_empty() {
			return Err(ProviderError::Rejected("empty topic".to_string()));
		}

		let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
		self.inner.opened.fetch_add(1, Ordering::SeqCst);

		let mut channel = InMemChannel::new(topic.to_string(), status.clone());
		if self.inner.auto_confirm {
			channel.status = ChannelStatus::Subscribed;
		}
		self.inner.channels.insert(id, channel);

		if self.inner.auto_confirm {
			status.report(StatusUpdate::subscribed());
		}

		debug!(topic, id, "In-memory channel opened");
		Ok(InMemHandle { id, topic: topic.to_string() })
	}

	fn on(&self, handle: &Self::Handle, spec: ChangeSpec, handler: ChangeHandler) -> Result<()> {
		let filter = spec.filter.as_deref().map(RowFilter::parse).transpose()?;

		let mut channel = self.inner.channels.get_mut(&handle.id).ok_or_else(|| ProviderError::ChannelNotFound(handle.to_string()))?;
		if !channel.is_live() {
			return Err(ProviderError::ChannelClosed(handle.to_string()));
		}

		channel.bindings.push(Binding { spec, filter, handler });
		Ok(())
	}

	fn close(&self, handle: &Self::Handle) -> Result<()> {
		self
			.inner
			.channels
			.remove(&handle.id)
			.map(|_| debug!(topic = %handle.topic, id = handle.id, "In-memory channel closed"))
			.ok_or_else(|| ProviderError::ChannelNotFound(handle.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::ChangeEvent;
	use serde_json::json;
	use std::sync::Mutex;

	fn recording_handler() -> (ChangeHandler, Arc<Mutex<Vec<ChangePayload>>>) {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		(Arc::new(move |p: &ChangePayload| sink.lock().unwrap().push(p.clone())), seen)
	}

	fn recording_sink() -> (StatusSink, Arc<Mutex<Vec<StatusUpdate>>>) {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		(StatusSink::new(move |u| sink.lock().unwrap().push(u)), seen)
	}

	#[test]
	fn test_open_auto_confirms() {
		let provider = InMemProvider::new();
		let (sink, updates) = recording_sink();

		provider.open("realtime:orders", sink).unwrap();

		assert_eq!(provider.open_count(), 1);
		assert_eq!(provider.status("realtime:orders"), Some(ChannelStatus::Subscribed));
		assert_eq!(updates.lock().unwrap().as_slice(), &[StatusUpdate::subscribed()]);
	}

	#[test]
	fn test_manual_confirm() {
		let provider = InMemProvider::manual();
		let (sink, updates) = recording_sink();

		provider.open("realtime:orders", sink).unwrap();
		assert_eq!(provider.status("realtime:orders"), Some(ChannelStatus::Connecting));
		assert!(updates.lock().unwrap().is_empty());

		assert_eq!(provider.confirm("realtime:orders"), 1);
		assert_eq!(provider.status("realtime:orders"), Some(ChannelStatus::Subscribed));
	}

	#[test]
	fn test_open_rejects_empty_topic() {
		let provider = InMemProvider::new();
		assert!(matches!(provider.open("  ", StatusSink::noop()), Err(ProviderError::Rejected(_))));
	}

	#[test]
	fn test_emit_matches_event_and_table() {
		let provider = InMemProvider::new();
		let handle = provider.open("realtime:orders", StatusSink::noop()).unwrap();
		let (inserts, seen_inserts) = recording_handler();
		let (updates, seen_updates) = recording_handler();

		provider.on(&handle, ChangeSpec::new("public", "orders", ChangeEvent::Insert), inserts).unwrap();
		provider.on(&handle, ChangeSpec::new("public", "orders", ChangeEvent::Update), updates).unwrap();

		assert_eq!(provider.emit(&ChangePayload::insert("orders", json!({ "id": 1 }))), 1);
		assert_eq!(provider.emit(&ChangePayload::insert("payments", json!({ "id": 2 }))), 0);

		assert_eq!(seen_inserts.lock().unwrap().len(), 1);
		assert!(seen_updates.lock().unwrap().is_empty());
	}

	#[test]
	fn test_emit_applies_filter() {
		let provider = InMemProvider::new();
		let handle = provider.open("realtime:orders", StatusSink::noop()).unwrap();
		let (handler, seen) = recording_handler();

		provider
			.on(&handle, ChangeSpec::new("public", "orders", ChangeEvent::Any).with_filter("owner_id=eq.7"), handler)
			.unwrap();

		provider.emit(&ChangePayload::insert("orders", json!({ "id": 1, "owner_id": 7 })));
		provider.emit(&ChangePayload::insert("orders", json!({ "id": 2, "owner_id": 8 })));
		provider.emit(&ChangePayload::delete("orders", json!({ "id": 1, "owner_id": 7 })));

		let seen = seen.lock().unwrap();
		assert_eq!(seen.len(), 2);
		assert_eq!(seen[1].event_type, ChangeEvent::Delete);
	}

	#[test]
	fn test_on_rejects_bad_filter() {
		let provider = InMemProvider::new();
		let handle = provider.open("realtime:orders", StatusSink::noop()).unwrap();
		let (handler, _) = recording_handler();

		let result = provider.on(&handle, ChangeSpec::new("public", "orders", ChangeEvent::Any).with_filter("owner_id"), handler);
		assert!(matches!(result, Err(ProviderError::Filter(_))));
	}

	#[test]
	fn test_failed_channel_stops_delivery() {
		let provider = InMemProvider::new();
		let (sink, updates) = recording_sink();
		let handle = provider.open("realtime:orders", sink).unwrap();
		let (handler, seen) = recording_handler();
		provider.on(&handle, ChangeSpec::new("public", "orders", ChangeEvent::Any), Arc::clone(&handler)).unwrap();

		assert_eq!(provider.fail("realtime:orders", "socket reset"), 1);
		assert_eq!(provider.emit(&ChangePayload::insert("orders", json!({ "id": 1 }))), 0);
		assert!(seen.lock().unwrap().is_empty());
		assert_eq!(updates.lock().unwrap().last(), Some(&StatusUpdate::errored("socket reset")));

		let result = provider.on(&handle, ChangeSpec::new("public", "orders", ChangeEvent::Any), handler);
		assert!(matches!(result, Err(ProviderError::ChannelClosed(_))));
	}

	#[test]
	fn test_close_removes_channel() {
		let provider = InMemProvider::new();
		let handle = provider.open("realtime:orders", StatusSink::noop()).unwrap();
		assert_eq!(provider.active_channels(), 1);

		provider.close(&handle).unwrap();
		assert_eq!(provider.active_channels(), 0);
		assert!(matches!(provider.close(&handle), Err(ProviderError::ChannelNotFound(_))));
	}
}
