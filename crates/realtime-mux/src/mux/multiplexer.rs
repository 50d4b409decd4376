use super::channel::Channel;
use super::group::ListenerGroup;
use super::guard::ListenerGuard;
use super::policy::{ChannelErrorPolicy, ChannelFailure, ErrorAction, LogAndDrop};
use super::registry::{Registration, Registry};
use crate::config::MuxConfig;
use crate::errors::MuxError;
use crate::types::{Callback, ListenerId, ListenerKey, MuxStats};
use realtime_provider::{ChangeEvent, ChangeHandler, ChangePayload, ChannelProvider, ChannelStatus, ProviderError, StatusSink, StatusUpdate};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Status report queued by a channel's sink
#[derive(Debug)]
pub(crate) struct StatusEvent {
	pub table: String,
	pub generation: u64,
	pub update: StatusUpdate,
}

struct MuxState<H> {
	channels: HashMap<String, Channel<H>>,
	groups: HashMap<ListenerKey, ListenerGroup>,
	registry: Registry,
	last_generation: u64,
}

impl<H> MuxState<H> {
	fn new() -> Self {
		Self {
			channels: HashMap::new(),
			groups: HashMap::new(),
			registry: Registry::default(),
			last_generation: 0,
		}
	}

	fn next_generation(&mut self) -> u64 {
		self.last_generation += 1;
		self.last_generation
	}

	fn has_listeners(&self, table: &str) -> bool {
		self.groups.keys().any(|key| key.table == table)
	}

	fn keys_for(&self, table: &str) -> Vec<ListenerKey> {
		self.groups.keys().filter(|key| key.table == table).cloned().collect()
	}

	fn drop_table_listeners(&mut self, table: &str) -> Vec<Registration> {
		self.groups.retain(|_, group| group.key().table != table);
		self.registry.remove_table(table)
	}
}

/// Work collected under the lock and carried out after it is released
struct Deferred<H> {
	closes: Vec<Channel<H>>,
	failures: Vec<ChannelFailure>,
}

impl<H> Default for Deferred<H> {
	fn default() -> Self {
		Self {
			closes: Vec::new(),
			failures: Vec::new(),
		}
	}
}

fn failure_of<H>(channel: &Channel<H>, status: ChannelStatus, reason: Option<String>) -> ChannelFailure {
	ChannelFailure {
		table: channel.table.clone(),
		topic: channel.topic.clone(),
		status,
		reason,
		generation: channel.generation,
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
	panic
		.downcast_ref::<&str>()
		.copied()
		.or_else(|| panic.downcast_ref::<String>().map(String::as_str))
		.unwrap_or("non-string panic payload")
}

pub(crate) struct MuxInner<P: ChannelProvider> {
	provider: P,
	config: MuxConfig,
	policy: Arc<dyn ChannelErrorPolicy>,
	state: Mutex<MuxState<P::Handle>>,
	status_tx: mpsc::UnboundedSender<StatusEvent>,
	status_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<StatusEvent>>,
}

impl<P: ChannelProvider> MuxInner<P> {
	fn lock_state(&self) -> MutexGuard<'_, MuxState<P::Handle>> {
		// Callbacks never run under this lock, so poisoning only follows a provider panic.
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn status_sink(&self, table: &str, generation: u64) -> StatusSink {
		let tx = self.status_tx.clone();
		let table = table.to_string();
		StatusSink::new(move |update| {
			// Send only fails once the multiplexer itself is gone.
			let _ = tx.send(StatusEvent {
				table: table.clone(),
				generation,
				update,
			});
		})
	}

	fn fan_out_handler(self: &Arc<Self>, key: ListenerKey) -> ChangeHandler {
		let inner = Arc::downgrade(self);
		Arc::new(move |payload: &ChangePayload| {
			if let Some(inner) = inner.upgrade() {
				inner.fan_out(&key, payload);
			}
		})
	}

	/// Delivers one change to every callback of `key`, in registration order.
	fn fan_out(&self, key: &ListenerKey, payload: &ChangePayload) -> usize {
		if !key.event.accepts(payload.event_type) {
			return 0;
		}

		let members: Vec<(ListenerId, Callback)> = {
			let state = self.lock_state();
			let Some(group) = state.groups.get(key) else {
				debug!(key = %key, "Change for a key without listeners dropped");
				return 0;
			};
			group
				.members()
				.iter()
				.filter_map(|id| state.registry.get(*id).map(|record| (*id, Arc::clone(&record.callback))))
				.collect()
		};

		let mut delivered = 0;
		for (id, callback) in members {
			// An earlier callback in this fan-out may have removed this one.
			let live = self.lock_state().registry.contains(id);
			if !live {
				continue;
			}

			match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
				Ok(()) => delivered += 1,
				Err(panic) => error!(
					listener = %id,
					key = %key,
					reason = panic_message(panic.as_ref()),
					"Listener callback panicked"
				),
			}
		}

		debug!(key = %key, event = %payload.event_type, delivered, "Change fanned out");
		delivered
	}

	fn open_channel(self: &Arc<Self>, state: &mut MuxState<P::Handle>, table: &str, deferred: &mut Deferred<P::Handle>) {
		let generation = state.next_generation();
		let topic = self.config.topic_for(table);

		match self.provider.open(&topic, self.status_sink(table, generation)) {
			Ok(handle) => {
				info!(table, topic = %topic, generation, "Realtime channel opened");
				state.channels.insert(table.to_string(), Channel::new(table.to_string(), topic, handle, generation));

				// Groups that outlived a previous channel for this table are re-attached here.
				for key in state.keys_for(table) {
					self.attach(state, &key, deferred);
				}
			}
			Err(e) => {
				error!(table, topic = %topic, error = %e, "Failed to open realtime channel");
				deferred.failures.push(ChannelFailure {
					table: table.to_string(),
					topic,
					status: ChannelStatus::Errored,
					reason: Some(e.to_string()),
					generation,
				});
			}
		}
	}

	/// Adds the single provider registration for `key` unless it already exists.
	fn attach(self: &Arc<Self>, state: &mut MuxState<P::Handle>, key: &ListenerKey, deferred: &mut Deferred<P::Handle>) {
		let Some(channel) = state.channels.get_mut(&key.table) else {
			return;
		};
		if channel.is_attached(key) {
			return;
		}

		let result = self.provider.on(&channel.handle, key.spec(&self.config.schema), self.fan_out_handler(key.clone()));

		match result {
			Ok(()) => {
				channel.mark_attached(key.clone());
				debug!(key = %key, topic = %channel.topic, registrations = channel.attached_count(), "Provider registration added");
			}
			Err(e @ (ProviderError::ChannelClosed(_) | ProviderError::ChannelNotFound(_))) => {
				error!(key = %key, topic = %channel.topic, error = %e, "Channel unusable while registering listener");
				if let Some(channel) = state.channels.remove(&key.table) {
					deferred.failures.push(failure_of(&channel, ChannelStatus::Errored, Some(e.to_string())));
					deferred.closes.push(channel);
				}
			}
			Err(e) => {
				// Retried by the next subscription for the same key.
				error!(key = %key, topic = %channel.topic, error = %e, "Provider rejected listener registration");
			}
		}
	}

	fn close_channel(&self, channel: Channel<P::Handle>) {
		match self.provider.close(&channel.handle) {
			Ok(()) => debug!(topic = %channel.topic, generation = channel.generation, age = ?channel.age(), "Realtime channel closed"),
			Err(e) => debug!(topic = %channel.topic, error = %e, "Provider close failed"),
		}
	}

	fn settle(self: &Arc<Self>, deferred: Deferred<P::Handle>, allow_reopen: bool) {
		for channel in deferred.closes {
			self.close_channel(channel);
		}
		for failure in deferred.failures {
			self.handle_failure(&failure, allow_reopen);
		}
	}

	fn handle_failure(self: &Arc<Self>, failure: &ChannelFailure, allow_reopen: bool) {
		match self.policy.on_channel_error(failure) {
			ErrorAction::Keep => {
				debug!(table = %failure.table, "Listener groups kept until the table is subscribed again");
			}
			ErrorAction::Reopen if allow_reopen => {
				let mut deferred = Deferred::default();
				{
					let mut state = self.lock_state();
					if !state.channels.contains_key(&failure.table) && state.has_listeners(&failure.table) {
						info!(table = %failure.table, "Reopening realtime channel");
						self.open_channel(&mut state, &failure.table, &mut deferred);
					}
				}
				self.settle(deferred, false);
			}
			ErrorAction::Reopen => {
				warn!(table = %failure.table, "Replacement channel failed too; waiting for the next subscription");
			}
			ErrorAction::DropListeners => {
				let dropped = self.lock_state().drop_table_listeners(&failure.table);
				info!(table = %failure.table, listeners = dropped.len(), "Listeners dropped after channel loss");
			}
		}
	}

	pub(crate) fn apply_status(self: &Arc<Self>, event: StatusEvent) {
		let StatusEvent { table, generation, update } = event;

		if !update.status.is_terminal() {
			let mut state = self.lock_state();
			match state.channels.get_mut(&table) {
				Some(channel) if channel.generation == generation => {
					if channel.status != update.status {
						info!(table = %table, topic = %channel.topic, status = %update.status, "Realtime channel status changed");
					}
					channel.status = update.status;
				}
				_ => debug!(table = %table, generation, status = %update.status, "Status report for a replaced channel ignored"),
			}
			return;
		}

		let removed = {
			let mut state = self.lock_state();
			let current = state.channels.get(&table).is_some_and(|channel| channel.generation == generation);
			if current {
				state.channels.remove(&table)
			} else {
				None
			}
		};

		let Some(channel) = removed else {
			debug!(table = %table, generation, status = %update.status, "Status report for a replaced channel ignored");
			return;
		};

		warn!(
			table = %table,
			topic = %channel.topic,
			status = %update.status,
			reason = update.reason.as_deref().unwrap_or("none"),
			"Realtime channel lost"
		);

		let failure = failure_of(&channel, update.status, update.reason);
		self.close_channel(channel);
		self.handle_failure(&failure, true);
	}

	pub(crate) async fn next_status(&self) -> Option<StatusEvent> {
		self.status_rx.lock().await.recv().await
	}
}

/// Shared table-change multiplexer.
///
/// Cloning is cheap and every clone refers to the same bookkeeping, so one
/// instance built at startup can be handed to every consumer.
pub struct RealtimeMux<P: ChannelProvider> {
	inner: Arc<MuxInner<P>>,
}

impl<P: ChannelProvider> Clone for RealtimeMux<P> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<P: ChannelProvider> RealtimeMux<P> {
	/// Multiplexer with the default config and [`LogAndDrop`] policy.
	pub fn new(provider: P) -> Self {
		Self::from_parts(provider, MuxConfig::default(), Arc::new(LogAndDrop))
	}

	#[must_use]
	pub fn builder() -> RealtimeMuxBuilder<P> {
		RealtimeMuxBuilder::new()
	}

	fn from_parts(provider: P, config: MuxConfig, policy: Arc<dyn ChannelErrorPolicy>) -> Self {
		let (status_tx, status_rx) = mpsc::unbounded_channel();

		Self {
			inner: Arc::new(MuxInner {
				provider,
				config,
				policy,
				state: Mutex::new(MuxState::new()),
				status_tx,
				status_rx: tokio::sync::Mutex::new(status_rx),
			}),
		}
	}

	pub(crate) fn inner(&self) -> &Arc<MuxInner<P>> {
		&self.inner
	}

	#[must_use]
	pub fn config(&self) -> &MuxConfig {
		&self.inner.config
	}

	#[must_use]
	pub fn provider(&self) -> &P {
		&self.inner.provider
	}

	/// Subscribe `callback` to `event` changes on `table`.
	///
	/// # Errors
	/// Returns [`MuxError::InvalidTable`] for a blank table name. Provider
	/// failures are logged and handled by the error policy, never returned.
	pub fn subscribe<F>(&self, table: &str, event: ChangeEvent, callback: F) -> Result<ListenerId, MuxError>
	where
		F: Fn(&ChangePayload) + Send + Sync + 'static,
	{
		self.register(table, event, None, Arc::new(callback))
	}

	/// Like [`Self::subscribe`], scoped by a server-side row filter such as
	/// `owner_id=eq.42`.
	///
	/// # Errors
	/// Returns [`MuxError::InvalidTable`] for a blank table name.
	pub fn subscribe_filtered<F>(&self, table: &str, event: ChangeEvent, filter: &str, callback: F) -> Result<ListenerId, MuxError>
	where
		F: Fn(&ChangePayload) + Send + Sync + 'static,
	{
		self.register(table, event, Some(filter), Arc::new(callback))
	}

	/// Subscribe for the lifetime of the returned guard.
	///
	/// # Errors
	/// Returns [`MuxError::InvalidTable`] for a blank table name.
	pub fn subscribe_guarded<F>(&self, table: &str, event: ChangeEvent, filter: Option<&str>, callback: F) -> Result<ListenerGuard<P>, MuxError>
	where
		F: Fn(&ChangePayload) + Send + Sync + 'static,
	{
		let id = self.register(table, event, filter, Arc::new(callback))?;
		Ok(ListenerGuard::new(self.clone(), id))
	}

	/// Registers an already shared callback. Registering the same callback
	/// twice yields two independent registrations.
	///
	/// # Errors
	/// Returns [`MuxError::InvalidTable`] for a blank table name.
	pub fn register(&self, table: &str, event: ChangeEvent, filter: Option<&str>, callback: Callback) -> Result<ListenerId, MuxError> {
		let table = table.trim();
		if table.is_empty() {
			return Err(MuxError::InvalidTable);
		}

		let filter = filter.map(str::trim).filter(|f| !f.is_empty()).map(str::to_string);
		let key = ListenerKey::new(table, event, filter);
		let mut deferred = Deferred::default();

		let id = {
			let mut state = self.inner.lock_state();
			let id = state.registry.allocate(key.clone(), callback);
			let change = state.groups.entry(key.clone()).or_insert_with(|| ListenerGroup::new(key.clone())).add(id);

			if state.channels.contains_key(table) {
				self.inner.attach(&mut state, &key, &mut deferred);
			} else {
				self.inner.open_channel(&mut state, table, &mut deferred);
			}

			debug!(listener = %id, key = %key, added = change.added, group_size = change.total, "Listener registered");
			id
		};

		self.inner.settle(deferred, true);
		Ok(id)
	}

	/// Remove one registration. Unknown ids are logged and ignored.
	///
	/// Once this returns, the callback is not invoked again, including by a
	/// fan-out already running on the calling thread.
	pub fn unsubscribe(&self, id: ListenerId) -> bool {
		let removed = {
			let mut state = self.inner.lock_state();
			let Some(registration) = state.registry.remove(id) else {
				warn!(listener = %id, "Unsubscribe for unknown listener ignored");
				return false;
			};

			let emptied = state.groups.get_mut(&registration.key).is_some_and(|group| {
				let change = group.remove(id);
				debug!(key = %registration.key, removed = change.removed, remaining = change.total, "Listener left group");
				group.is_empty()
			});
			if emptied {
				state.groups.remove(&registration.key);
				debug!(key = %registration.key, "Listener group removed");
			}
			registration
		};

		debug!(listener = %id, key = %removed.key, "Listener unregistered");
		true
	}

	/// Close the channel for `table` and remove every listener on it.
	/// Returns the number of registrations removed.
	pub fn unsubscribe_table(&self, table: &str) -> usize {
		let table = table.trim();
		let (channel, removed) = {
			let mut state = self.inner.lock_state();
			let channel = state.channels.remove(table);
			(channel, state.drop_table_listeners(table))
		};

		if let Some(channel) = channel {
			self.inner.close_channel(channel);
		}

		info!(table, listeners = removed.len(), "Table unsubscribed");
		removed.len()
	}

	/// Close every channel and clear all bookkeeping.
	pub fn unsubscribe_all(&self) {
		let (channels, removed) = {
			let mut state = self.inner.lock_state();
			let channels: Vec<Channel<P::Handle>> = state.channels.drain().map(|(_, channel)| channel).collect();
			state.groups.clear();
			(channels, state.registry.clear())
		};

		let channel_count = channels.len();
		for channel in channels {
			self.inner.close_channel(channel);
		}

		info!(channels = channel_count, listeners = removed.len(), "All realtime listeners removed");
	}

	/// Close channels whose table no longer has any listener group.
	pub fn prune_idle_channels(&self) -> usize {
		let idle: Vec<Channel<P::Handle>> = {
			let mut state = self.inner.lock_state();
			let tables: Vec<String> = state.channels.keys().filter(|table| !state.has_listeners(table)).cloned().collect();
			tables.iter().filter_map(|table| state.channels.remove(table)).collect()
		};

		let pruned = idle.len();
		for channel in idle {
			info!(table = %channel.table, topic = %channel.topic, "Idle realtime channel pruned");
			self.inner.close_channel(channel);
		}
		pruned
	}

	/// Apply every queued status report now. Returns 0 while a
	/// [`StatusWorker`](super::worker::StatusWorker) owns the queue.
	pub fn drain_status(&self) -> usize {
		let events: Vec<StatusEvent> = {
			let Ok(mut rx) = self.inner.status_rx.try_lock() else {
				return 0;
			};
			std::iter::from_fn(|| rx.try_recv().ok()).collect()
		};

		let applied = events.len();
		for event in events {
			self.inner.apply_status(event);
		}
		applied
	}

	#[must_use]
	pub fn get_stats(&self) -> MuxStats {
		let state = self.inner.lock_state();

		let mut listeners_by_table = BTreeMap::new();
		let mut listeners_by_key = BTreeMap::new();
		for (key, group) in &state.groups {
			*listeners_by_table.entry(key.table.clone()).or_insert(0) += group.len();
			listeners_by_key.insert(key.to_string(), group.len());
		}

		let mut channel_names: Vec<String> = state.channels.values().map(|channel| channel.topic.clone()).collect();
		channel_names.sort();

		MuxStats {
			total_channels: state.channels.len(),
			total_listeners: state.registry.len(),
			listeners_by_table,
			listeners_by_key,
			channel_names,
			channel_status: state.channels.iter().map(|(table, channel)| (table.clone(), channel.status)).collect(),
		}
	}

	#[must_use]
	pub fn channel_status(&self, table: &str) -> Option<ChannelStatus> {
		self.inner.lock_state().channels.get(table.trim()).map(|channel| channel.status)
	}

	#[must_use]
	pub fn listener_count(&self) -> usize {
		self.inner.lock_state().registry.len()
	}

	#[must_use]
	pub fn contains(&self, id: ListenerId) -> bool {
		self.inner.lock_state().registry.contains(id)
	}
}

/// Builder for [`RealtimeMux`]
pub struct RealtimeMuxBuilder<P: ChannelProvider> {
	provider: Option<P>,
	config: MuxConfig,
	policy: Option<Arc<dyn ChannelErrorPolicy>>,
}

impl<P: ChannelProvider> RealtimeMuxBuilder<P> {
	#[must_use]
	pub fn new() -> Self {
		Self {
			provider: None,
			config: MuxConfig::default(),
			policy: None,
		}
	}

	#[must_use]
	pub fn provider(mut self, provider: P) -> Self {
		self.provider = Some(provider);
		self
	}

	#[must_use]
	pub fn config(mut self, config: MuxConfig) -> Self {
		self.config = config;
		self
	}

	#[must_use]
	pub fn schema(mut self, schema: impl Into<String>) -> Self {
		self.config.schema = schema.into();
		self
	}

	#[must_use]
	pub fn topic_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.config.topic_prefix = prefix.into();
		self
	}

	#[must_use]
	pub fn error_policy(mut self, policy: impl ChannelErrorPolicy) -> Self {
		self.policy = Some(Arc::new(policy));
		self
	}

	/// # Errors
	/// Returns [`MuxError::MissingField`] when no provider was set.
	pub fn build(self) -> Result<RealtimeMux<P>, MuxError> {
		let provider = self.provider.ok_or(MuxError::MissingField("provider"))?;
		let policy = self.policy.unwrap_or_else(|| Arc::new(LogAndDrop));
		Ok(RealtimeMux::from_parts(provider, self.config, policy))
	}
}

impl<P: ChannelProvider> Default for RealtimeMuxBuilder<P> {
	fn default() -> Self {
		Self::new()
	}
}
