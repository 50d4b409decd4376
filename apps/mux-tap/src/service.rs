use crate::config::{Config, PolicyArg, WatchSpec};
use crate::feed::{FeedLine, FeedStatus, StatusLine, TapOutput};
use anyhow::Context;
use realtime_mux::{ChangePayload, ChannelFailure, ErrorAction, ListenerGuard, LogAndDrop, RealtimeMux};
use realtime_provider::InMemProvider;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TapStats {
	pub lines: u64,
	pub changes: u64,
	pub dispatched: u64,
	pub status_reports: u64,
	pub rejected: u64,
	pub channels_pruned: u64,
}

/// Replays a change feed through a multiplexer over the in-memory provider.
pub struct TapService {
	mux: RealtimeMux<InMemProvider>,
	provider: InMemProvider,
	guards: Vec<ListenerGuard<InMemProvider>>,
	stats: TapStats,
}

impl TapService {
	/// Builds the multiplexer and subscribes every configured watcher.
	///
	/// # Errors
	/// Fails when a watcher names a blank table.
	pub fn new(config: &Config, output: &mpsc::UnboundedSender<TapOutput>) -> anyhow::Result<Self> {
		let provider = if config.manual_confirm { InMemProvider::manual() } else { InMemProvider::new() };

		let builder = RealtimeMux::builder().provider(provider.clone()).schema(&config.schema).topic_prefix(&config.topic_prefix);
		let builder = match config.error_policy {
			PolicyArg::Keep => builder.error_policy(LogAndDrop),
			policy => {
				let action = ErrorAction::from(policy);
				builder.error_policy(move |failure: &ChannelFailure| {
					warn!(table = %failure.table, status = %failure.status, action = ?action, "Realtime channel lost");
					action
				})
			}
		};
		let mux = builder.build()?;

		let mut guards = Vec::with_capacity(config.watch.len());
		for watch in &config.watch {
			guards.push(Self::subscribe_watch(&mux, watch, output.clone()).with_context(|| format!("subscribing watcher {watch}"))?);
		}

		info!(watchers = guards.len(), schema = %config.schema, "Tap watchers subscribed");

		Ok(Self {
			mux,
			provider,
			guards,
			stats: TapStats::default(),
		})
	}

	fn subscribe_watch(mux: &RealtimeMux<InMemProvider>, watch: &WatchSpec, output: mpsc::UnboundedSender<TapOutput>) -> anyhow::Result<ListenerGuard<InMemProvider>> {
		let name = watch.name.clone();
		let guard = mux.subscribe_guarded(&watch.table, watch.event, watch.filter.as_deref(), move |payload: &ChangePayload| {
			// The writer is gone only during shutdown.
			let _ = output.send(TapOutput::new(&name, payload));
		})?;

		debug!(watcher = %watch, listener = %guard.id(), "Watcher subscribed");
		Ok(guard)
	}

	#[must_use]
	pub const fn mux(&self) -> &RealtimeMux<InMemProvider> {
		&self.mux
	}

	#[must_use]
	pub const fn stats(&self) -> &TapStats {
		&self.stats
	}

	/// Applies one feed line. Blank lines and `#` comments are skipped.
	///
	/// # Errors
	/// Fails when the line is not a valid feed record.
	pub fn handle_line(&mut self, line: &str) -> anyhow::Result<()> {
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') {
			return Ok(());
		}
		self.stats.lines += 1;

		let record: FeedLine = serde_json::from_str(line).context("malformed feed line")?;
		match record {
			FeedLine::Change(payload) => {
				let dispatched = self.provider.emit(&payload);
				self.stats.changes += 1;
				self.stats.dispatched += dispatched as u64;
				debug!(table = %payload.table, event = %payload.event_type, dispatched, "Change replayed");
			}
			FeedLine::Status(status) => {
				self.apply_status(&status);
				self.stats.status_reports += 1;
			}
		}

		Ok(())
	}

	fn apply_status(&self, line: &StatusLine) {
		let topic = self.mux.config().topic_for(&line.table);
		let reported = match line.status {
			FeedStatus::Subscribed => self.provider.confirm(&topic),
			FeedStatus::Error => self.provider.fail(&topic, line.reason.clone().unwrap_or_else(|| "feed error".to_string())),
			FeedStatus::Timeout => self.provider.time_out(&topic),
			FeedStatus::Closed => self.provider.close_remote(&topic),
		};

		if reported == 0 {
			debug!(topic = %topic, status = ?line.status, "No live channel for status line");
		}

		// Applied here so the next feed line sees the channel's new state.
		let applied = self.mux.drain_status();
		debug!(topic = %topic, applied, "Status reports applied");
	}

	/// Reads `reader` to the end or until `shutdown`, then releases every
	/// watcher and channel. Idle channels are pruned every `prune_interval`
	/// between lines.
	///
	/// # Errors
	/// Fails when the input cannot be read.
	pub async fn run<R>(mut self, reader: R, shutdown: CancellationToken, stats_interval: Option<Duration>, prune_interval: Option<Duration>) -> anyhow::Result<TapStats>
	where
		R: AsyncBufRead + Unpin,
	{
		let mut lines = reader.lines();
		let mut stats_tick = stats_interval.map(|period| interval_at(Instant::now() + period, period));
		let mut prune_tick = prune_interval.map(|period| interval_at(Instant::now() + period, period));

		loop {
			tokio::select! {
				() = shutdown.cancelled() => {
					info!("Tap received shutdown signal");
					break;
				}
				line = lines.next_line() => {
					let Some(line) = line.context("reading feed")? else {
						info!("Feed exhausted");
						break;
					};
					if let Err(e) = self.handle_line(&line) {
						self.stats.rejected += 1;
						warn!(error = %e, "Feed line rejected");
					}
				}
				() = tick(stats_tick.as_mut()) => {
					self.log_stats();
				}
				() = tick(prune_tick.as_mut()) => {
					let pruned = self.mux.prune_idle_channels();
					self.stats.channels_pruned += pruned as u64;
					if pruned > 0 {
						debug!(pruned, "Idle channels pruned");
					}
				}
			}
		}

		self.log_stats();
		Ok(self.shutdown())
	}

	fn log_stats(&self) {
		let stats = self.mux.get_stats();
		match serde_json::to_string(&stats.listeners_by_key) {
			Ok(by_key) => info!(
				channels = stats.total_channels,
				listeners = stats.total_listeners,
				by_key = %by_key,
				"Multiplexer stats"
			),
			Err(e) => warn!(error = %e, "Failed to render stats"),
		}
	}

	fn shutdown(mut self) -> TapStats {
		let released = self.guards.drain(..).map(ListenerGuard::release).filter(|removed| *removed).count();
		self.mux.unsubscribe_all();

		info!(
			released,
			lines = self.stats.lines,
			changes = self.stats.changes,
			rejected = self.stats.rejected,
			"Tap stopped"
		);
		self.stats
	}
}

async fn tick(interval: Option<&mut tokio::time::Interval>) {
	match interval {
		Some(interval) => {
			interval.tick().await;
		}
		None => std::future::pending::<()>().await,
	}
}
