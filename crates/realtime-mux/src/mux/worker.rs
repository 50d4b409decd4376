use super::multiplexer::RealtimeMux;
use crate::errors::MuxError;
use realtime_provider::ChannelProvider;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Applies channel status reports as they arrive and optionally prunes idle
/// channels on an interval.
pub struct StatusWorker<P: ChannelProvider> {
	mux: RealtimeMux<P>,
	prune_interval: Option<Duration>,
	shutdown_token: CancellationToken,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
	pub reports_applied: u64,
	pub prune_cycles: u64,
	pub channels_pruned: u64,
}

impl<P: ChannelProvider> StatusWorker<P> {
	pub const fn new(mux: RealtimeMux<P>, prune_interval: Option<Duration>, shutdown_token: CancellationToken) -> Self {
		Self {
			mux,
			prune_interval,
			shutdown_token,
		}
	}

	/// Start the worker on the current runtime. The handle resolves once the
	/// shutdown token is cancelled and the queue has been drained.
	pub fn start(self) -> tokio::task::JoinHandle<WorkerStats> {
		tokio::spawn(async move { self.run().await })
	}

	async fn run(self) -> WorkerStats {
		let mut stats = WorkerStats::default();
		let mut prune = self.prune_interval.filter(|period| !period.is_zero()).map(|period| interval_at(Instant::now() + period, period));

		info!(prune_interval = ?self.prune_interval, "Status worker starting");

		loop {
			tokio::select! {
				() = self.shutdown_token.cancelled() => {
					info!("Status worker received shutdown signal");
					break;
				}
				event = self.mux.inner().next_status() => {
					let Some(event) = event else {
						break;
					};
					self.mux.inner().apply_status(event);
					stats.reports_applied += 1;
				}
				() = tick(prune.as_mut()) => {
					let pruned = self.mux.prune_idle_channels();
					stats.prune_cycles += 1;
					stats.channels_pruned += pruned as u64;
					if pruned > 0 {
						debug!(pruned, "Prune cycle closed idle channels");
					}
				}
			}
		}

		stats.reports_applied += self.mux.drain_status() as u64;

		info!(
			reports = stats.reports_applied,
			prune_cycles = stats.prune_cycles,
			pruned = stats.channels_pruned,
			"Status worker shutting down gracefully"
		);

		stats
	}
}

async fn tick(interval: Option<&mut Interval>) {
	match interval {
		Some(interval) => {
			interval.tick().await;
		}
		None => std::future::pending::<()>().await,
	}
}

/// Builder for [`StatusWorker`]
pub struct StatusWorkerBuilder<P: ChannelProvider> {
	mux: Option<RealtimeMux<P>>,
	prune_interval: Option<Duration>,
	shutdown_token: Option<CancellationToken>,
}

impl<P: ChannelProvider> StatusWorkerBuilder<P> {
	#[must_use]
	pub const fn new() -> Self {
		Self {
			mux: None,
			prune_interval: None,
			shutdown_token: None,
		}
	}

	#[must_use]
	pub fn mux(mut self, mux: RealtimeMux<P>) -> Self {
		self.mux = Some(mux);
		self
	}

	/// Prune idle channels every `interval`. Off by default.
	#[must_use]
	pub fn prune_interval(mut self, interval: Duration) -> Self {
		self.prune_interval = Some(interval);
		self
	}

	#[must_use]
	pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
		self.shutdown_token = Some(token);
		self
	}

	/// # Errors
	/// Returns [`MuxError::MissingField`] when the mux or token is missing.
	pub fn build(self) -> Result<StatusWorker<P>, MuxError> {
		let mux = self.mux.ok_or(MuxError::MissingField("mux"))?;
		let shutdown_token = self.shutdown_token.ok_or(MuxError::MissingField("shutdown_token"))?;

		Ok(StatusWorker::new(mux, self.prune_interval, shutdown_token))
	}
}

impl<P: ChannelProvider> Default for StatusWorkerBuilder<P> {
	fn default() -> Self {
		Self::new()
	}
}
