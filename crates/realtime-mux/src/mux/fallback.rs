//! Periodic refresh for tables whose realtime channel is not delivering.
//!
//! The multiplexer never retries a lost channel on its own. Consumers that
//! cannot tolerate a gap run a [`PollingFallback`] next to it: every interval,
//! each watched table without a `Subscribed` channel is re-fetched through the
//! caller's [`Refresh`] implementation.

use super::multiplexer::RealtimeMux;
use crate::errors::MuxError;
use async_trait::async_trait;
use realtime_provider::{ChannelProvider, ChannelStatus};
use std::{sync::Arc, time::Duration};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type RefreshError = Box<dyn std::error::Error + Send + Sync>;

/// Re-reads the current state of a table when realtime delivery is down.
#[async_trait]
pub trait Refresh: Send + Sync + 'static {
	async fn refresh(&self, table: &str) -> Result<(), RefreshError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackStats {
	pub cycles: u64,
	pub refreshes: u64,
	pub refresh_failures: u64,
	pub skipped_live: u64,
}

pub struct PollingFallback<P: ChannelProvider> {
	mux: RealtimeMux<P>,
	refresher: Arc<dyn Refresh>,
	tables: Vec<String>,
	interval: Duration,
	shutdown_token: CancellationToken,
}

impl<P: ChannelProvider> PollingFallback<P> {
	pub fn start(self) -> tokio::task::JoinHandle<FallbackStats> {
		tokio::spawn(async move { self.run().await })
	}

	async fn run(self) -> FallbackStats {
		let mut ticker = interval(self.interval);
		let mut stats = FallbackStats::default();

		info!(tables = ?self.tables, interval_secs = self.interval.as_secs(), "Polling fallback starting");

		loop {
			tokio::select! {
				() = self.shutdown_token.cancelled() => {
					info!("Polling fallback received shutdown signal");
					break;
				}
				_ = ticker.tick() => {
					self.poll_once(&mut stats).await;
				}
			}
		}

		info!(
			cycles = stats.cycles,
			refreshes = stats.refreshes,
			failures = stats.refresh_failures,
			"Polling fallback shutting down gracefully"
		);

		stats
	}

	/// One pass over the watched tables.
	pub async fn poll_once(&self, stats: &mut FallbackStats) {
		stats.cycles += 1;

		for table in &self.tables {
			if self.mux.channel_status(table) == Some(ChannelStatus::Subscribed) {
				stats.skipped_live += 1;
				continue;
			}

			debug!(table = %table, "Realtime channel not live, refreshing");
			match self.refresher.refresh(table).await {
				Ok(()) => stats.refreshes += 1,
				Err(e) => {
					stats.refresh_failures += 1;
					warn!(table = %table, error = %e, "Fallback refresh failed");
				}
			}
		}
	}
}

/// Builder for [`PollingFallback`]
pub struct PollingFallbackBuilder<P: ChannelProvider> {
	mux: Option<RealtimeMux<P>>,
	refresher: Option<Arc<dyn Refresh>>,
	tables: Vec<String>,
	interval: Duration,
	shutdown_token: Option<CancellationToken>,
}

impl<P: ChannelProvider> PollingFallbackBuilder<P> {
	#[must_use]
	pub const fn new() -> Self {
		Self {
			mux: None,
			refresher: None,
			tables: Vec::new(),
			interval: Duration::from_secs(30),
			shutdown_token: None,
		}
	}

	#[must_use]
	pub fn mux(mut self, mux: RealtimeMux<P>) -> Self {
		self.mux = Some(mux);
		self
	}

	#[must_use]
	pub fn refresher(mut self, refresher: impl Refresh) -> Self {
		self.refresher = Some(Arc::new(refresher));
		self
	}

	#[must_use]
	pub fn table(mut self, table: impl Into<String>) -> Self {
		self.tables.push(table.into());
		self
	}

	#[must_use]
	pub fn tables<I, S>(mut self, tables: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.tables.extend(tables.into_iter().map(Into::into));
		self
	}

	#[must_use]
	pub fn interval(mut self, interval: Duration) -> Self {
		self.interval = interval;
		self
	}

	#[must_use]
	pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
		self.shutdown_token = Some(token);
		self
	}

	/// # Errors
	/// Returns [`MuxError::MissingField`] when the mux, refresher or token is
	/// missing, or when no table is watched.
	pub fn build(self) -> Result<PollingFallback<P>, MuxError> {
		let mux = self.mux.ok_or(MuxError::MissingField("mux"))?;
		let refresher = self.refresher.ok_or(MuxError::MissingField("refresher"))?;
		let shutdown_token = self.shutdown_token.ok_or(MuxError::MissingField("shutdown_token"))?;
		if self.tables.is_empty() {
			return Err(MuxError::MissingField("tables"));
		}

		Ok(PollingFallback {
			mux,
			refresher,
			tables: self.tables,
			interval: if self.interval.is_zero() { Duration::from_secs(30) } else { self.interval },
			shutdown_token,
		})
	}
}

impl<P: ChannelProvider> Default for PollingFallbackBuilder<P> {
	fn default() -> Self {
		Self::new()
	}
}
