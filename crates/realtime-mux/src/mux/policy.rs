use realtime_provider::ChannelStatus;
use tracing::warn;

/// Details of a channel the multiplexer just dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFailure {
	pub table: String,
	pub topic: String,
	pub status: ChannelStatus,
	pub reason: Option<String>,
	pub generation: u64,
}

/// What to do with a table's listener groups after its channel was lost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorAction {
	/// Keep the groups; they are re-attached when the next subscription for
	/// the table opens a new channel.
	#[default]
	Keep,
	/// Open a replacement channel right away and re-attach the groups.
	Reopen,
	/// Remove every group and registration for the table.
	DropListeners,
}

/// Hook consulted whenever a channel errors, times out or is closed remotely.
///
/// Runs outside the multiplexer's lock, so it may call back into the
/// multiplexer (for example to read stats).
pub trait ChannelErrorPolicy: Send + Sync + 'static {
	fn on_channel_error(&self, failure: &ChannelFailure) -> ErrorAction;
}

impl<F> ChannelErrorPolicy for F
where
	F: Fn(&ChannelFailure) -> ErrorAction + Send + Sync + 'static,
{
	fn on_channel_error(&self, failure: &ChannelFailure) -> ErrorAction {
		self(failure)
	}
}

/// Default policy: log and keep listener groups for the next subscription.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAndDrop;

impl ChannelErrorPolicy for LogAndDrop {
	fn on_channel_error(&self, failure: &ChannelFailure) -> ErrorAction {
		warn!(
			table = %failure.table,
			status = %failure.status,
			"No realtime events for table until it is subscribed again; callers should poll"
		);
		ErrorAction::Keep
	}
}
