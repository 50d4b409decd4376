//! JSON-lines records read from and written by the tap.

use realtime_mux::{ChangeEvent, ChangePayload};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// One input line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedLine {
	Change(ChangePayload),
	Status(StatusLine),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLine {
	pub table: String,
	pub status: FeedStatus,
	#[serde(default)]
	pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
	Subscribed,
	Error,
	Timeout,
	Closed,
}

/// One fanned-out change, tagged with the watcher that received it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapOutput {
	pub watcher: String,
	pub table: String,
	pub event: ChangeEvent,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub commit_timestamp: Option<String>,
	pub record: serde_json::Value,
}

impl TapOutput {
	#[must_use]
	pub fn new(watcher: &str, payload: &ChangePayload) -> Self {
		Self {
			watcher: watcher.to_string(),
			table: payload.table.clone(),
			event: payload.event_type,
			commit_timestamp: payload.commit_timestamp.clone(),
			record: payload.record().clone(),
		}
	}
}

/// Writes every output as one JSON line until all senders are dropped.
/// Returns the number of lines written.
///
/// # Errors
/// Fails when the writer does.
pub async fn write_output<W>(mut rx: mpsc::UnboundedReceiver<TapOutput>, mut writer: W) -> anyhow::Result<u64>
where
	W: AsyncWrite + Unpin,
{
	let mut written = 0;
	while let Some(output) = rx.recv().await {
		let mut line = serde_json::to_vec(&output)?;
		line.push(b'\n');
		writer.write_all(&line).await?;
		written += 1;

		if rx.is_empty() {
			writer.flush().await?;
		}
	}

	writer.flush().await?;
	Ok(written)
}
