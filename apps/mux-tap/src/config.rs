use clap::Parser;
use realtime_mux::{ChangeEvent, ErrorAction};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[command(author, version, about = "Replay a change feed through the realtime multiplexer", long_about = None)]
pub struct Config {
	/// Use JSON formatting for tracing
	#[arg(long, env = "LOG_JSON", default_value = "false")]
	pub log_json: bool,

	/// Log filter directives, `info,realtime_mux=debug` when unset
	#[arg(long, env = "RUST_LOG")]
	pub rust_log: Option<String>,

	/// Database schema the watchers listen on
	#[arg(long, env = "MUX_SCHEMA", default_value = "public")]
	pub schema: String,

	/// Prefix of every channel topic
	#[arg(long, env = "MUX_TOPIC_PREFIX", default_value = "realtime")]
	pub topic_prefix: String,

	/// Watchers as `[name@]table[:EVENT[:filter]]`, repeatable
	#[arg(short, long = "watch", env = "MUX_TAP_WATCH", value_delimiter = ';', required = true)]
	pub watch: Vec<WatchSpec>,

	/// JSON-lines feed to replay; stdin when unset
	#[arg(short, long, env = "MUX_TAP_INPUT")]
	pub input: Option<PathBuf>,

	/// Leave channels connecting until the feed confirms them
	#[arg(long, env = "MUX_TAP_MANUAL_CONFIRM")]
	pub manual_confirm: bool,

	/// What happens to listeners when a channel is lost
	#[arg(long, env = "MUX_ERROR_POLICY", value_enum, default_value = "keep")]
	pub error_policy: PolicyArg,

	/// Seconds between stats log lines, 0 disables
	#[arg(long, env = "MUX_STATS_INTERVAL", default_value = "0")]
	pub stats_interval_secs: u64,

	/// Seconds between idle channel prunes
	#[arg(long, env = "MUX_PRUNE_INTERVAL", default_value = "60")]
	pub prune_interval_secs: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyArg {
	Keep,
	Reopen,
	Drop,
}

impl From<PolicyArg> for ErrorAction {
	fn from(arg: PolicyArg) -> Self {
		match arg {
			PolicyArg::Keep => Self::Keep,
			PolicyArg::Reopen => Self::Reopen,
			PolicyArg::Drop => Self::DropListeners,
		}
	}
}

impl Config {
	#[must_use]
	pub fn new() -> Self {
		Self::parse()
	}

	/// # Errors
	/// Fails on blank schema or prefix, a zero prune interval, or duplicate
	/// watcher names.
	pub fn validate(&self) -> Result<(), String> {
		if self.schema.trim().is_empty() {
			return Err("schema must not be empty".to_string());
		}
		if self.topic_prefix.trim().is_empty() {
			return Err("topic prefix must not be empty".to_string());
		}
		if self.prune_interval_secs == 0 {
			return Err("prune interval must be at least one second".to_string());
		}

		let mut names: Vec<&str> = self.watch.iter().map(|w| w.name.as_str()).collect();
		names.sort_unstable();
		if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
			return Err(format!("watcher `{}` is defined twice", pair[0]));
		}

		Ok(())
	}

	#[must_use]
	pub const fn stats_interval(&self) -> Option<Duration> {
		match self.stats_interval_secs {
			0 => None,
			secs => Some(Duration::from_secs(secs)),
		}
	}

	#[must_use]
	pub const fn prune_interval(&self) -> Duration {
		Duration::from_secs(self.prune_interval_secs)
	}
}

/// One watcher given on the command line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSpec {
	pub name: String,
	pub table: String,
	pub event: ChangeEvent,
	pub filter: Option<String>,
}

impl FromStr for WatchSpec {
	type Err = String;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		let raw = raw.trim();
		let (name, rest) = match raw.split_once('@') {
			Some((name, rest)) => (Some(name.trim()), rest),
			None => (None, raw),
		};

		let mut parts = rest.splitn(3, ':');
		let table = parts.next().map(str::trim).unwrap_or_default();
		if table.is_empty() {
			return Err(format!("watch `{raw}` has no table"));
		}

		let event = match parts.next().map(str::trim) {
			Some(event) if !event.is_empty() => event.parse::<ChangeEvent>().map_err(|e| format!("watch `{raw}`: {e}"))?,
			_ => ChangeEvent::Any,
		};
		let filter = parts.next().map(str::trim).filter(|f| !f.is_empty()).map(str::to_string);

		let name = match name {
			Some("") => return Err(format!("watch `{raw}` has an empty name")),
			Some(name) => name.to_string(),
			None => rest.trim().to_string(),
		};

		Ok(Self {
			name,
			table: table.to_string(),
			event,
			filter,
		})
	}
}

impl fmt::Display for WatchSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}@{}:{}", self.name, self.table, self.event)?;
		if let Some(filter) = &self.filter {
			write!(f, ":{filter}")?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(args: &[&str]) -> Config {
		Config::try_parse_from(std::iter::once("mux-tap").chain(args.iter().copied())).unwrap()
	}

	#[test]
	fn test_watch_spec_forms() {
		let spec: WatchSpec = "orders".parse().unwrap();
		assert_eq!(spec.name, "orders");
		assert_eq!(spec.event, ChangeEvent::Any);
		assert_eq!(spec.filter, None);

		let spec: WatchSpec = "mine@orders:insert:owner_id=eq.7".parse().unwrap();
		assert_eq!(spec.name, "mine");
		assert_eq!(spec.table, "orders");
		assert_eq!(spec.event, ChangeEvent::Insert);
		assert_eq!(spec.filter.as_deref(), Some("owner_id=eq.7"));
		assert_eq!(spec.to_string(), "mine@orders:INSERT:owner_id=eq.7");
	}

	#[test]
	fn test_watch_spec_rejects_bad_input() {
		assert!(":INSERT".parse::<WatchSpec>().is_err());
		assert!("@orders".parse::<WatchSpec>().is_err());
		assert!("orders:UPSERT".parse::<WatchSpec>().is_err());
	}

	#[test]
	fn test_defaults() {
		let config = parse(&["--watch", "orders:INSERT"]);

		assert_eq!(config.schema, "public");
		assert_eq!(config.topic_prefix, "realtime");
		assert_eq!(config.error_policy, PolicyArg::Keep);
		assert_eq!(config.stats_interval(), None);
		assert_eq!(config.prune_interval(), Duration::from_secs(60));
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_duplicate_watcher_names_fail_validation() {
		let config = parse(&["--watch", "a@orders:INSERT", "--watch", "a@orders:UPDATE"]);
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_watch_list_uses_semicolons() {
		let config = parse(&["--watch", "a@orders:*:status=in.(paid,refunded);b@payments"]);

		assert_eq!(config.watch.len(), 2);
		assert_eq!(config.watch[0].filter.as_deref(), Some("status=in.(paid,refunded)"));
		assert_eq!(ErrorAction::from(PolicyArg::Drop), ErrorAction::DropListeners);
	}
}
