use serde::{Deserialize, Serialize};

/// Settings shared by every channel a multiplexer opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
	/// Database schema the watched tables live in
	pub schema: String,
	/// Prefix of the provider topic, `"{topic_prefix}:{table}"`
	pub topic_prefix: String,
}

impl MuxConfig {
	#[must_use]
	pub fn topic_for(&self, table: &str) -> String {
		format!("{}:{}", self.topic_prefix, table)
	}
}

impl Default for MuxConfig {
	fn default() -> Self {
		Self {
			schema: "public".to_string(),
			topic_prefix: "realtime".to_string(),
		}
	}
}
