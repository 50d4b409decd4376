use crate::filter::FilterError;

/// Provider-agnostic error type
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
	/// The channel was closed locally or by the remote side
	#[error("Channel {0} is closed")]
	ChannelClosed(String),

	/// The handle does not refer to a channel this provider knows about
	#[error("Channel {0} not found")]
	ChannelNotFound(String),

	/// The provider refused to open a channel or register a listener
	#[error("Provider rejected request: {0}")]
	Rejected(String),

	/// Unrecognised change event name
	#[error("Unknown change event: {0}")]
	UnknownEvent(String),

	/// Malformed row filter
	#[error("Invalid filter: {0}")]
	Filter(#[from] FilterError),
}

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;
