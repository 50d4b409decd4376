use thiserror::Error;

/// Errors returned to callers. Provider failures are never among them: they
/// are logged and routed through the channel-error policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MuxError {
	#[error("table name must not be empty")]
	InvalidTable,

	#[error("{0} is required")]
	MissingField(&'static str),
}
