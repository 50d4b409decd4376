//! Replays a JSON-lines change feed through a [`realtime_mux::RealtimeMux`]
//! backed by the in-memory provider and prints what each watcher receives.

pub mod config;
pub mod feed;
pub mod service;

pub use config::{Config, PolicyArg, WatchSpec};
pub use feed::{write_output, FeedLine, FeedStatus, StatusLine, TapOutput};
pub use service::{TapService, TapStats};
