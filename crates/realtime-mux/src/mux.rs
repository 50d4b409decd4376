pub mod fallback;
pub mod guard;
pub mod multiplexer;
pub mod policy;
pub mod worker;

mod channel;
mod group;
mod registry;
