//! Messaging abstractions shared by the runner, the router and the bridge adapter.

pub mod port;
pub mod throttled;
pub mod types;
