//! Bot layer: command routing and handlers, the session runner and the HTTP
//! surface. Adapters for the ports live in `wab-bridge` and `wab-media`.

pub mod handlers;
pub mod http;
pub mod router;
pub mod runner;

#[cfg(test)]
mod testing;

pub use router::{AppState, MediaServices, RouteTable};
pub use runner::{Runner, RunnerConfig, RunnerExit};
