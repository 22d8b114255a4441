//! WebSocket relay
//!
//! - `protocol`: message shapes on both links.
//! - `bridge`: the transport-free `ConnectionPair` state machine.
//! - `upstream`: opening the link to the realtime service.
//! - `session`: the axum upgrade handler and the per-connection driver loop.

pub mod bridge;
pub mod protocol;
mod session;
pub mod upstream;

pub use session::ws_handler;
