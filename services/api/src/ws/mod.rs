//! WebSocket Game Sessions
//!
//! Each connection hosts one prefetch pipeline and one quiz session:
//!
//! - `protocol`: Defines the JSON-based message format for client-server communication.
//! - `session`: Manages the WebSocket connection lifecycle, from handshake to termination.
//! - `game`: Maps client messages onto the quiz session and the pipeline.

mod game;
pub mod protocol;
pub mod session;

pub use session::ws_handler;
