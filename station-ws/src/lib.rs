//! WebSocket client used by the TC engine: HTTP Upgrade handshake, then
//! client-masked, fragmentation-free framing with ping/pong and a two-phase
//! close handshake (spec.md §4.6).

pub mod client;
pub mod proto;

pub use client::{Event, State, Ws};
pub use proto::OpCode;
