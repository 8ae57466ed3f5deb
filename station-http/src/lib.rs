//! Shared half-duplex HTTP/1.1 engine: a client used by the CUPS and
//! WebSocket-upgrade engines, and a single-client embedded server used for
//! the gateway's local web UI.

pub mod client;
pub mod server;

pub use client::Client;
pub use server::Server;
