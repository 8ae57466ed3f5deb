//! Shared networking substrate: connection buffer windows, TLS adapter, and
//! deadline timers. Every higher-level engine (HTTP client/server, WebSocket,
//! CUPS) is built as a state machine driven by this crate's primitives.

pub mod buf;
pub mod timer;
pub mod tls;

pub use buf::{ConnBuf, WriteOutcome};
pub use timer::Deadline;
pub use tls::MaybeTlsStream;
