//! CUPS update-protocol engine: `POST /update-info`, then the binary
//! segment stream that carries updated URIs, credentials, and a signed
//! firmware image (spec.md §4.5). Built on `station-http::Client` for the
//! HTTP half the way the original `cups_t` embeds an `http_t`.

pub mod engine;
pub mod firmware;
pub mod session;
pub mod sig;

pub use engine::{CupsEngine, ScheduleDecision, SessionOutcome};
pub use session::{CState, Error};
