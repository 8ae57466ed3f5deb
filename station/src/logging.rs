//! `tracing-subscriber` setup driven by the resolved `log_level` (spec.md §6:
//! `0..7`, syslog-style severity where higher is more verbose). No file/size/
//! rotation backend is wired up yet; `--log-file` is accepted and resolved by
//! `station-config` but only ever reaches `EnvFilter` here, matching the
//! rest of this crate's "ambient stack, minimal policy" approach to logging.

use tracing_subscriber::EnvFilter;

/// Map the syslog-style `0..7` level onto a `tracing` level. `RUST_LOG`, if
/// set, still wins (`EnvFilter::from_default_env` falls back to our derived
/// directive only when the variable is absent).
pub fn init(log_level: u8) {
    let level = match log_level {
        0..=3 => "error",
        4 => "warn",
        5 => "info",
        6 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}
