//! Global configuration, CLI surface, and credential/signing-key storage
//! (spec.md §3, §4.8, §6).

pub mod cli;
pub mod config;
pub mod creds;
pub mod eui;
pub mod sigkeys;

pub use cli::Cli;
pub use config::{Config, ConfigError, Pps, Provenance, Sourced};
pub use creds::{Category, CredError, CredSet, CredentialStore, Slot};
pub use eui::Eui;
pub use sigkeys::SigKeyStore;
