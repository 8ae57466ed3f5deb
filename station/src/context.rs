//! Shared worker state (spec.md §9 "Global mutable state" redesign note: a
//! single context struct in place of the original's scattered file-scope
//! globals). One `Station` is constructed per worker process and handed to
//! every task spawned on the `LocalSet`; nothing here is `Send`, which is
//! fine since the worker never leaves its single OS thread.

use std::cell::RefCell;
use std::path::PathBuf;

use station_config::{Config, CredentialStore, SigKeyStore};
use station_cups::CupsEngine;

pub struct Station {
    pub config: Config,
    pub creds: RefCell<CredentialStore>,
    pub sigkeys: SigKeyStore,
    pub cups: RefCell<CupsEngine>,
    /// Observed by the CUPS loop for scheduling, written by the TC loop.
    pub tc_connected: tokio::sync::watch::Sender<bool>,
}

impl Station {
    pub fn new(config: Config, creds: CredentialStore, sigkeys: SigKeyStore) -> Self {
        let (tc_connected, _rx) = tokio::sync::watch::channel(false);
        Self {
            config,
            creds: RefCell::new(creds),
            sigkeys,
            cups: RefCell::new(CupsEngine::new()),
            tc_connected,
        }
    }

    pub fn home_dir(&self) -> PathBuf {
        self.config.home_dir.value.clone()
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.config.temp_dir.value.clone()
    }
}
