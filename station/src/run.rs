//! Worker-process entry point: runs entirely inside a `tokio::LocalSet` on a
//! single OS thread, the post-`fork` half of the daemon/worker split
//! (spec.md §5 "Concurrency model", grounded on `worker::run` in
//! `examples/HFQR-xitca-web/server/src/worker/mod.rs`). Exits with
//! `128 + signum` on `SIGINT`/`SIGTERM`, matching `handle_signal` in the
//! original.

use std::path::PathBuf;
use std::rc::Rc;

use station_config::{Config, CredentialStore, SigKeyStore};
use station_supervisor::signals::Signals;

use crate::context::Station;
use crate::{cups_task, tc_task, web_task};

pub async fn worker_main(config: Config) -> i32 {
    let temp_dir = config.temp_dir.value.clone();

    if let Err(e) = station_supervisor::update::run_pending(&temp_dir.join("update.bin")) {
        tracing::error!(error = %e, "firmware self-update dispatch failed");
    }

    let creds = CredentialStore::load(config.home_dir.value.clone());
    let sigkeys = load_sigkeys(&config.home_dir.value).await;

    let station = Rc::new(Station::new(config, creds, sigkeys));
    let restart_tc = Rc::new(tokio::sync::Notify::new());

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            tokio::task::spawn_local(cups_task::run(station.clone(), restart_tc.clone()));
            tokio::task::spawn_local(tc_task::run(station.clone(), restart_tc));
            tokio::task::spawn_local(web_task::run(station));

            match Signals::install() {
                Ok(signals) => signals.await.exit_code(),
                Err(e) => {
                    tracing::error!(error = %e, "failed to install signal handlers");
                    station_supervisor::FATAL_GENERIC
                }
            }
        })
        .await
}

async fn load_sigkeys(home_dir: &std::path::Path) -> SigKeyStore {
    let path: PathBuf = home_dir.join("sig.key");
    match SigKeyStore::load(&path).await {
        Ok(store) => store,
        Err(e) => {
            tracing::debug!(error = %e, "no firmware signing keys loaded");
            SigKeyStore::empty()
        }
    }
}
