//! The CUPS session loop: run one session, act on its `ScheduleDecision`,
//! sleep, repeat (spec.md §4.5, grounded on `cups_start`'s re-arm of its own
//! timer from inside `cups_ondone` in the original).

use std::rc::Rc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::context::Station;

/// Runs until the process exits; `--no-cups` degrades to an idle sleep loop
/// so the worker still holds the `LocalSet` open with a live task.
pub async fn run(station: Rc<Station>, restart_tc: Rc<Notify>) {
    if station.config.no_cups {
        tracing::info!("CUPS disabled (--no-cups)");
        std::future::pending::<()>().await;
        return;
    }

    loop {
        let tc_connected = *station.tc_connected.subscribe().borrow();
        let router_eui = station.config.router_eui.value.map(|e| e.as_u64()).unwrap_or(0);

        let (outcome, decision) = {
            let mut creds = station.creds.borrow_mut();
            let mut cups = station.cups.borrow_mut();
            cups.run_session(
                &mut creds,
                &station.sigkeys,
                router_eui,
                &station.config.station_version,
                &station.config.model,
                &station.config.package_version,
                tc_connected,
            )
            .await
        };

        if outcome.failed {
            tracing::warn!(uflags = outcome.uflags, "CUPS session failed");
        } else {
            tracing::info!(uflags = outcome.uflags, "CUPS session completed");
        }

        if decision.restart_tc {
            restart_tc.notify_one();
        }

        sleep_or_zero(decision.next_session_in).await;
    }
}

async fn sleep_or_zero(dur: Duration) {
    if dur.is_zero() {
        return;
    }
    tokio::time::sleep(dur).await;
}
