//! Rearm-able deadline, the async stand-in for the reactor's `tmr_t`
//! (`set`/`clear`/rewind-on-activity). Every engine that owns a single
//! outstanding timeout (CUPS session, WS handshake, supervisor backoff) holds
//! one of these and races it against I/O with `tokio::select!`, which is the
//! `tokio`-idiomatic equivalent of the reactor's readable/writable-vs-timer
//! dispatch.

use std::{
    pin::Pin,
    time::Duration,
};

use tokio::time::{sleep, Instant, Sleep};

pub struct Deadline {
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

impl Deadline {
    /// A deadline that never fires until `arm`/`rearm` is called.
    pub fn idle() -> Self {
        Self {
            sleep: Box::pin(sleep(Duration::from_secs(3600 * 24 * 365))),
            armed: false,
        }
    }

    pub fn armed_in(dur: Duration) -> Self {
        Self {
            sleep: Box::pin(sleep(dur)),
            armed: true,
        }
    }

    /// Rewind the deadline to fire `dur` from now (`rt_setTimer` semantics).
    pub fn rearm(&mut self, dur: Duration) {
        self.sleep.as_mut().reset(Instant::now() + dur);
        self.armed = true;
    }

    /// Cancel: the deadline will not fire (`rt_clrTimer` semantics).
    pub fn clear(&mut self) {
        self.sleep.as_mut().reset(Instant::now() + Duration::from_secs(3600 * 24 * 365));
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Await the deadline. Intended for use inside `tokio::select!` alongside
    /// I/O futures; when not armed this future simply never completes within
    /// any realistic connection lifetime.
    pub async fn elapsed(&mut self) {
        self.sleep.as_mut().await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rearm_extends_deadline() {
        let mut d = Deadline::armed_in(Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(5)).await;
        d.rearm(Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(8)).await;
        // not yet elapsed: racing against a short extra sleep should not complete `elapsed`
        let raced = tokio::select! {
            _ = d.elapsed() => "deadline",
            _ = tokio::time::sleep(Duration::from_millis(1)) => "other",
        };
        assert_eq!(raced, "other");
    }
}
