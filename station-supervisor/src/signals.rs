//! Process signal handling, grounded directly on
//! `examples/HFQR-xitca-web/server/src/signals.rs`'s `Signals` future:
//! `SIGHUP` is ignored (the original installs `SIG_IGN`), `SIGINT`/`SIGTERM`
//! each resolve to an exit code of `128 + signum` (spec.md §6), matching
//! `handle_signal` in `examples/original_source/src-linux/sys_linux.c`.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::signal::unix::{self, SignalKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Int,
    Term,
}

impl Signal {
    /// `128 + signum`, the shell-convention exit code `handle_signal` uses.
    pub fn exit_code(self) -> i32 {
        128 + match self {
            Self::Int => libc_signum::SIGINT,
            Self::Term => libc_signum::SIGTERM,
        }
    }
}

/// Avoids a direct `libc` dependency for two well-known constant values.
mod libc_signum {
    pub const SIGINT: i32 = 2;
    pub const SIGTERM: i32 = 15;
}

pub struct Signals {
    int: unix::Signal,
    term: unix::Signal,
    /// Kept open and never polled for data; its only job is to swallow
    /// `SIGHUP` so the default action (terminate) never fires.
    _hup: unix::Signal,
}

impl Signals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            int: unix::signal(SignalKind::interrupt())?,
            term: unix::signal(SignalKind::terminate())?,
            _hup: unix::signal(SignalKind::hangup())?,
        })
    }
}

impl Future for Signals {
    type Output = Signal;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.int.poll_recv(cx).is_ready() {
            return Poll::Ready(Signal::Int);
        }
        if self.term.poll_recv(cx).is_ready() {
            return Poll::Ready(Signal::Term);
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exit_codes_follow_128_plus_signum() {
        assert_eq!(Signal::Int.exit_code(), 130);
        assert_eq!(Signal::Term.exit_code(), 143);
    }
}
