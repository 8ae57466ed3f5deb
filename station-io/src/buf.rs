//! Shared connection buffer: one fixed-capacity recv window and one
//! fixed-capacity send window, with the explicit cursor discipline described
//! by the networking substrate this crate implements:
//!
//! recv: `0 <= rbeg <= rend <= rpos <= rbufsize`
//! send: `0 <= wpos <= wend <= wfill <= wbufsize`
//!
//! `rend` marks the end of the frame currently being consumed (a header, or
//! the slice of body bytes delivered so far); `rbeg` is where that frame
//! started; `rpos` is where the next socket read appends. On the send side
//! `wfill` is where the producer appends the next outgoing frame, `wend` is
//! the end of the frame currently being drained to the socket, and `wpos` is
//! the next unsent byte.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Outcome of draining the send window to a socket.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// `[wpos, wend)` fully flushed.
    Done,
    /// Socket would block; caller should register interest and retry.
    Pending,
}

pub struct ConnBuf {
    rbuf: BytesMut,
    rbufsize: usize,
    rbeg: usize,
    rend: usize,
    rpos: usize,

    wbuf: BytesMut,
    wbufsize: usize,
    wpos: usize,
    wend: usize,
    wfill: usize,
}

impl ConnBuf {
    pub fn new(rbufsize: usize, wbufsize: usize) -> Self {
        let mut rbuf = BytesMut::with_capacity(rbufsize);
        rbuf.resize(rbufsize, 0);
        let mut wbuf = BytesMut::with_capacity(wbufsize);
        wbuf.resize(wbufsize, 0);
        Self {
            rbuf,
            rbufsize,
            rbeg: 0,
            rend: 0,
            rpos: 0,
            wbuf,
            wbufsize,
            wpos: 0,
            wend: 0,
            wfill: 0,
        }
    }

    pub fn check_invariants(&self) {
        debug_assert!(self.rbeg <= self.rend);
        debug_assert!(self.rend <= self.rpos);
        debug_assert!(self.rpos <= self.rbufsize);
        debug_assert!(self.wpos <= self.wend);
        debug_assert!(self.wend <= self.wfill);
        debug_assert!(self.wfill <= self.wbufsize);
    }

    // ---- recv side ----

    pub fn rbeg(&self) -> usize {
        self.rbeg
    }

    pub fn rend(&self) -> usize {
        self.rend
    }

    pub fn rpos(&self) -> usize {
        self.rpos
    }

    pub fn set_rend(&mut self, rend: usize) {
        debug_assert!(rend <= self.rpos);
        self.rend = rend;
    }

    /// Bytes currently buffered in the active frame window `[rbeg, rpos)`.
    pub fn recv_window(&self) -> &[u8] {
        &self.rbuf[self.rbeg..self.rpos]
    }

    /// Bytes of the completed frame `[rbeg, rend)`.
    pub fn recv_frame(&self) -> &[u8] {
        &self.rbuf[self.rbeg..self.rend]
    }

    pub fn recv_remaining_capacity(&self) -> usize {
        self.rbufsize - self.rpos
    }

    /// Consume the completed frame: `rbeg` jumps to `rend`.
    pub fn consume_frame(&mut self) {
        self.rbeg = self.rend;
    }

    /// Drop everything consumed so far and start scanning for a fresh frame
    /// at the current fill position (used when switching from header mode to
    /// body mode, or between requests on a keep-alive connection).
    pub fn start_new_frame(&mut self) {
        self.rbeg = self.rpos;
        self.rend = self.rpos;
    }

    /// Shift `[rbeg, rpos)` down to the start of the buffer, freeing space at
    /// the tail. Used when a WS frame header does not yet fit in the
    /// remaining capacity.
    pub fn compact_recv(&mut self) {
        if self.rbeg == 0 {
            return;
        }
        let len = self.rpos - self.rbeg;
        self.rbuf.copy_within(self.rbeg..self.rpos, 0);
        self.rend -= self.rbeg;
        self.rpos = len;
        self.rbeg = 0;
    }

    /// Read one chunk from `io` into the recv window, advancing `rpos`.
    /// Returns `Ok(0)` on EOF.
    pub async fn fill<R: AsyncRead + Unpin>(&mut self, io: &mut R) -> io::Result<usize> {
        if self.recv_remaining_capacity() == 0 {
            return Ok(0);
        }
        let n = io.read(&mut self.rbuf[self.rpos..self.rbufsize]).await?;
        self.rpos += n;
        Ok(n)
    }

    pub fn reset_recv(&mut self) {
        self.rbeg = 0;
        self.rend = 0;
        self.rpos = 0;
    }

    // ---- send side ----

    pub fn wpos(&self) -> usize {
        self.wpos
    }

    pub fn wend(&self) -> usize {
        self.wend
    }

    pub fn wfill(&self) -> usize {
        self.wfill
    }

    pub fn send_remaining_capacity(&self) -> usize {
        self.wbufsize - self.wfill
    }

    /// Reserve a writable region of at least `min` bytes starting at `wfill`,
    /// for the producer (HTTP request encoder, WS frame encoder) to fill in
    /// place. Returns `None` if there isn't enough room.
    pub fn reserve_send(&mut self, min: usize) -> Option<&mut [u8]> {
        if self.send_remaining_capacity() < min {
            return None;
        }
        let start = self.wfill;
        Some(&mut self.wbuf[start..self.wbufsize])
    }

    pub fn send_slice_at(&mut self, offset: usize) -> &mut [u8] {
        &mut self.wbuf[offset..self.wbufsize]
    }

    /// Commit `len` bytes written by the producer at `wfill`, advancing it.
    pub fn commit_send(&mut self, len: usize) {
        self.wfill += len;
        debug_assert!(self.wfill <= self.wbufsize);
    }

    /// Mark the currently committed region as one outgoing frame, ready to
    /// drain. Frames are pipelined: `wend` only ever catches up to `wfill`,
    /// it is never set backwards.
    pub fn mark_frame_ready(&mut self) {
        self.wend = self.wfill;
    }

    pub fn has_pending_send(&self) -> bool {
        self.wpos < self.wend || self.wend < self.wfill
    }

    /// Drain `[wpos, wend)` to `io`. Returns `Done` once fully flushed.
    pub async fn drain<W: AsyncWrite + Unpin>(&mut self, io: &mut W) -> io::Result<WriteOutcome> {
        while self.wpos < self.wend {
            let n = io.write(&self.wbuf[self.wpos..self.wend]).await?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero));
            }
            self.wpos += n;
        }
        io.flush().await?;
        if self.wend < self.wfill {
            // more frames queued behind this one
            self.wend = self.wfill;
            return Ok(WriteOutcome::Pending);
        }
        self.reset_send();
        Ok(WriteOutcome::Done)
    }

    pub fn reset_send(&mut self) {
        self.wpos = 0;
        self.wend = 0;
        self.wfill = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invariants_hold_after_fresh_alloc() {
        let buf = ConnBuf::new(256, 256);
        buf.check_invariants();
    }

    #[test]
    fn compact_recv_shifts_window_to_zero() {
        let mut buf = ConnBuf::new(16, 16);
        buf.rbuf[0..8].copy_from_slice(b"12345678");
        buf.rpos = 8;
        buf.rbeg = 4;
        buf.rend = 6;
        buf.compact_recv();
        assert_eq!(buf.rbeg, 0);
        assert_eq!(buf.rend, 2);
        assert_eq!(buf.rpos, 4);
        assert_eq!(&buf.rbuf[0..4], b"5678");
    }

    #[tokio::test]
    async fn fill_advances_rpos() {
        let mut buf = ConnBuf::new(16, 16);
        let mut src: &[u8] = b"hello";
        let n = buf.fill(&mut src).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(buf.rpos(), 5);
        assert_eq!(&buf.recv_window()[..5], b"hello");
    }

    #[tokio::test]
    async fn drain_reports_pending_when_more_frames_queued() {
        let mut buf = ConnBuf::new(16, 16);
        buf.reserve_send(5).unwrap()[..5].copy_from_slice(b"first");
        buf.commit_send(5);
        buf.mark_frame_ready();
        buf.reserve_send(6).unwrap()[..6].copy_from_slice(b"second");
        buf.commit_send(6);

        let mut sink = Vec::new();
        let outcome = buf.drain(&mut sink).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Pending);
        assert_eq!(sink, b"first");

        let outcome = buf.drain(&mut sink).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Done);
        assert_eq!(sink, b"firstsecond");
    }
}
