//! HTTP/1.1 client state machine driven by a [`ConnBuf`]: `connect`, send a
//! pre-built request, read the header up to `\r\n\r\n`, then stream the body
//! in buffer-sized chunks. One outstanding request per client, matching the
//! "at most one outstanding HTTP request per HTTP client" invariant.

use std::{fmt, io, time::Duration};

use socket2::{SockRef, TcpKeepalive};
use station_io::{tls::MaybeTlsStream, ConnBuf};
use tokio::net::TcpStream;

/// Matches the teacher's `TcpKeepalive::new().with_time(..)` defaults
/// (`socket2::{SockRef, TcpKeepalive}` via `examples/HFQR-xitca-web/http/src/util/tcp_config.rs`),
/// picked since the original has no configurable keepalive knobs of its own.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Connected,
    SendingReq,
    ReadingHdr,
    ReadingBody,
}

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    Io(io::Error),
    /// No `\r\n\r\n` found before the header buffer filled up.
    HeaderTooLarge,
    /// Status line did not parse as `HTTP/1.x NNN ...`.
    BadStatusLine,
    /// Peer closed before a complete header was read.
    ClosedDuringHeader,
    /// `set_content_length`'s embedded zero-run was too short for the value.
    ContentLengthFieldTooShort,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Outcome of a `read_header` / `read_body` step, surfaced to the owning
/// engine (CUPS, or any future HTTP consumer) as the `HTTPEV_*` family from
/// the networking substrate this crate mirrors.
#[derive(Debug)]
pub enum Event<'a> {
    Connected,
    /// Header fully parsed; status code and declared content length given.
    Header { status: u16 },
    /// A chunk of body bytes, `coff`/`clen` report stream progress.
    Response { data: &'a [u8], coff: u64, clen: i64 },
    Closed,
}

pub struct Client<T> {
    io: MaybeTlsStream<T>,
    buf: ConnBuf,
    state: State,
    clen: i64,
    coff: u64,
    status: u16,
    raw_header: Vec<u8>,
}

const HOST_RESERVE: usize = 256;

impl Client<TcpStream> {
    pub async fn connect(host: &str, port: u16, rbufsize: usize, wbufsize: usize) -> Result<Self, Error> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true).ok();
        SockRef::from(&stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_IDLE)).ok();
        Self::from_parts(MaybeTlsStream::plain(stream), host, port, rbufsize, wbufsize)
    }
}

impl<T> Client<T>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    pub fn from_tls(io: MaybeTlsStream<T>, host: &str, port: u16, rbufsize: usize, wbufsize: usize) -> Result<Self, Error> {
        Self::from_parts(io, host, port, rbufsize, wbufsize)
    }

    fn from_parts(io: MaybeTlsStream<T>, host: &str, port: u16, rbufsize: usize, wbufsize: usize) -> Result<Self, Error> {
        let mut buf = ConnBuf::new(rbufsize, wbufsize);
        // Reserve "host:port\0" at the front of the send window so request
        // templates can read it back when building a Host header.
        let hostport = format!("{host}:{port}");
        let slot = buf.reserve_send(HOST_RESERVE).ok_or(Error::HeaderTooLarge)?;
        slot[..hostport.len()].copy_from_slice(hostport.as_bytes());
        slot[hostport.len()] = 0;
        Ok(Self {
            io,
            buf,
            state: State::Connected,
            clen: -1,
            coff: 0,
            status: 0,
            raw_header: Vec::new(),
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// The reserved `"host:port"` prefix written by `connect`.
    pub fn hostport(&mut self) -> &str {
        let slot = self.buf.send_slice_at(0);
        let nul = slot.iter().position(|&b| b == 0).unwrap_or(0);
        std::str::from_utf8(&slot[..nul]).unwrap_or("")
    }

    /// Reserve room in the send buffer for the caller to write a request into
    /// (starting after the reserved host:port prefix).
    pub fn reserve_request(&mut self, min: usize) -> Option<&mut [u8]> {
        self.buf.reserve_send(min)
    }

    pub fn commit_request(&mut self, len: usize) {
        self.buf.commit_send(len);
    }

    /// Send the request written via `reserve_request`/`commit_request`, then
    /// read the response header. Returns once `\r\n\r\n` has been seen and the
    /// status/content-length are known.
    pub async fn request(&mut self) -> Result<u16, Error>
    where
        T: Unpin,
    {
        self.buf.mark_frame_ready();
        self.state = State::SendingReq;
        loop {
            match self.buf.drain(&mut self.io).await? {
                station_io::WriteOutcome::Done => break,
                station_io::WriteOutcome::Pending => continue,
            }
        }
        self.buf.reset_recv();
        self.state = State::ReadingHdr;
        self.read_header().await
    }

    async fn read_header(&mut self) -> Result<u16, Error> {
        loop {
            if let Some(split) = find_crlf_crlf(self.buf.recv_window()) {
                self.buf.set_rend(self.buf.rbeg() + split);
                let header = self.buf.recv_frame().to_vec();
                let (status, clen) = parse_header(&header)?;
                self.status = status;
                self.clen = clen;
                self.coff = 0;
                self.raw_header = header;
                self.buf.consume_frame();
                self.buf.start_new_frame();
                self.state = State::ReadingBody;
                return Ok(status);
            }
            if self.buf.recv_remaining_capacity() == 0 {
                return Err(Error::HeaderTooLarge);
            }
            let n = self.buf.fill(&mut self.io).await?;
            if n == 0 {
                return Err(Error::ClosedDuringHeader);
            }
        }
    }

    /// Read the next chunk of body, bounded by `min(clen - coff, buffer
    /// space)`. Returns `None` once the declared length has been fully
    /// consumed (or immediately, for a bodyless response). Returns an owned
    /// copy of the chunk: the underlying window is reused by the next call,
    /// so borrowing it across calls would fight the buffer's own cursor
    /// discipline.
    pub async fn read_body(&mut self) -> Result<Option<Vec<u8>>, Error> {
        if self.clen >= 0 && self.coff >= self.clen as u64 {
            self.state = State::Connected;
            return Ok(None);
        }
        self.buf.start_new_frame();
        loop {
            let window = self.buf.recv_window().len();
            let want = if self.clen >= 0 {
                (self.clen as u64 - self.coff) as usize
            } else {
                usize::MAX
            };
            let ready = window > 0 && (want == usize::MAX || window >= 1);
            if ready && (window > 0) {
                let take = window.min(want.max(1));
                if take > 0 {
                    self.buf.set_rend(self.buf.rbeg() + take);
                    self.coff += take as u64;
                    let chunk = self.buf.recv_frame().to_vec();
                    self.buf.consume_frame();
                    return Ok(Some(chunk));
                }
            }
            if self.buf.recv_remaining_capacity() == 0 {
                return Err(Error::HeaderTooLarge);
            }
            let n = self.buf.fill(&mut self.io).await?;
            if n == 0 {
                if self.clen < 0 {
                    self.state = State::Connected;
                    return Ok(None);
                }
                return Err(Error::ClosedDuringHeader);
            }
        }
    }

    pub fn content_length(&self) -> i64 {
        self.clen
    }

    /// Look up a response header by name (case-insensitive), as needed for
    /// `Sec-WebSocket-Accept` during the WS upgrade handshake.
    pub fn header(&self, name: &str) -> Option<&str> {
        let text = std::str::from_utf8(&self.raw_header).ok()?;
        for line in text.split("\r\n").skip(1) {
            if let Some((key, value)) = line.split_once(':') {
                if key.trim().eq_ignore_ascii_case(name) {
                    return Some(value.trim());
                }
            }
        }
        None
    }

    pub fn body_offset(&self) -> u64 {
        self.coff
    }

    pub async fn close(&mut self) {
        self.state = State::Closed;
    }

    /// Hand the underlying (possibly TLS-wrapped) stream over to a higher
    /// layer, as the WS client does after a successful Upgrade handshake.
    pub fn into_io(self) -> MaybeTlsStream<T> {
        self.io
    }
}

fn find_crlf_crlf(window: &[u8]) -> Option<usize> {
    window
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn parse_header(header: &[u8]) -> Result<(u16, i64), Error> {
    let text = std::str::from_utf8(header).map_err(|_| Error::BadStatusLine)?;
    let mut lines = text.split("\r\n");
    let status_line = lines.next().ok_or(Error::BadStatusLine)?;
    let status = parse_status_line(status_line)?;

    let mut clen: i64 = -1;
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                clen = value.trim().parse::<i64>().map_err(|_| Error::BadStatusLine)?;
            }
        }
    }
    Ok((status, clen))
}

fn parse_status_line(line: &str) -> Result<u16, Error> {
    // "HTTP/1.1 200 OK"
    let mut parts = line.splitn(3, ' ');
    let _version = parts.next().ok_or(Error::BadStatusLine)?;
    let code = parts.next().ok_or(Error::BadStatusLine)?;
    code.parse::<u16>().map_err(|_| Error::BadStatusLine)
}

/// Write-once helper: overwrite an embedded `"Content-Length: 00000\r\n"`
/// zero-run with the decimal value of `n`, left-padding with spaces. Fails if
/// the zero-run is too short to hold `n`.
pub fn set_content_length(buf: &mut [u8], n: usize) -> Result<(), Error> {
    let needle = b"Content-Length: ";
    let pos = buf
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
        .ok_or(Error::ContentLengthFieldTooShort)?;
    let start = pos + needle.len();
    let mut end = start;
    while buf.get(end) == Some(&b'0') {
        end += 1;
    }
    let width = end - start;
    let digits = n.to_string();
    if digits.len() > width {
        return Err(Error::ContentLengthFieldTooShort);
    }
    let pad = width - digits.len();
    for b in &mut buf[start..start + pad] {
        *b = b' ';
    }
    buf[start + pad..end].copy_from_slice(digits.as_bytes());
    Ok(())
}

/// Read back a `Content-Length` value previously written by
/// `set_content_length`, for the round-trip testable property (spec.md §8.5).
pub fn find_content_length(buf: &[u8]) -> Option<usize> {
    let needle = b"Content-Length: ";
    let pos = buf.windows(needle.len()).position(|w| w.eq_ignore_ascii_case(needle))?;
    let start = pos + needle.len();
    let mut end = start;
    while buf.get(end).is_some_and(|b| b.is_ascii_digit() || *b == b' ') {
        end += 1;
    }
    std::str::from_utf8(&buf[start..end]).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn content_length_round_trips() {
        let mut req = b"POST /update-info HTTP/1.1\r\nContent-Length: 00000\r\n\r\n".to_vec();
        set_content_length(&mut req, 742).unwrap();
        assert_eq!(find_content_length(&req), Some(742));
    }

    #[test]
    fn content_length_rejects_oversize_value() {
        let mut req = b"Content-Length: 00\r\n".to_vec();
        assert!(set_content_length(&mut req, 12345).is_err());
    }

    #[test]
    fn parses_status_and_content_length() {
        let header = b"HTTP/1.1 200 OK\r\nContent-Length: 17\r\nServer: x\r\n\r\n";
        let (status, clen) = parse_header(header).unwrap();
        assert_eq!(status, 200);
        assert_eq!(clen, 17);
    }

    #[test]
    fn missing_content_length_means_no_body() {
        let header = b"HTTP/1.1 204 No Content\r\n\r\n";
        let (status, clen) = parse_header(header).unwrap();
        assert_eq!(status, 204);
        assert_eq!(clen, -1);
    }

    #[test]
    fn find_crlf_crlf_locates_header_end() {
        let window = b"HTTP/1.1 200 OK\r\n\r\nbody-bytes";
        assert_eq!(find_crlf_crlf(window), Some(19));
    }
}
