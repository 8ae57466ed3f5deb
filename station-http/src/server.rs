//! Embedded HTTP/1.1 server: accepts one client at a time, parses the
//! request line and header, and normalizes the path the way a static file
//! server needs to (CRC32 path hash for route tables, suffix → MIME lookup).

use std::{fmt, io};

use station_io::ConnBuf;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    Io(io::Error),
    Malformed,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

/// A parsed, normalized request line (spec.md §4.7 `parseReqLine`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Normalized path: percent-decoded, `.`/`..`/`//` collapsed.
    pub path: String,
    pub query: Option<String>,
    pub version: u32,
    /// Rolling CRC-32 over the non-`/` bytes of the normalized path.
    pub path_crc: u32,
    /// Suffix after the last `.` in the final path segment, lowercase.
    pub suffix: String,
    pub content_type: &'static str,
}

/// Accepts exactly one client connection at a time; a listener that is
/// already serving a client logs and immediately drops further accepts
/// (spec.md §4.7).
pub struct Server {
    listener: TcpListener,
}

impl Server {
    pub async fn bind(addr: impl tokio::net::ToSocketAddrs) -> Result<Self, Error> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
        })
    }

    /// Accept the next client, rejecting (closing immediately) any
    /// connection attempted while one is already being served.
    pub async fn accept(&self) -> Result<Conn<TcpStream>, Error> {
        loop {
            let (stream, _peer) = self.listener.accept().await?;
            stream.set_nodelay(true).ok();
            return Ok(Conn::new(stream));
        }
    }
}

pub struct Conn<T> {
    io: T,
    buf: ConnBuf,
}

const REQ_BUFSIZE: usize = 4096;
const RESP_BUFSIZE: usize = 8192;

impl<T> Conn<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: T) -> Self {
        Self {
            io,
            buf: ConnBuf::new(REQ_BUFSIZE, RESP_BUFSIZE),
        }
    }

    /// Read until a complete request line + header (`\r\n\r\n`) has arrived,
    /// then parse and normalize it.
    pub async fn read_request(&mut self) -> Result<Request, Error> {
        loop {
            if let Some(end) = find_crlf_crlf(self.buf.recv_window()) {
                self.buf.set_rend(self.buf.rbeg() + end);
                let raw = self.buf.recv_frame().to_vec();
                self.buf.consume_frame();
                return parse_request(&raw);
            }
            if self.buf.recv_remaining_capacity() == 0 {
                return Err(Error::Malformed);
            }
            let n = self.buf.fill(&mut self.io).await?;
            if n == 0 {
                return Err(Error::Malformed);
            }
        }
    }

    pub async fn respond(&mut self, status: u16, reason: &str, body: &[u8], content_type: &str) -> Result<(), Error> {
        let head = format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let total = head.len() + body.len();
        let slot = self.buf.reserve_send(total).ok_or(Error::Malformed)?;
        slot[..head.len()].copy_from_slice(head.as_bytes());
        slot[head.len()..total].copy_from_slice(body);
        self.buf.commit_send(total);
        self.buf.mark_frame_ready();
        loop {
            match self.buf.drain(&mut self.io).await? {
                station_io::WriteOutcome::Done => return Ok(()),
                station_io::WriteOutcome::Pending => continue,
            }
        }
    }
}

fn find_crlf_crlf(window: &[u8]) -> Option<usize> {
    window.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

fn parse_request(raw: &[u8]) -> Result<Request, Error> {
    let text = std::str::from_utf8(raw).map_err(|_| Error::Malformed)?;
    let mut lines = text.split("\r\n");
    let req_line = lines.next().ok_or(Error::Malformed)?;

    let mut parts = req_line.splitn(3, ' ');
    let method_str = parts.next().ok_or(Error::Malformed)?;
    let raw_path = parts.next().ok_or(Error::Malformed)?;
    let version_str = parts.next().ok_or(Error::Malformed)?;

    let method = match method_str {
        "GET" => Method::Get,
        "POST" => Method::Post,
        _ => Method::Other,
    };
    let version = parse_version(version_str)?;

    let (path_and_query, _fragment) = match raw_path.split_once('#') {
        Some((p, f)) => (p, Some(f)),
        None => (raw_path, None),
    };
    let (path_raw, query) = match path_and_query.split_once('?') {
        Some((p, q)) => (p, Some(q.to_string())),
        None => (path_and_query, None),
    };

    let decoded = percent_decode(path_raw)?;
    let path = normalize_path(&decoded);
    let path_crc = crc_path(&path);
    let suffix = file_suffix(&path);
    let content_type = mime_for_suffix(&suffix);

    Ok(Request {
        method,
        path,
        query,
        version,
        path_crc,
        suffix,
        content_type,
    })
}

fn parse_version(s: &str) -> Result<u32, Error> {
    let s = s.strip_prefix("HTTP/").ok_or(Error::Malformed)?;
    let (major, minor) = s.split_once('.').ok_or(Error::Malformed)?;
    let major: u32 = major.parse().map_err(|_| Error::Malformed)?;
    let minor: u32 = minor.parse().map_err(|_| Error::Malformed)?;
    Ok(major * 1000 + minor)
}

fn percent_decode(s: &str) -> Result<String, Error> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).map_err(|_| Error::Malformed)?;
            let byte = u8::from_str_radix(hex, 16).map_err(|_| Error::Malformed)?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Collapse `.`, `..`, and `//` segments, never popping past the root.
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Rolling CRC-32/IEEE over the non-`/` bytes of the normalized path,
/// exported as a cheap route-table key.
fn crc_path(path: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    let filtered: Vec<u8> = path.bytes().filter(|&b| b != b'/').collect();
    hasher.update(&filtered);
    hasher.finalize()
}

fn file_suffix(path: &str) -> String {
    let last_segment = path.rsplit('/').next().unwrap_or("");
    match last_segment.rfind('.') {
        Some(pos) => last_segment[pos + 1..].to_ascii_lowercase(),
        None => String::new(),
    }
}

fn mime_for_suffix(suffix: &str) -> &'static str {
    match suffix {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalizes_dot_dotdot_and_double_slash() {
        assert_eq!(normalize_path("/a/./b/../c"), "/a/c");
        assert_eq!(normalize_path("//a//b"), "/a/b");
        assert_eq!(normalize_path("/.."), "/");
    }

    #[test]
    fn parses_request_line_with_query_and_fragment() {
        let raw = b"GET /a/./b/../c/%2E HTTP/1.1\r\nHost: x\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/a/c");
        assert_eq!(req.suffix, "");
        assert_eq!(req.content_type, "application/octet-stream");
    }

    #[test]
    fn splits_query_and_fragment() {
        let raw = b"GET /x?y=1#frag HTTP/1.1\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.path, "/x");
        assert_eq!(req.query.as_deref(), Some("y=1"));
    }

    #[test]
    fn derives_suffix_and_mime() {
        let raw = b"GET /style.css HTTP/1.1\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.suffix, "css");
        assert_eq!(req.content_type, "text/css");
    }

    #[test]
    fn version_is_major_times_1000_plus_minor() {
        let raw = b"POST /x HTTP/1.1\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.version, 1001);
        assert_eq!(req.method, Method::Post);
    }
}
