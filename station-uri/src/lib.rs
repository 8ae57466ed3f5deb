//! Offset-based URI parser.
//!
//! Parses `scheme:` then `//host[:port][/path]`, or (in "skip schema" mode)
//! parses starting directly at `host`. Handles bracketed IPv6 literals
//! (`[::1]:1234`). Records byte offsets into the *original* input rather than
//! allocating, mirroring the teacher's zero-copy preference for header
//! parsing (`examples/HFQR-xitca-web/http/src/h1/proto/decode.rs` records
//! header/path offsets into the input buffer the same way).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub beg: usize,
    pub end: usize,
}

impl Span {
    fn slice<'a>(&self, s: &'a str) -> &'a str {
        &s[self.beg..self.end]
    }

    fn empty(at: usize) -> Self {
        Self { beg: at, end: at }
    }

    fn len(&self) -> usize {
        self.end - self.beg
    }
}

/// Parsed offsets into the original URI string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UriInfo {
    pub scheme: Span,
    /// `host[:port]` taken together, as it would appear in an HTTP `Host:` header.
    pub hostport: Span,
    pub host: Span,
    /// Empty span when no port was present.
    pub port: Span,
    /// Empty span when no path was present; otherwise starts at `/`.
    pub path: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum UriError {
    /// Input did not match `scheme://host[:port][/path]` at all.
    Malformed,
    /// An unterminated `[` IPv6 literal.
    UnterminatedIpv6,
    /// Port was present but not numeric, or out of `u16` range.
    BadPort,
    /// A caller-provided destination buffer was too small to hold the value.
    TooLong,
}

impl fmt::Display for UriError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for UriError {}

/// Parse `input` as `scheme://host[:port][/path]`. If `skip_schema` is set,
/// `input` is assumed to already start at `host` (no `scheme://` prefix).
pub fn parse(input: &str, skip_schema: bool) -> Result<UriInfo, UriError> {
    let bytes = input.as_bytes();
    let mut i = 0usize;

    let scheme = if skip_schema {
        Span::empty(0)
    } else {
        let start = i;
        while i < bytes.len() && bytes[i] != b':' {
            i += 1;
        }
        if i >= bytes.len() {
            return Err(UriError::Malformed);
        }
        let scheme = Span { beg: start, end: i };
        i += 1; // ':'
        if bytes.get(i) == Some(&b'/') && bytes.get(i + 1) == Some(&b'/') {
            i += 2;
        }
        scheme
    };

    let hostport_beg = i;

    let host = if bytes.get(i) == Some(&b'[') {
        let start = i + 1;
        let mut j = start;
        while j < bytes.len() && bytes[j] != b']' {
            j += 1;
        }
        if j >= bytes.len() {
            return Err(UriError::UnterminatedIpv6);
        }
        let host = Span { beg: start, end: j };
        i = j + 1;
        host
    } else {
        let start = i;
        while i < bytes.len() && bytes[i] != b':' && bytes[i] != b'/' {
            i += 1;
        }
        Span { beg: start, end: i }
    };

    let port = if bytes.get(i) == Some(&b':') {
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i] != b'/' {
            i += 1;
        }
        let port = Span { beg: start, end: i };
        if port.len() == 0 {
            return Err(UriError::BadPort);
        }
        port
    } else {
        Span::empty(i)
    };

    let hostport = Span {
        beg: hostport_beg,
        end: i,
    };

    let path = if i < bytes.len() {
        Span {
            beg: i,
            end: bytes.len(),
        }
    } else {
        Span::empty(i)
    };

    if host.len() == 0 {
        return Err(UriError::Malformed);
    }

    Ok(UriInfo {
        scheme,
        hostport,
        host,
        port,
        path,
    })
}

/// Transport kind distinguished by a trailing `s` on the scheme
/// (`http`/`https`, `ws`/`wss`, or bare `tcp`/`tls`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Tls,
}

/// Enforce the `scheme[s]://host:port` shape required for CUPS/TC endpoint
/// URIs: no path allowed, port mandatory. Returns the transport kind plus the
/// host and port as owned strings (bounded by `max_host`/`max_port`, mirroring
/// the caller-buffer-capacity contract of the original `uri_checkHostPortUri`).
pub fn check_host_port_uri(
    uri: &str,
    base_scheme: &str,
    max_host: usize,
    max_port: usize,
) -> Result<(TransportKind, String, String), UriError> {
    let info = parse(uri, false)?;
    let scheme = info.scheme.slice(uri);

    let tls_scheme = format!("{base_scheme}s");
    let kind = if scheme.eq_ignore_ascii_case(base_scheme) {
        TransportKind::Tcp
    } else if scheme.eq_ignore_ascii_case(&tls_scheme) {
        TransportKind::Tls
    } else {
        return Err(UriError::Malformed);
    };

    if info.path.len() != 0 {
        return Err(UriError::Malformed);
    }
    if info.port.len() == 0 {
        return Err(UriError::BadPort);
    }

    let host = info.host.slice(uri);
    let port_str = info.port.slice(uri);
    port_str.parse::<u16>().map_err(|_| UriError::BadPort)?;

    if host.len() > max_host || port_str.len() > max_port {
        return Err(UriError::TooLong);
    }

    Ok((kind, host.to_string(), port_str.to_string()))
}

impl UriInfo {
    pub fn scheme<'a>(&self, src: &'a str) -> &'a str {
        self.scheme.slice(src)
    }

    pub fn host<'a>(&self, src: &'a str) -> &'a str {
        self.host.slice(src)
    }

    pub fn hostport<'a>(&self, src: &'a str) -> &'a str {
        self.hostport.slice(src)
    }

    pub fn port<'a>(&self, src: &'a str) -> Option<&'a str> {
        if self.port.len() == 0 {
            None
        } else {
            Some(self.port.slice(src))
        }
    }

    pub fn path<'a>(&self, src: &'a str) -> &'a str {
        if self.path.len() == 0 {
            "/"
        } else {
            self.path.slice(src)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_full_uri() {
        let u = "http://example.com:8080/update-info";
        let info = parse(u, false).unwrap();
        assert_eq!(info.scheme(u), "http");
        assert_eq!(info.host(u), "example.com");
        assert_eq!(info.port(u), Some("8080"));
        assert_eq!(info.path(u), "/update-info");
        assert_eq!(info.hostport(u), "example.com:8080");
    }

    #[test]
    fn parses_without_port_or_path() {
        let u = "wss://tc.example.net";
        let info = parse(u, false).unwrap();
        assert_eq!(info.host(u), "tc.example.net");
        assert_eq!(info.port(u), None);
        assert_eq!(info.path(u), "/");
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let u = "https://[::1]:443/x";
        let info = parse(u, false).unwrap();
        assert_eq!(info.host(u), "::1");
        assert_eq!(info.port(u), Some("443"));
    }

    #[test]
    fn skip_schema_starts_at_host() {
        let u = "gateway.local:3001";
        let info = parse(u, true).unwrap();
        assert_eq!(info.host(u), "gateway.local");
        assert_eq!(info.port(u), Some("3001"));
    }

    #[test]
    fn check_host_port_distinguishes_tls_by_suffix() {
        let (kind, host, port) = check_host_port_uri("https://cups.example.com:443", "http", 64, 8).unwrap();
        assert_eq!(kind, TransportKind::Tls);
        assert_eq!(host, "cups.example.com");
        assert_eq!(port, "443");

        let (kind, ..) = check_host_port_uri("http://cups.example.com:80", "http", 64, 8).unwrap();
        assert_eq!(kind, TransportKind::Tcp);
    }

    #[test]
    fn check_host_port_rejects_path() {
        assert_eq!(
            check_host_port_uri("http://cups.example.com:80/x", "http", 64, 8).unwrap_err(),
            UriError::Malformed
        );
    }

    #[test]
    fn check_host_port_requires_port() {
        assert_eq!(
            check_host_port_uri("http://cups.example.com", "http", 64, 8).unwrap_err(),
            UriError::BadPort
        );
    }

    #[test]
    fn check_host_port_rejects_oversize_host() {
        assert_eq!(
            check_host_port_uri("http://cups.example.com:80", "http", 4, 8).unwrap_err(),
            UriError::TooLong
        );
    }
}
