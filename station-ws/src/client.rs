//! The WebSocket client state machine: completes an HTTP Upgrade handshake
//! via `station_http::Client`, then runs client-masked framing with ping/pong
//! and a two-phase close, layered the way a plain HTTP request is layered
//! under a WS upgrade rather than duplicating the HTTP half.

use std::fmt;

use station_http::client::{self, Client as HttpClient};
use station_io::{tls::MaybeTlsStream, ConnBuf, WriteOutcome};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::proto::{self, OpCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    ClientReq,
    ServerResp,
    Connected,
    ClosingDrainC,
    ClosingDrainS,
    SendClose,
    SentClose,
    EchoClose,
}

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    Http(client::Error),
    Proto(proto::Error),
    /// The handshake response was not `101 Switching Protocols`.
    HandshakeRejected(u16),
    /// `Sec-WebSocket-Accept` did not match the expected hash of our key.
    AcceptMismatch,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl From<client::Error> for Error {
    fn from(e: client::Error) -> Self {
        Self::Http(e)
    }
}

impl From<proto::Error> for Error {
    fn from(e: proto::Error) -> Self {
        Self::Proto(e)
    }
}

#[derive(Debug)]
pub enum Event {
    Connected,
    TextRcvd(Vec<u8>),
    BinaryRcvd(Vec<u8>),
    DataSent,
    Closed,
}

/// A connected WS client: the HTTP client it upgraded from, plus a fresh
/// [`ConnBuf`] dedicated to WS framing (the HTTP client's buffer is consumed
/// by the handshake and not reused for frame data).
pub struct Ws<T> {
    io: MaybeTlsStream<T>,
    buf: ConnBuf,
    state: State,
    close_sent: bool,
}

const WS_RBUFSIZE: usize = 8192;
const WS_WBUFSIZE: usize = 8192;

impl<T> Ws<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Perform the upgrade handshake: `GET path`, fixed headers, a random
    /// `Sec-WebSocket-Key`, optional auth-token lines appended verbatim. On
    /// success the HTTP client's connection is taken over as a fresh `Ws`.
    pub async fn handshake(
        mut http: HttpClient<T>,
        host: &str,
        port: u16,
        path: &str,
        auth_lines: &[String],
    ) -> Result<Self, Error>
    where
        T: Unpin,
    {
        let key = proto::generate_key();
        let mut req = format!(
            "GET {path} HTTP/1.1\r\nHost: {host}:{port}\r\nUpgrade: websocket\r\nConnection: upgrade\r\nSec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n"
        );
        for line in auth_lines {
            req.push_str(line);
            req.push_str("\r\n");
        }
        req.push_str("\r\n");

        let slot = http
            .reserve_request(req.len())
            .ok_or(Error::Http(client::Error::HeaderTooLarge))?;
        slot[..req.len()].copy_from_slice(req.as_bytes());
        http.commit_request(req.len());

        let status = http.request().await?;
        if status != 101 {
            return Err(Error::HandshakeRejected(status));
        }
        let expect = proto::accept_hash(&key);
        match http.header("Sec-WebSocket-Accept") {
            Some(got) if got == expect => {}
            _ => return Err(Error::AcceptMismatch),
        }

        Ok(Self {
            io: http.into_io(),
            buf: ConnBuf::new(WS_RBUFSIZE, WS_WBUFSIZE),
            state: State::Connected,
            close_sent: false,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Send a TEXT or BINARY frame (client-masked, unfragmented).
    pub async fn send(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), Error> {
        let frame = proto::encode_frame(opcode, payload);
        let slot = self.buf.reserve_send(frame.len()).ok_or(proto::Error::LengthTooLarge)?;
        slot[..frame.len()].copy_from_slice(&frame);
        self.buf.commit_send(frame.len());
        self.buf.mark_frame_ready();
        self.flush().await
    }

    async fn flush(&mut self) -> Result<(), Error> {
        loop {
            match self.buf.drain(&mut self.io).await.map_err(client::Error::Io)? {
                WriteOutcome::Done => return Ok(()),
                WriteOutcome::Pending => continue,
            }
        }
    }

    /// Read one frame, dispatching PING/PONG/CLOSE internally and surfacing
    /// TEXT/BINARY payloads (and terminal CLOSED) to the caller.
    pub async fn read_event(&mut self) -> Result<Event, Error> {
        loop {
            let header = loop {
                if let Some(h) = proto::decode_header(self.buf.recv_window())? {
                    break h;
                }
                if self.buf.recv_remaining_capacity() == 0 {
                    self.buf.compact_recv();
                }
                let n = self.buf.fill(&mut self.io).await.map_err(client::Error::Io)?;
                if n == 0 {
                    self.state = State::Closed;
                    return Ok(Event::Closed);
                }
            };

            while self.buf.recv_window().len() < header.header_len + header.payload_len {
                if self.buf.recv_remaining_capacity() == 0 {
                    self.buf.compact_recv();
                }
                let n = self.buf.fill(&mut self.io).await.map_err(client::Error::Io)?;
                if n == 0 {
                    self.state = State::Closed;
                    return Ok(Event::Closed);
                }
            }

            self.buf
                .set_rend(self.buf.rbeg() + header.header_len + header.payload_len);
            let frame = self.buf.recv_frame().to_vec();
            self.buf.consume_frame();
            let payload = frame[header.header_len..].to_vec();

            match header.opcode {
                OpCode::Text => return Ok(Event::TextRcvd(payload)),
                OpCode::Binary => return Ok(Event::BinaryRcvd(payload)),
                OpCode::Ping => {
                    self.send(OpCode::Pong, &payload).await?;
                }
                OpCode::Pong => {}
                OpCode::Close => {
                    if self.close_sent {
                        self.state = State::Closed;
                        return Ok(Event::Closed);
                    }
                    self.state = State::EchoClose;
                    self.send(OpCode::Close, &payload).await?;
                    self.state = State::Closed;
                    return Ok(Event::Closed);
                }
                OpCode::Continuation => return Err(Error::Proto(proto::Error::InvalidHeader)),
            }
        }
    }

    /// Drain pending outgoing frames, then send a CLOSE frame and wait for
    /// either the peer's echo or its socket close.
    pub async fn close(&mut self, reason: u16) -> Result<(), Error> {
        if self.buf.has_pending_send() {
            self.state = State::ClosingDrainC;
            self.flush().await?;
        }
        self.state = State::SendClose;
        let frame = proto::encode_close(reason);
        let slot = self.buf.reserve_send(frame.len()).ok_or(proto::Error::LengthTooLarge)?;
        slot[..frame.len()].copy_from_slice(&frame);
        self.buf.commit_send(frame.len());
        self.buf.mark_frame_ready();
        self.flush().await?;
        self.close_sent = true;
        self.state = State::SentClose;
        loop {
            match self.read_event().await {
                Ok(Event::Closed) => return Ok(()),
                Ok(_) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Drives the upgrade handshake and the PING scenario from spec.md §8
    /// scenario 5 end to end over an in-process duplex pipe, with the server
    /// half played by hand.
    #[tokio::test]
    async fn handshake_then_ping_pong_round_trip() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);

        let server = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let mut n = 0;
            loop {
                n += server_io.read(&mut buf[n..]).await.unwrap();
                if buf[..n].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let req = std::str::from_utf8(&buf[..n]).unwrap();
            let key = req
                .lines()
                .find_map(|l| l.strip_prefix("Sec-WebSocket-Key: "))
                .unwrap()
                .trim();
            let accept = crate::proto::accept_hash(key);
            let resp = format!(
                "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
            );
            server_io.write_all(resp.as_bytes()).await.unwrap();

            // Peer sends PING "abc" per spec.md §8 scenario 5.
            server_io.write_all(&[0x89, 0x03, b'a', b'b', b'c']).await.unwrap();

            // Expect the masked PONG echo back.
            let mut pong = [0u8; 9];
            server_io.read_exact(&mut pong).await.unwrap();
            pong
        });

        let http = HttpClient::from_tls(MaybeTlsStream::plain(client_io), "tc.example", 443, 4096, 4096).unwrap();
        let mut ws = Ws::handshake(http, "tc.example", 443, "/router", &[]).await.unwrap();
        assert_eq!(ws.state(), State::Connected);

        // `read_event` processes the PING internally (replying PONG) and then
        // blocks waiting for the next frame, which never arrives: run it in
        // the background and only wait on the server's observed PONG.
        tokio::spawn(async move {
            let _ = ws.read_event().await;
        });

        let pong = server.await.unwrap();
        assert_eq!(pong[0], 0x8A);
        assert_eq!(pong[1], 0x80 | 3);
        assert_eq!(&pong[2..6], &proto::MASK);
        assert_eq!(&pong[6..9], &[b'a' ^ 1, b'b' ^ 1, b'c' ^ 1]);
    }
}
