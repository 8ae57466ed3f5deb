//! The per-session state machine (`cstate`, `uflags`, segment assembler)
//! grounded line for line on `examples/original_source/src/cups.c`
//! (`cups_update_info`). URI segments are consumed specially before the
//! generic length-prefixed loop begins, per REDESIGN FLAG 1 in
//! `SPEC_FULL.md`: the original reads both one-byte URI lengths directly out
//! of the first HTTP chunk rather than through the generic assembler.

use std::fmt;

use station_config::{Category, CredError, CredentialStore};
use station_http::client::{self, Client as HttpClient};

/// Protocol state, `CUPS_*` in the original. `FeedCupsUri`/`FeedTcUri` are
/// not represented here: both URI segments are read together by
/// [`feed_uris`] before the generic loop starts at `FeedCupsCred`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CState {
    Ini,
    HttpReqPend,
    FeedCupsCred,
    FeedTcCred,
    FeedSignature,
    FeedUpdate,
    Done,
    ErrFailed,
    ErrNoUri,
    ErrTimeout,
    ErrRejected,
    ErrClosed,
    ErrDead,
}

impl CState {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::ErrFailed | Self::ErrNoUri | Self::ErrTimeout | Self::ErrRejected | Self::ErrClosed | Self::ErrDead
        )
    }
}

/// Bitset marking which parts of the response were delivered this session.
pub mod uflags {
    pub const CUPS_URI: u8 = 1 << 0;
    pub const TC_URI: u8 = 1 << 1;
    pub const CUPS_CRED: u8 = 1 << 2;
    pub const TC_CRED: u8 = 1 << 3;
    pub const SIGNATURE: u8 = 1 << 4;
    pub const UPDATE: u8 = 1 << 5;
}

/// `SIGCRC_LEN` in the original: the key-CRC tag precedes the raw signature
/// in the SIGNATURE segment.
const SIGCRC_LEN: usize = 4;
/// `sizeof(cups->sig->signature)` in the original.
const MAX_SIGNATURE_LEN: usize = 128;

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    Http(client::Error),
    Cred(CredError),
    Io(std::io::Error),
    /// Malformed segment framing: short header chunk, bad length, etc.
    Proto(&'static str),
    /// Signature segment length outside `[8, 132]` (REDESIGN FLAG 2: a hard
    /// rejection rather than the silent truncation the original's pointer
    /// arithmetic would allow for an over-length tail).
    SignatureLengthRejected(usize),
    NoUriConfigured,
    Rejected(u16),
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

impl From<CredError> for Error {
    fn from(e: CredError) -> Self {
        Self::Cred(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Pulls body bytes from the HTTP client one chunk at a time, refilling via
/// `read_body` as the cursor exhausts each chunk — the async stand-in for
/// the original's `http_getMore`.
struct BodyCursor<'a, T> {
    http: &'a mut HttpClient<T>,
    chunk: Vec<u8>,
    pos: usize,
}

impl<'a, T> BodyCursor<'a, T>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    fn new(http: &'a mut HttpClient<T>, first_chunk: Vec<u8>) -> Self {
        Self {
            http,
            chunk: first_chunk,
            pos: 0,
        }
    }

    async fn ensure_nonempty(&mut self) -> Result<bool, Error> {
        if self.pos < self.chunk.len() {
            return Ok(true);
        }
        match self.http.read_body().await? {
            Some(c) => {
                self.chunk = c;
                self.pos = 0;
                Ok(!self.chunk.is_empty())
            }
            None => Ok(false),
        }
    }

    async fn read_byte(&mut self) -> Result<Option<u8>, Error> {
        if !self.ensure_nonempty().await? {
            return Ok(None);
        }
        let b = self.chunk[self.pos];
        self.pos += 1;
        Ok(Some(b))
    }

    /// Up to `max` bytes from the *current* chunk only (never crosses a
    /// chunk boundary), mirroring `dlen = min(segm_len-segm_off,
    /// body.bufsize-body.pos)` in the original.
    async fn read_slice(&mut self, max: usize) -> Result<Option<Vec<u8>>, Error> {
        if !self.ensure_nonempty().await? {
            return Ok(None);
        }
        let avail = self.chunk.len() - self.pos;
        let take = avail.min(max);
        let out = self.chunk[self.pos..self.pos + take].to_vec();
        self.pos += take;
        Ok(Some(out))
    }
}

struct SigAssembler {
    keycrc_bytes: [u8; SIGCRC_LEN],
    raw: Vec<u8>,
}

/// Drives the segment stream of a single CUPS response body to completion,
/// writing staged credential/firmware data through `store` and the firmware
/// sink, and returns the final uflags plus (if a firmware image was
/// delivered) its SHA-512 digest and the signature material to verify it
/// against.
pub struct FeedResult {
    pub uflags: u8,
    pub firmware_len: usize,
    pub signature: Option<(u32, Vec<u8>)>,
    pub digest: Option<[u8; 64]>,
}

/// Read the two URI segments (both one-byte lengths) directly out of the
/// first response chunk, as `cups_update_info`'s `CUPS_HTTP_REQ_PEND` branch
/// does before falling into the generic assembler.
pub async fn feed_uris<T>(
    http: &mut HttpClient<T>,
    store: &mut station_config::CredentialStore,
) -> Result<(u8, Vec<u8>, usize), Error>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut first = http.read_body().await?.ok_or(Error::Proto("empty CUPS response body"))?;
    while first.len() < 2 {
        match http.read_body().await? {
            Some(more) => first.extend_from_slice(&more),
            None => return Err(Error::Proto("truncated URI segment header")),
        }
    }
    let cupsuri_len = first[0] as usize;
    while first.len() < 1 + cupsuri_len + 1 {
        match http.read_body().await? {
            Some(more) => first.extend_from_slice(&more),
            None => return Err(Error::Proto("truncated CUPS URI segment")),
        }
    }
    let tcuri_len = first[1 + cupsuri_len] as usize;
    let need = 2 + cupsuri_len + tcuri_len;
    while first.len() < need {
        match http.read_body().await? {
            Some(more) => first.extend_from_slice(&more),
            None => return Err(Error::Proto("truncated TC URI segment")),
        }
    }

    let mut flags = 0u8;
    if cupsuri_len > 0 {
        let uri = std::str::from_utf8(&first[1..1 + cupsuri_len]).map_err(|_| Error::Proto("CUPS URI not UTF-8"))?;
        store.save_uri(Category::Cups, station_config::CredSet::Reg, uri);
        flags |= uflags::CUPS_URI;
        tracing::info!(uri, "[Segment] CUPS URI");
    }
    if tcuri_len > 0 {
        let beg = 2 + cupsuri_len;
        let uri = std::str::from_utf8(&first[beg..beg + tcuri_len]).map_err(|_| Error::Proto("TC URI not UTF-8"))?;
        store.save_uri(Category::Tc, station_config::CredSet::Reg, uri);
        flags |= uflags::TC_URI;
        tracing::info!(uri, "[Segment] TC URI");
    }

    let remainder = first[need..].to_vec();
    Ok((flags, remainder, need))
}

/// Drive the generic length-prefixed segment loop (`FEED_CUPS_CRED` through
/// `FEED_UPDATE`), starting from whatever of the response body is already
/// buffered in `leftover`.
pub async fn feed_segments<T>(
    http: &mut HttpClient<T>,
    store: &mut station_config::CredentialStore,
    firmware_temp_dir: &std::path::Path,
    leftover: Vec<u8>,
) -> Result<FeedResult, Error>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut cursor = BodyCursor::new(http, leftover);
    let mut cstate = CState::FeedCupsCred;
    let mut uflags_acc = 0u8;
    let mut sig: Option<SigAssembler> = None;
    let mut hasher: Option<sha2::Sha512> = None;
    let mut fw: Option<crate::firmware::FirmwareStage> = None;
    let mut fw_len = 0usize;
    let mut digest: Option<[u8; 64]> = None;

    'outer: loop {
        // Assemble the length prefix for the current segment, one byte at a
        // time (`temp[temp_n++] = body.buf[body.pos++]`).
        let width = prefix_width(cstate);
        let mut temp = [0u8; 4];
        for slot in temp.iter_mut().take(width) {
            *slot = cursor.read_byte().await?.ok_or(Error::Proto("truncated segment length"))?;
        }
        let segm_len = u32::from_le_bytes(temp) as usize;

        if segm_len == 0 {
            match advance(cstate) {
                Some(next) => {
                    cstate = next;
                    if cstate == CState::Done {
                        store.commit_config_update().await?;
                        break 'outer;
                    }
                    continue;
                }
                None => unreachable!(),
            }
        }

        match cstate {
            CState::FeedCupsCred => {
                store.cred_start(Category::Cups, segm_len).await?;
                uflags_acc |= uflags::CUPS_CRED;
                tracing::info!(bytes = segm_len, "[Segment] CUPS Credentials");
            }
            CState::FeedTcCred => {
                store.cred_start(Category::Tc, segm_len).await?;
                uflags_acc |= uflags::TC_CRED;
                tracing::info!(bytes = segm_len, "[Segment] TC Credentials");
            }
            CState::FeedSignature => {
                tracing::info!(bytes = segm_len, "[Segment] FW Signature");
                if !(8..=MAX_SIGNATURE_LEN + SIGCRC_LEN).contains(&segm_len) {
                    return Err(Error::SignatureLengthRejected(segm_len));
                }
                sig = Some(SigAssembler {
                    keycrc_bytes: [0; SIGCRC_LEN],
                    raw: Vec::with_capacity(segm_len - SIGCRC_LEN),
                });
            }
            CState::FeedUpdate => {
                store.commit_config_update().await?;
                fw = Some(crate::firmware::FirmwareStage::start(firmware_temp_dir).await?);
                tracing::info!(bytes = segm_len, "[Segment] FW Update");
            }
            _ => unreachable!(),
        }

        let mut segm_off = 0usize;
        while segm_off < segm_len {
            let want = segm_len - segm_off;
            let data = cursor.read_slice(want).await?.ok_or(Error::Proto("truncated segment body"))?;
            if data.is_empty() {
                return Err(Error::Proto("truncated segment body"));
            }
            let dlen = data.len();

            match cstate {
                CState::FeedCupsCred => store.cred_write(Category::Cups, &data, segm_off, dlen).await?,
                CState::FeedTcCred => store.cred_write(Category::Tc, &data, segm_off, dlen).await?,
                CState::FeedSignature => {
                    let s = sig.as_mut().expect("signature assembler present");
                    let mut off = segm_off;
                    let mut rest: &[u8] = &data;
                    if off < SIGCRC_LEN {
                        let take = (SIGCRC_LEN - off).min(rest.len());
                        s.keycrc_bytes[off..off + take].copy_from_slice(&rest[..take]);
                        off += take;
                        rest = &rest[take..];
                    }
                    if !rest.is_empty() && off - SIGCRC_LEN + rest.len() <= MAX_SIGNATURE_LEN {
                        s.raw.extend_from_slice(rest);
                    }
                }
                CState::FeedUpdate => {
                    if let Some(h) = hasher.as_mut() {
                        use sha2::Digest;
                        h.update(&data);
                    }
                    fw.as_mut().expect("firmware stage present").write(&data, segm_off).await?;
                }
                _ => unreachable!(),
            }

            segm_off += dlen;
        }

        match cstate {
            CState::FeedCupsCred => {
                store.cred_complete(Category::Cups, segm_len).await?;
                tracing::info!("[Segment] CUPS Credentials update completed");
            }
            CState::FeedTcCred => {
                store.cred_complete(Category::Tc, segm_len).await?;
                tracing::info!("[Segment] TC Credentials update completed");
            }
            CState::FeedSignature => {
                uflags_acc |= uflags::SIGNATURE;
                // Hashing begins now: it covers only the UPDATE segment that
                // follows, never the signature bytes themselves.
                hasher = Some(sha2::Sha512::new());
            }
            CState::FeedUpdate => {
                fw_len = segm_len;
                uflags_acc |= uflags::UPDATE;
                tracing::info!(bytes = segm_len, "[Segment] Update committed");
                if let Some(h) = hasher.take() {
                    use sha2::Digest;
                    let out = h.finalize();
                    let mut d = [0u8; 64];
                    d.copy_from_slice(&out);
                    digest = Some(d);
                }
            }
            _ => unreachable!(),
        }

        match advance(cstate) {
            Some(next) => {
                cstate = next;
                if cstate == CState::Done {
                    store.commit_config_update().await?;
                    break 'outer;
                }
            }
            None => unreachable!(),
        }
    }

    let signature = sig.map(|s| (u32::from_le_bytes(s.keycrc_bytes), s.raw));
    let fw_path = fw.map(|f| f.commit());
    if let Some(fut) = fw_path {
        fut.await?;
    }

    Ok(FeedResult {
        uflags: uflags_acc,
        firmware_len: fw_len,
        signature,
        digest,
    })
}

/// `sizelen(cstate) = 1 << ((cstate - CUPS_FEED_CUPS_URI) >> 1)`, specialized
/// to the states actually passed through the generic assembler (URI pair is
/// handled by `feed_uris`, see the module doc comment).
fn prefix_width(cstate: CState) -> usize {
    match cstate {
        CState::FeedCupsCred | CState::FeedTcCred => 2,
        CState::FeedSignature | CState::FeedUpdate => 4,
        _ => unreachable!("prefix_width called outside the generic segment loop"),
    }
}

fn advance(cstate: CState) -> Option<CState> {
    match cstate {
        CState::FeedCupsCred => Some(CState::FeedTcCred),
        CState::FeedTcCred => Some(CState::FeedSignature),
        CState::FeedSignature => Some(CState::FeedUpdate),
        CState::FeedUpdate => Some(CState::Done),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prefix_widths_match_sizelen_progression() {
        assert_eq!(prefix_width(CState::FeedCupsCred), 2);
        assert_eq!(prefix_width(CState::FeedTcCred), 2);
        assert_eq!(prefix_width(CState::FeedSignature), 4);
        assert_eq!(prefix_width(CState::FeedUpdate), 4);
    }

    #[test]
    fn advance_chain_ends_in_done() {
        let mut s = CState::FeedCupsCred;
        let mut steps = 0;
        while let Some(next) = advance(s) {
            s = next;
            steps += 1;
            assert!(steps <= 4);
        }
        assert_eq!(s, CState::Done);
    }
}
