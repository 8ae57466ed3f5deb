//! Session orchestration: resolve a URI from the credential store, run one
//! HTTP request/response through [`session::feed_uris`] and
//! [`session::feed_segments`], verify any delivered firmware, and decide what
//! happens next — grounded on `cups_start`/`cups_ondone`/`cups_done` in
//! `examples/original_source/src/cups.c`.

use std::time::Duration;

use station_config::{Category, CredSet, CredentialStore, SigKeyStore};
use station_http::client::Client as HttpClient;
use station_io::timer::Deadline;
use station_io::tls::MaybeTlsStream;
use tokio::net::TcpStream;

use crate::session::{self, Error};

/// `FAIL_CNT_THRES` in the original: past this many consecutive failures the
/// credential set rotates even on a plain `ERR_FAILED`.
const FAIL_CNT_THRES: u32 = 6;

const CUPS_CONN_TIMEOUT: Duration = Duration::from_secs(30);
/// Short retry interval: CUPS/TC identity just changed, or the last session failed.
const CUPS_RESYNC_INTV: Duration = Duration::from_secs(30);
/// Long interval: steady state, TC already connected, nothing changed.
const CUPS_OKSYNC_INTV: Duration = Duration::from_secs(3600 * 24);

const MAX_HOST: usize = 128;
const MAX_PORT: usize = 8;
const RBUFSIZE: usize = 4096;
const WBUFSIZE: usize = 2048;

/// Everything `cups_ondone` needs to know that the caller (the `Station`
/// context) cannot infer from `CredentialStore` alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub uflags: u8,
    pub failed: bool,
}

/// What the owning context should do once a session finishes.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleDecision {
    pub next_session_in: Duration,
    pub restart_tc: bool,
}

/// Owns the credential-rotation state that persists across sessions; one
/// instance per running station (spec.md §4.5 "CUPS session").
pub struct CupsEngine {
    credset: CredSet,
    fail_cnt: u32,
}

impl Default for CupsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CupsEngine {
    pub fn new() -> Self {
        Self {
            credset: CredSet::Reg,
            fail_cnt: 0,
        }
    }

    pub fn credset(&self) -> CredSet {
        self.credset
    }

    /// Run exactly one CUPS session against whatever URI is staged for the
    /// current credential set, returning the outcome and the scheduling
    /// decision for the next one. `tc_connected` reports whether the TC link
    /// is currently `TC_MUXS_CONNECTED`, used only for scheduling.
    pub async fn run_session(
        &mut self,
        store: &mut CredentialStore,
        sigkeys: &SigKeyStore,
        router_eui: u64,
        station_version: &str,
        model: &str,
        package_version: &str,
        tc_connected: bool,
    ) -> (SessionOutcome, ScheduleDecision) {
        let result = self.run_session_inner(store, sigkeys, router_eui, station_version, model, package_version).await;

        let (uflags, failed) = match &result {
            Ok(uflags) => (*uflags, false),
            Err(_) => (0, true),
        };

        self.on_done(failed, &result);

        let cups_changed = uflags & (session::uflags::CUPS_URI | session::uflags::CUPS_CRED) != 0;
        let tc_changed = uflags & (session::uflags::TC_URI | session::uflags::TC_CRED) != 0;

        let next_session_in = if cups_changed {
            Duration::ZERO
        } else if tc_connected && !failed {
            CUPS_OKSYNC_INTV
        } else {
            CUPS_RESYNC_INTV
        };

        let decision = ScheduleDecision {
            next_session_in,
            restart_tc: tc_changed,
        };

        (SessionOutcome { uflags, failed }, decision)
    }

    fn on_done(&mut self, failed: bool, result: &Result<u8, Error>) {
        if !failed {
            self.credset = CredSet::Reg;
            self.fail_cnt = 0;
            return;
        }
        self.fail_cnt += 1;
        let hard_rotate = matches!(result, Err(Error::Rejected(_)) | Err(Error::NoUriConfigured)) || self.fail_cnt > FAIL_CNT_THRES;
        if hard_rotate {
            self.credset = self.credset.rotate();
            self.fail_cnt = 0;
        }
    }

    async fn run_session_inner(
        &mut self,
        store: &mut CredentialStore,
        sigkeys: &SigKeyStore,
        router_eui: u64,
        station_version: &str,
        model: &str,
        package_version: &str,
    ) -> Result<u8, Error> {
        let uri = store
            .slot(Category::Cups, self.credset)
            .uri
            .clone()
            .ok_or(Error::NoUriConfigured)?;

        let (kind, host, port) = station_uri::check_host_port_uri(&uri, "http", MAX_HOST, MAX_PORT)
            .map_err(|_| Error::Proto("malformed CUPS URI"))?;
        let port: u16 = port.parse().map_err(|_| Error::Proto("malformed CUPS port"))?;

        let mut http = connect(&host, port, kind, store).await?;

        let body = build_request_body(store, self.credset, sigkeys, router_eui, station_version, model, package_version);
        send_request(&mut http, &uri, &host, port, store, &body).await?;

        let mut deadline = Deadline::armed_in(CUPS_CONN_TIMEOUT);
        let status = tokio::select! {
            r = http.request() => r?,
            _ = deadline.elapsed() => return Err(Error::Proto("CUPS connection timed out")),
        };
        if status != 200 {
            return Err(Error::Rejected(status));
        }

        let backup_before_write = self.credset == CredSet::Reg;
        if backup_before_write {
            store.backup_config(Category::Cups);
        }

        let (uflags_uri, leftover, _consumed) = run_with_timeout(&mut deadline, session::feed_uris(&mut http, store)).await?;
        deadline.rearm(CUPS_CONN_TIMEOUT);

        let temp_dir = store.home_dir().to_path_buf();
        let feed = run_with_timeout(&mut deadline, session::feed_segments(&mut http, store, &temp_dir, leftover)).await?;
        let uflags = uflags_uri | feed.uflags;

        if uflags & session::uflags::UPDATE != 0 {
            verify_and_finalize(sigkeys, &feed, &temp_dir).await?;
        }

        Ok(uflags)
    }
}

async fn run_with_timeout<F, T>(deadline: &mut Deadline, fut: F) -> Result<T, Error>
where
    F: std::future::Future<Output = Result<T, Error>>,
{
    tokio::select! {
        r = fut => r,
        _ = deadline.elapsed() => Err(Error::Proto("CUPS connection timed out")),
    }
}

/// `cups_verifySig` plus the staged-image disposition it drives.
async fn verify_and_finalize(sigkeys: &SigKeyStore, feed: &session::FeedResult, temp_dir: &std::path::Path) -> Result<(), Error> {
    match (&feed.signature, &feed.digest) {
        (None, _) if sigkeys.is_empty() => Ok(()),
        (None, _) => {
            crate::firmware::abort_update(temp_dir).await;
            Err(Error::Proto("signing keys configured but no signature delivered"))
        }
        (Some((key_crc, der)), Some(digest)) => match crate::sig::verify(sigkeys, *key_crc, digest, der) {
            Ok(idx) => {
                tracing::info!(key = idx, "firmware signature verified");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "firmware signature verification failed, deleting staged image");
                crate::firmware::abort_update(temp_dir).await;
                Err(Error::Proto("firmware signature verification failed"))
            }
        },
        (Some(_), None) => {
            crate::firmware::abort_update(temp_dir).await;
            Err(Error::Proto("signature segment present without an update payload"))
        }
    }
}

async fn connect(
    host: &str,
    port: u16,
    kind: station_uri::TransportKind,
    store: &CredentialStore,
) -> Result<HttpClient<MaybeTlsStream<TcpStream>>, Error> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true).ok();

    let io = match kind {
        station_uri::TransportKind::Tcp => MaybeTlsStream::plain(stream),
        station_uri::TransportKind::Tls => {
            let slot = store.slot(Category::Cups, CredSet::Reg);
            let client_cert = match (&slot.client_cert, &slot.client_key) {
                (Some(c), Some(k)) => Some((c.as_slice(), k.as_slice())),
                _ => None,
            };
            let config = station_io::tls::client_config(slot.trust_anchors.as_deref(), client_cert).map_err(|_| Error::Proto("bad CUPS TLS material"))?;
            MaybeTlsStream::handshake(stream, config, host)
                .await
                .map_err(|_| Error::Proto("CUPS TLS handshake failed"))?
        }
    };

    Ok(HttpClient::from_tls(io, host, port, RBUFSIZE, WBUFSIZE)?)
}

#[allow(clippy::too_many_arguments)]
fn build_request_body(
    store: &CredentialStore,
    credset: CredSet,
    sigkeys: &SigKeyStore,
    router_eui: u64,
    station_version: &str,
    model: &str,
    package_version: &str,
) -> String {
    let cups_uri = store.slot(Category::Cups, credset).uri.clone().unwrap_or_default();
    let tc_uri = store.slot(Category::Tc, credset).uri.clone().unwrap_or_default();
    let cups_crc = store.crc(Category::Cups, credset);
    let tc_crc = store.crc(Category::Tc, credset);

    let keys = (0..sigkeys.keys().len())
        .map(|i| sigkeys.crc(i).to_string())
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "{{\"router\":\"{router_eui:016X}\",\"cupsUri\":\"{cups_uri}\",\"tcUri\":\"{tc_uri}\",\
         \"cupsCredCrc\":{cups_crc},\"tcCredCrc\":{tc_crc},\"station\":\"{station_version}\",\
         \"model\":\"{model}\",\"package\":\"{package_version}\",\"keys\":[{keys}]}}"
    )
}

async fn send_request(
    http: &mut HttpClient<MaybeTlsStream<TcpStream>>,
    _uri: &str,
    host: &str,
    port: u16,
    store: &CredentialStore,
    body: &str,
) -> Result<(), Error> {
    let auth_header = store
        .slot(Category::Cups, CredSet::Reg)
        .auth_token
        .as_ref()
        .map(|t| String::from_utf8_lossy(t).into_owned())
        .unwrap_or_default();

    let request = format!(
        "POST /update-info HTTP/1.1\r\nHost: {host}:{port}\r\nContent-Type: application/json\r\n{auth_header}Content-Length: 00000\r\n\r\n{body}"
    );
    let mut bytes = request.into_bytes();
    let header_len = bytes.len() - body.len();
    station_http::client::set_content_length(&mut bytes[..header_len], body.len())?;

    let slot = http.reserve_request(bytes.len()).ok_or(Error::Proto("CUPS request too large for send buffer"))?;
    slot[..bytes.len()].copy_from_slice(&bytes);
    http.commit_request(bytes.len());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rotation_kicks_in_past_threshold() {
        let mut engine = CupsEngine::new();
        for _ in 0..=FAIL_CNT_THRES {
            engine.on_done(true, &Err(Error::Proto("x")));
        }
        assert_eq!(engine.credset(), CredSet::Bak);
    }

    #[test]
    fn rejected_rotates_immediately() {
        let mut engine = CupsEngine::new();
        engine.on_done(true, &Err(Error::Rejected(404)));
        assert_eq!(engine.credset(), CredSet::Bak);
    }

    #[test]
    fn success_resets_to_reg() {
        let mut engine = CupsEngine::new();
        engine.credset = CredSet::Boot;
        engine.fail_cnt = 3;
        engine.on_done(false, &Ok(0));
        assert_eq!(engine.credset(), CredSet::Reg);
    }

    #[test]
    fn plain_failure_below_threshold_does_not_rotate() {
        let mut engine = CupsEngine::new();
        engine.on_done(true, &Err(Error::Proto("x")));
        assert_eq!(engine.credset(), CredSet::Reg);
    }
}
