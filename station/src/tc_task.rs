//! Traffic-Concentrator WebSocket link: connect, hand frames to/from the
//! rest of the worker, reconnect with backoff on any failure or peer close
//! (spec.md §4.6, §4.8 "at most one TC connection per worker"). The CUPS
//! loop pokes `restart_tc` whenever a session delivers a new TC URI/cred.

use std::rc::Rc;
use std::time::Duration;

use anyhow::Context as _;
use station_config::{Category, CredSet};
use station_http::client::Client as HttpClient;
use station_io::tls::MaybeTlsStream;
use station_ws::client::Ws;
use tokio::net::TcpStream;
use tokio::sync::Notify;

use crate::context::Station;

const MAX_HOST: usize = 128;
const MAX_PORT: usize = 8;
const RBUFSIZE: usize = 4096;
const WBUFSIZE: usize = 2048;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

pub async fn run(station: Rc<Station>, restart_tc: Rc<Notify>) {
    if station.config.no_tc {
        tracing::info!("TC link disabled (--no-tc)");
        std::future::pending::<()>().await;
        return;
    }

    loop {
        match connect_and_serve(&station).await {
            Ok(()) => tracing::info!("TC link closed"),
            Err(e) => tracing::warn!(error = %e, "TC link failed"),
        }
        station.tc_connected.send_replace(false);

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            _ = restart_tc.notified() => {}
        }
    }
}

async fn connect_and_serve(station: &Station) -> anyhow::Result<()> {
    let credset = station.cups.borrow().credset();
    let uri = station
        .creds
        .borrow()
        .slot(Category::Tc, credset)
        .uri
        .clone()
        .context("no TC URI configured")?;

    let (kind, host, port) = station_uri::check_host_port_uri(&uri, "ws", MAX_HOST, MAX_PORT)?;
    let port: u16 = port.parse()?;

    let stream = TcpStream::connect((host.as_str(), port)).await?;
    stream.set_nodelay(true).ok();

    let io = match kind {
        station_uri::TransportKind::Tcp => MaybeTlsStream::plain(stream),
        station_uri::TransportKind::Tls => {
            let slot_owner = station.creds.borrow();
            let slot = slot_owner.slot(Category::Tc, CredSet::Reg);
            let client_cert = match (&slot.client_cert, &slot.client_key) {
                (Some(c), Some(k)) => Some((c.as_slice(), k.as_slice())),
                _ => None,
            };
            let config = station_io::tls::client_config(slot.trust_anchors.as_deref(), client_cert)?;
            drop(slot_owner);
            MaybeTlsStream::handshake(stream, config, &host).await?
        }
    };

    let http = HttpClient::from_tls(io, &host, port, RBUFSIZE, WBUFSIZE)?;

    let auth_lines: Vec<String> = station
        .creds
        .borrow()
        .slot(Category::Tc, CredSet::Reg)
        .auth_token
        .as_ref()
        .map(|t| vec![String::from_utf8_lossy(t).into_owned()])
        .unwrap_or_default();

    let mut ws = Ws::handshake(http, &host, port, "/router-info", &auth_lines).await?;
    station.tc_connected.send_replace(true);
    tracing::info!(%host, port, "TC link connected");

    loop {
        match ws.read_event().await? {
            // Uplink/downlink frame contents belong to the radio side of the
            // stack, out of scope here; this loop owns the link lifecycle.
            station_ws::client::Event::TextRcvd(msg) => tracing::debug!(bytes = msg.len(), "TC text frame"),
            station_ws::client::Event::BinaryRcvd(msg) => tracing::debug!(bytes = msg.len(), "TC binary frame"),
            station_ws::client::Event::Closed => return Ok(()),
            station_ws::client::Event::Connected | station_ws::client::Event::DataSent => {}
        }
    }
}
