//! TLS adapter: an optional layer over a raw socket. When no TLS context is
//! configured the connection passes reads/writes straight through, matching
//! the `tlsctx == NULL` passthrough behavior of the networking substrate.
//! Certificate verification itself is delegated to `rustls`, a vetted
//! library, per the Non-goal that this crate never implements TLS itself.

use std::{
    fmt, io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use pin_project_lite::pin_project;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::{rustls, TlsConnector};

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    Io(io::Error),
    Rustls(rustls::Error),
    InvalidCert(String),
    InvalidServerName(String),
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

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Self::Rustls(e)
    }
}

/// Decode the handshake-failure reason into the verify-flags-as-text form the
/// spec's error handling design calls for (§7 `TLS_VERIFY_FAILED`).
pub fn describe_verify_failure(err: &rustls::Error) -> String {
    match err {
        rustls::Error::InvalidCertificate(reason) => format!("invalid certificate: {reason:?}"),
        other => format!("{other}"),
    }
}

/// Parse a PEM blob (trust anchors or a certificate chain).
pub fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, Error> {
    rustls_pemfile::certs(&mut io::Cursor::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::InvalidCert(e.to_string()))
}

/// Parse a PEM-encoded private key (PKCS8 or RSA or SEC1).
pub fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, Error> {
    rustls_pemfile::private_key(&mut io::Cursor::new(pem))
        .map_err(|e| Error::InvalidCert(e.to_string()))?
        .ok_or_else(|| Error::InvalidCert("no private key found in PEM".into()))
}

/// Build a client TLS config from an optional trust-anchor bundle and an
/// optional client certificate/key pair (mutual TLS, used when CUPS or TC
/// credentials include a client cert).
pub fn client_config(
    trust_anchors: Option<&[u8]>,
    client_cert: Option<(&[u8], &[u8])>,
) -> Result<Arc<rustls::ClientConfig>, Error> {
    let mut roots = rustls::RootCertStore::empty();
    if let Some(pem) = trust_anchors {
        for cert in parse_certs(pem)? {
            roots
                .add(cert)
                .map_err(|e| Error::InvalidCert(e.to_string()))?;
        }
    } else {
        roots.extend(webpki_roots_certs());
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);

    let config = match client_cert {
        Some((cert_pem, key_pem)) => {
            let certs = parse_certs(cert_pem)?;
            let key = parse_private_key(key_pem)?;
            builder.with_client_auth_cert(certs, key)?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

/// Minimal stand-in for a webpki-roots bundle: an empty store means "trust
/// nothing but what was explicitly configured" when no trust-anchor file was
/// supplied and no client override exists. Gateways always ship with an
/// explicit CUPS/TC trust anchor, so an empty default is the conservative
/// and correct choice rather than silently trusting a public CA bundle.
fn webpki_roots_certs() -> Vec<rustls::pki_types::TrustAnchor<'static>> {
    Vec::new()
}

/// A connection that may or may not be wrapped in TLS. Passthrough when
/// plain, delegates all record handling to `rustls` otherwise.
pin_project! {
    #[project = MaybeTlsProj]
    pub enum MaybeTlsStream<T> {
        Plain { #[pin] io: T },
        Tls { #[pin] io: tokio_rustls::client::TlsStream<T> },
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> MaybeTlsStream<T> {
    pub fn plain(io: T) -> Self {
        Self::Plain { io }
    }

    pub async fn handshake(
        io: T,
        config: Arc<rustls::ClientConfig>,
        server_name: &str,
    ) -> Result<Self, Error> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| Error::InvalidServerName(server_name.to_string()))?;
        let connector = TlsConnector::from(config);
        let stream = connector.connect(name, io).await?;
        Ok(Self::Tls { io: stream })
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls { .. })
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> AsyncRead for MaybeTlsStream<T> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeTlsProj::Plain { io } => io.poll_read(cx, buf),
            MaybeTlsProj::Tls { io } => io.poll_read(cx, buf),
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> AsyncWrite for MaybeTlsStream<T> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.project() {
            MaybeTlsProj::Plain { io } => io.poll_write(cx, buf),
            MaybeTlsProj::Tls { io } => io.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeTlsProj::Plain { io } => io.poll_flush(cx),
            MaybeTlsProj::Tls { io } => io.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeTlsProj::Plain { io } => io.poll_shutdown(cx),
            MaybeTlsProj::Tls { io } => io.poll_shutdown(cx),
        }
    }
}
