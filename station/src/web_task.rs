//! Embedded static-file web UI: one client at a time, files served from
//! `Config::web_dir` (spec.md §4.7, §6 "web_port"/"web_dir"). No templating
//! or API routes — the original's web UI is a single-page app fetched as
//! static assets, which is all this surface needs to serve.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use station_http::server::{Method, Server};

use crate::context::Station;

pub async fn run(station: Rc<Station>) {
    let Some(port) = station.config.web_port else {
        tracing::info!("no web_port configured, web UI disabled");
        std::future::pending::<()>().await;
        return;
    };

    let server = match Server::bind(("0.0.0.0", port)).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, port, "failed to bind web UI listener");
            return;
        }
    };
    tracing::info!(port, "web UI listening");

    loop {
        let mut conn = match server.accept().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "web UI accept failed");
                continue;
            }
        };
        let web_dir = station.config.web_dir.value.clone();
        if let Err(e) = serve_one(&mut conn, &web_dir).await {
            tracing::debug!(error = %e, "web UI request failed");
        }
    }
}

async fn serve_one(conn: &mut station_http::server::Conn<tokio::net::TcpStream>, web_dir: &Path) -> Result<(), station_http::server::Error> {
    let req = conn.read_request().await?;
    if req.method != Method::Get {
        conn.respond(405, "Method Not Allowed", b"", "text/plain").await?;
        return Ok(());
    }

    let rel = if req.path == "/" { "index.html" } else { req.path.trim_start_matches('/') };
    let path: PathBuf = web_dir.join(rel);

    match tokio::fs::read(&path).await {
        Ok(body) => conn.respond(200, "OK", &body, req.content_type).await,
        Err(_) => conn.respond(404, "Not Found", b"not found", "text/plain").await,
    }
}
