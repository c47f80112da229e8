//! Upgrade Tunnel (spec §4.5): validates a WebSocket upgrade, opens an
//! upstream request with the same URL/header construction as the forwarder,
//! and splices the two byte streams once the upstream answers `101`.
//!
//! Grounded on the teacher's `serve/proxy.rs::proxy_request` upgrade branch
//! (the `is_ws_upgrade` check, `upgrade::on` on both sides, `tokio::try_join!`
//! plus `copy_bidirectional`) — generalized to go through the same
//! [`crate::forward::Forwarder`] client and URL/header rules as a plain
//! forward instead of a fixed `http://localhost:{port}` backend.
//!
//! Pre-read "head" bytes (spec §4.5 "if any pre-read bytes exist, push them
//! back") need no explicit handling here: `hyper::upgrade::on` hands back an
//! `Upgraded` value that already replays whatever the HTTP/1 parser buffered
//! past the request/response head, on both the client and upstream sides.

use http::header::{CONNECTION, UPGRADE};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;

use crate::body;
use crate::error::ProxyError;
use crate::forward::{build_upstream_url, classify_transport_error, rewrite_headers, Forwarder};
use crate::settings::{ProxyBody, RoutingEntry};

/// Runs the upgrade tunnel for a request already matched to `entry`. Spawns
/// the bidirectional splice in the background and returns the `101`
/// response immediately so the caller can write it to the client connection.
pub async fn upgrade(
    forwarder: &Forwarder,
    entry: &RoutingEntry,
    mut req: Request<Incoming>,
    incoming_host: &str,
    is_tls: bool,
) -> Result<Response<ProxyBody>, ProxyError> {
    if !is_websocket_upgrade(req.method(), req.headers()) {
        return Err(ProxyError::InvalidUpgrade);
    }

    // Must be taken before the request is torn apart: it registers the
    // extension hyper later resolves into the raw connection.
    let client_upgrade = hyper::upgrade::on(&mut req);

    let (parts, _body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    let upstream_url = build_upstream_url(entry, &path_and_query)?;
    let upstream_uri: http::Uri = upstream_url
        .as_str()
        .parse()
        .map_err(|e| ProxyError::UpstreamOther(format!("invalid upstream uri: {e}")))?;

    let mut builder = Request::builder().method(parts.method.clone()).uri(upstream_uri);
    *builder.headers_mut().unwrap() = parts.headers.clone();
    rewrite_headers(
        builder.headers_mut().unwrap(),
        entry,
        &upstream_url,
        incoming_host,
        is_tls,
    );

    // An upgrade handshake carries no body of its own.
    let upstream_req = builder
        .body(body::empty())
        .map_err(|e| ProxyError::UpstreamOther(e.to_string()))?;

    let mut upstream_resp = forwarder
        .client()
        .request(upstream_req)
        .await
        .map_err(|e| classify_transport_error(&e))?;

    if upstream_resp.status() != StatusCode::SWITCHING_PROTOCOLS {
        // Upstream declined the upgrade; relay whatever it answered instead.
        let (resp_parts, resp_body) = upstream_resp.into_parts();
        return Ok(Response::from_parts(resp_parts, body::from_incoming(resp_body)));
    }

    let server_upgrade = hyper::upgrade::on(&mut upstream_resp);
    let (resp_parts, _resp_body) = upstream_resp.into_parts();

    tokio::spawn(async move {
        match tokio::try_join!(client_upgrade, server_upgrade) {
            Ok((client_conn, server_conn)) => {
                let mut client_io = TokioIo::new(client_conn);
                let mut server_io = TokioIo::new(server_conn);
                if let Err(err) = tokio::io::copy_bidirectional(&mut client_io, &mut server_io).await {
                    tracing::debug!(error = %err, "websocket tunnel closed with error");
                }
            }
            Err(err) => tracing::warn!(error = %err, "websocket upgrade handshake failed"),
        }
    });

    Ok(Response::from_parts(resp_parts, body::empty()))
}

/// spec §4.5 rejection rule: `GET` plus a case-insensitive `Upgrade:
/// websocket`, with `Connection` naming `upgrade` among its tokens.
pub fn is_websocket_upgrade(method: &Method, headers: &HeaderMap) -> bool {
    if method != Method::GET {
        return false;
    }
    let has_upgrade_token = headers
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false);
    let is_websocket = headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    has_upgrade_token && is_websocket
}
