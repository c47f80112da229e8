//! Forwarder (spec §4.4): builds the upstream URL, rewrites headers, and
//! streams the request/response between the downstream client and the
//! matched entry's upstream target.
//!
//! Grounded on the teacher's `serve/proxy.rs::proxy_request`, generalized in
//! three ways the teacher's single-tenant dev proxy didn't need: a
//! `preserveHost`-aware `Host`/`Forwarded` rewrite (the teacher always
//! preserved Host), a real upstream base-path join via `entry.target`
//! instead of a fixed `http://localhost:{port}`, and true streaming in both
//! directions instead of buffering the whole response body into `Bytes`.

use http::header::HOST;
use http::{HeaderValue, Request, Response};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::body;
use crate::error::ProxyError;
use crate::policy;
use crate::settings::{ProxyBody, RoutingEntry};

/// Shared HTTP(S) client used to reach upstream targets. One instance is
/// built per [`crate::server::Server`] and cloned (cheaply — it's an `Arc`
/// internally) into every connection task, mirroring the teacher's
/// single `hyper_util::client::legacy::Client` shared across accept loops.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpsConnector<HttpConnector>, ProxyBody>,
}

impl Forwarder {
    /// Shared with the upgrade tunnel, which sends its own upstream request
    /// through the same client rather than duplicating connection pooling.
    pub(crate) fn client(&self) -> &Client<HttpsConnector<HttpConnector>, ProxyBody> {
        &self.client
    }

    pub fn new() -> Self {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .expect("native root store")
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(32)
            .build(https);
        Self { client }
    }

    /// Build the upstream request, stream it, stream the response back, and
    /// apply CORS simple-response headers per spec §4.3/§4.4. Returns a
    /// mapped [`ProxyError`] on transport failure (spec §4.4 error mapping,
    /// §7).
    pub async fn forward(
        &self,
        entry: &RoutingEntry,
        req: Request<Incoming>,
        incoming_host: &str,
        is_tls: bool,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let (parts, incoming_body) = req.into_parts();
        let method = parts.method.clone();
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

        let mut builder = Request::builder().method(method).uri(upstream_uri);
        *builder.headers_mut().unwrap() = parts.headers.clone();
        rewrite_headers(
            builder.headers_mut().unwrap(),
            entry,
            &upstream_url,
            incoming_host,
            is_tls,
        );

        let upstream_req = builder
            .body(body::from_incoming(incoming_body))
            .map_err(|e| ProxyError::UpstreamOther(e.to_string()))?;

        let upstream_resp = self.client.request(upstream_req).await.map_err(|e| {
            classify_transport_error(&e)
        })?;

        let (resp_parts, resp_body) = upstream_resp.into_parts();
        let mut response = Response::from_parts(resp_parts, body::from_incoming(resp_body));

        // Re-derive the original request's method/headers for the CORS
        // simple-response check, since `req` was consumed above.
        policy::simple_cors_headers_from_parts(entry, &method, &parts.headers, &mut response);

        Ok(response)
    }
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new()
    }
}

/// spec §4.4 "Upstream URL construction". Also used directly by the upgrade
/// tunnel (spec §4.5: "identical in URL and header construction to §4.4").
pub(crate) fn build_upstream_url(
    entry: &RoutingEntry,
    path_and_query: &str,
) -> Result<url::Url, ProxyError> {
    let target = entry
        .target
        .as_ref()
        .ok_or_else(|| ProxyError::UpstreamOther("entry has no target".to_string()))?;

    let relative = path_and_query.strip_prefix('/').unwrap_or(path_and_query);
    let mut joined = target
        .join(relative)
        .map_err(|e| ProxyError::UpstreamOther(format!("cannot resolve upstream path: {e}")))?;

    if let Some(prefix) = &entry.path {
        let current = joined.path().to_string();
        if let Some(idx) = current.find(prefix.as_str()) {
            let mut stripped = current.clone();
            stripped.replace_range(idx..idx + prefix.len(), "");
            if stripped.is_empty() {
                stripped.push('/');
            }
            joined.set_path(&stripped);
        }
    }

    Ok(joined)
}

/// spec §4.4 "Header rewriting, in order". Headers are already seeded with a
/// verbatim copy of the incoming request's headers by the caller; this
/// layers the entry's extra headers and the forwarding headers on top.
pub(crate) fn rewrite_headers(
    headers: &mut http::HeaderMap,
    entry: &RoutingEntry,
    upstream_url: &url::Url,
    incoming_host: &str,
    is_tls: bool,
) {
    if let Some(extra) = &entry.headers {
        for part in extra.split('|') {
            if let Some((k, v)) = part.split_once(':') {
                let name = k.trim();
                let value = v.trim();
                if let (Ok(name), Ok(value)) = (
                    http::header::HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    headers.insert(name, value);
                }
            }
        }
    }

    let scheme = if is_tls { "https" } else { "http" };

    if entry.preserve_host {
        if let Ok(v) = HeaderValue::from_str(incoming_host) {
            headers.insert(HOST, v);
        }
    } else {
        let host_header = match upstream_url.port() {
            Some(port) => format!("{}:{port}", upstream_url.host_str().unwrap_or_default()),
            None => upstream_url.host_str().unwrap_or_default().to_string(),
        };
        if let Ok(v) = HeaderValue::from_str(&host_header) {
            headers.insert(HOST, v);
        }
    }

    if let Ok(v) = HeaderValue::from_str(incoming_host) {
        headers.insert("x-forwarded-for", v);
    }
    headers.insert(
        "x-forwarded-proto",
        HeaderValue::from_static(if is_tls { "https" } else { "http" }),
    );
    if let Ok(v) = HeaderValue::from_str(&format!("host={incoming_host};proto={scheme}")) {
        headers.insert("forwarded", v);
    }
}

/// Classify a legacy client transport error per spec §4.4/§7: connection
/// refused/reset maps to a distinct `ProxyError` variant from everything
/// else, by walking the error's source chain for an `io::Error`.
pub(crate) fn classify_transport_error(err: &hyper_util::client::legacy::Error) -> ProxyError {
    let kind = io_error_kind(err);
    ProxyError::from_transport(err, kind)
}

fn io_error_kind(err: &(dyn std::error::Error + 'static)) -> Option<std::io::ErrorKind> {
    let mut cursor: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = cursor {
        if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
            return Some(io_err.kind());
        }
        cursor = e.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(target: &str) -> RoutingEntry {
        RoutingEntry::builder("example.com")
            .target(url::Url::parse(target).unwrap())
            .build()
    }

    #[test]
    fn joins_request_path_onto_base_path() {
        let e = entry("http://127.0.0.1:9000/");
        let url = build_upstream_url(&e, "/test").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/test");
    }

    #[test]
    fn preserves_query_string() {
        let e = entry("http://127.0.0.1:9000/");
        let url = build_upstream_url(&e, "/test?x=1").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/test?x=1");
    }

    #[test]
    fn base_path_becomes_prefix() {
        let e = entry("http://127.0.0.1:9000/app/");
        let url = build_upstream_url(&e, "/test").unwrap();
        assert_eq!(url.path(), "/app/test");
    }

    #[test]
    fn entry_path_is_stripped_once() {
        let mut builder = RoutingEntry::builder("example.com")
            .target(url::Url::parse("http://127.0.0.1:9000/").unwrap());
        builder = builder.path("/api");
        let e = builder.build();
        let url = build_upstream_url(&e, "/api/foo").unwrap();
        assert_eq!(url.path(), "/foo");
    }

    #[test]
    fn preserve_host_uses_incoming_host() {
        let e = RoutingEntry::builder("example.com")
            .target(url::Url::parse("http://127.0.0.1:9000/").unwrap())
            .preserve_host(true)
            .build();
        let mut headers = http::HeaderMap::new();
        let upstream_url = url::Url::parse("http://127.0.0.1:9000/test").unwrap();
        rewrite_headers(&mut headers, &e, &upstream_url, "example.com", false);
        assert_eq!(headers.get(HOST).unwrap(), "example.com");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "example.com");
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "http");
        assert_eq!(headers.get("forwarded").unwrap(), "host=example.com;proto=http");
    }

    #[test]
    fn non_preserve_host_uses_target_host_and_port() {
        let e = RoutingEntry::builder("example.com")
            .target(url::Url::parse("http://127.0.0.1:9000/").unwrap())
            .build();
        let mut headers = http::HeaderMap::new();
        let upstream_url = url::Url::parse("http://127.0.0.1:9000/test").unwrap();
        rewrite_headers(&mut headers, &e, &upstream_url, "example.com", true);
        assert_eq!(headers.get(HOST).unwrap(), "127.0.0.1:9000");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "example.com");
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "https");
        assert_eq!(headers.get("forwarded").unwrap(), "host=example.com;proto=https");
    }

    #[test]
    fn extra_headers_are_parsed_and_trimmed() {
        let e = RoutingEntry::builder("localhost")
            .target(url::Url::parse("http://127.0.0.1:9000/").unwrap())
            .headers("x-key:    value |    authorization: key")
            .build();
        let mut headers = http::HeaderMap::new();
        let upstream_url = url::Url::parse("http://127.0.0.1:9000/").unwrap();
        rewrite_headers(&mut headers, &e, &upstream_url, "localhost", false);
        assert_eq!(headers.get("x-key").unwrap(), "value");
        assert_eq!(headers.get("authorization").unwrap(), "key");
    }
}
