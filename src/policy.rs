//! Policy Pipeline (spec §4.2) and CORS header rewriting (spec §4.3).
//!
//! Given a matched entry, [`evaluate`] runs the fixed decision sequence
//! (authorization → redirect-to-domain → redirect-to-url → redirect-to-https
//! → CORS preflight) and returns the short-circuit response for whichever
//! rule fires first. `None` means none of them apply and the caller should
//! forward the request (spec §4.4) — possibly applying
//! [`simple_cors_headers`] to the forwarded response afterward.

use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD,
    AUTHORIZATION, LOCATION, ORIGIN, VARY, WWW_AUTHENTICATE,
};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use hyper::body::Incoming;

use crate::body;
use crate::settings::{ProxyBody, RoutingEntry};

/// The realm challenge sent on every `401` per spec §4.2 step 1. Preserved
/// verbatim — some dev tooling and browser credential prompts key off the
/// exact realm string.
const REALM_CHALLENGE: &str = r#"Basic realm="Y u no password""#;

const DEFAULT_CORS_METHODS: &str = "GET,HEAD,PUT,PATCH,POST,DELETE";

/// Run the policy pipeline's short-circuiting steps (auth, the three
/// redirect forms, CORS preflight) for a matched entry. Returns `None` when
/// none apply, meaning the caller should forward the request.
///
/// `is_tls` reflects the connection the request arrived on, not the scheme
/// in any header.
pub fn evaluate(
    entry: &RoutingEntry,
    req: &Request<Incoming>,
    is_tls: bool,
) -> Option<Response<ProxyBody>> {
    if let Some(resp) = check_authorization(entry, req) {
        return Some(resp);
    }
    if let Some(resp) = check_redirect_to_domain(entry, req) {
        return Some(resp);
    }
    if let Some(resp) = check_redirect_to_url(entry) {
        return Some(resp);
    }
    if let Some(resp) = check_redirect_to_https(entry, req, is_tls) {
        return Some(resp);
    }
    if let Some(resp) = check_cors_preflight(entry, req) {
        return Some(resp);
    }
    None
}

/// spec §4.2 step 1.
fn check_authorization(entry: &RoutingEntry, req: &Request<Incoming>) -> Option<Response<ProxyBody>> {
    let expected = entry.authorization.as_deref()?;
    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(strip_basic_prefix);

    if provided.as_deref() == Some(expected) {
        return None;
    }

    let mut resp = Response::new(body::empty());
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp.headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static(REALM_CHALLENGE));
    Some(resp)
}

/// Strip a leading (case-insensitive) `Basic` token and surrounding whitespace.
fn strip_basic_prefix(value: &str) -> &str {
    let trimmed = value.trim();
    if trimmed.len() >= 5 && trimmed.as_bytes()[..5].eq_ignore_ascii_case(b"Basic") {
        trimmed[5..].trim_start()
    } else {
        trimmed
    }
}

/// spec §4.2 step 2.
fn check_redirect_to_domain(
    entry: &RoutingEntry,
    req: &Request<Incoming>,
) -> Option<Response<ProxyBody>> {
    let domain = entry.redirect_to_domain.as_deref()?;
    let location = format!("https://{domain}{}", request_url(req));
    Some(redirect(StatusCode::FOUND, &location))
}

/// spec §4.2 step 3. Note: the incoming path is NOT appended.
fn check_redirect_to_url(entry: &RoutingEntry) -> Option<Response<ProxyBody>> {
    let url = entry.redirect_to_url.as_deref()?;
    Some(redirect(StatusCode::FOUND, url))
}

/// spec §4.2 step 4.
fn check_redirect_to_https(
    entry: &RoutingEntry,
    req: &Request<Incoming>,
    is_tls: bool,
) -> Option<Response<ProxyBody>> {
    if !entry.redirect_to_https || is_tls {
        return None;
    }
    let host = req
        .headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let location = format!("https://{host}{}", request_url(req));
    Some(redirect(StatusCode::MOVED_PERMANENTLY, &location))
}

/// spec §4.2 step 5 / §4.3.
fn check_cors_preflight(entry: &RoutingEntry, req: &Request<Incoming>) -> Option<Response<ProxyBody>> {
    if req.method() != Method::OPTIONS || !entry.cors {
        return None;
    }
    let headers = cors_headers(req)?;
    let mut resp = Response::new(body::empty());
    *resp.status_mut() = StatusCode::NO_CONTENT;
    *resp.headers_mut() = headers;
    resp.headers_mut()
        .insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    Some(resp)
}

/// Apply the simple cross-origin response headers (spec §4.3) to an already
/// built response, for the "method ≠ OPTIONS, entry.cors, request has
/// Origin" case described alongside the forwarder in spec §4.4.
pub fn simple_cors_headers(entry: &RoutingEntry, req: &Request<Incoming>, resp: &mut Response<ProxyBody>) {
    simple_cors_headers_from_parts(entry, req.method(), req.headers(), resp)
}

/// Same as [`simple_cors_headers`], taking the method/headers directly —
/// used by the forwarder, which has already consumed the `Request` into its
/// parts by the time the upstream response comes back.
pub fn simple_cors_headers_from_parts(
    entry: &RoutingEntry,
    method: &Method,
    headers: &HeaderMap,
    resp: &mut Response<ProxyBody>,
) {
    if *method == Method::OPTIONS || !entry.cors {
        return;
    }
    if let Some(cors) = cors_headers_from(headers) {
        resp.headers_mut().extend(cors);
    }
}

/// Builds the 5 CORS headers from spec §4.3, or `None` if there's no
/// `Origin` header (CORS doesn't apply to same-origin / non-browser requests).
fn cors_headers(req: &Request<Incoming>) -> Option<HeaderMap> {
    cors_headers_from(req.headers())
}

fn cors_headers_from(headers: &HeaderMap) -> Option<HeaderMap> {
    let origin_raw = headers.get(ORIGIN)?.to_str().ok()?;
    let origin = HeaderValue::from_str(&normalize_origin(origin_raw)?).ok()?;
    let mut out = HeaderMap::new();
    out.insert(VARY, HeaderValue::from_static("Origin"));
    out.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    let allow_headers = headers
        .get(ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));
    out.insert(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
    let allow_methods = headers
        .get(ACCESS_CONTROL_REQUEST_METHOD)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CORS_METHODS));
    out.insert(ACCESS_CONTROL_ALLOW_METHODS, allow_methods);
    out.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    Some(out)
}

/// spec §4.3: the allowed origin is "the scheme+host+port of the incoming
/// `Origin`", not the header echoed verbatim — a trailing slash or any path
/// component must be dropped. `Url::port()` already omits the port when it's
/// the scheme's default, so this only ever appends one for a non-default port.
fn normalize_origin(raw: &str) -> Option<String> {
    let url = url::Url::parse(raw.trim()).ok()?;
    let scheme = url.scheme();
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    })
}

/// path + query of the request, e.g. `/path?x=1`, defaulting to `/`.
fn request_url(req: &Request<Incoming>) -> String {
    req.uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string())
}

fn redirect(status: StatusCode, location: &str) -> Response<ProxyBody> {
    let mut resp = Response::new(body::empty());
    *resp.status_mut() = status;
    let value = HeaderValue::from_str(location).unwrap_or_else(|_| HeaderValue::from_static("/"));
    resp.headers_mut().insert(LOCATION, value);
    resp
}

// `Request<Incoming>` can only be constructed from a real connection, so the
// pipeline-level behavior (auth, redirects, CORS preflight) is covered by the
// integration tests in `tests/`; only the pure string helper is unit tested
// here.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_prefix_is_stripped_case_insensitively_with_whitespace() {
        assert_eq!(strip_basic_prefix("Basic   dGVzdDp0ZXN0"), "dGVzdDp0ZXN0");
        assert_eq!(strip_basic_prefix("basic dGVzdDp0ZXN0"), "dGVzdDp0ZXN0");
        assert_eq!(strip_basic_prefix("  Basic abc  "), "abc  ");
        assert_eq!(strip_basic_prefix("abc"), "abc");
    }

    #[test]
    fn normalize_origin_drops_path_and_trailing_slash() {
        assert_eq!(normalize_origin("http://example.com/").unwrap(), "http://example.com");
        assert_eq!(normalize_origin("https://app.example.com/widgets").unwrap(), "https://app.example.com");
    }

    #[test]
    fn normalize_origin_keeps_a_non_default_port() {
        assert_eq!(normalize_origin("http://localhost:5173/").unwrap(), "http://localhost:5173");
    }

    #[test]
    fn normalize_origin_drops_the_default_port() {
        assert_eq!(normalize_origin("https://example.com:443/").unwrap(), "https://example.com");
    }
}
