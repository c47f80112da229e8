//! Small helpers for building [`crate::settings::ProxyBody`] values.
//!
//! Every short-circuit response (redirect, 401, 404, CORS preflight) needs an
//! empty or literal body; the forwarder needs to box a streamed upstream
//! body. Centralizing the `.boxed()`/error-erasure boilerplate here keeps the
//! policy pipeline and forwarder readable.

use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Bytes, Incoming};

use crate::settings::{BoxError, ProxyBody};

/// An empty body, used for redirects, 401s, 404s, and CORS preflights.
pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// A body built from a literal byte string (error pages, short text bodies).
pub fn full(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Box a streaming `Incoming` body (an upstream response, or the incoming
/// request body being piped onward) into the erased `ProxyBody` type.
pub fn from_incoming(body: Incoming) -> ProxyBody {
    body.map_err(|e| Box::new(e) as BoxError).boxed()
}
