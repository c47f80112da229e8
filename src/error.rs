//! Dispatch-time error taxonomy and its fixed HTTP disposition.
//!
//! Setup-time failures (certificate loading, config parsing) use `anyhow`
//! the way the teacher's `cert.rs`/`config.rs` do. Dispatch-time failures
//! need to carry *which* HTTP status they map to, so they get a closed enum
//! instead.

use http::StatusCode;
use std::fmt;

/// Error raised while dispatching a single request through the policy
/// pipeline or forwarder. Each variant corresponds to one of the dispositions
/// enumerated in spec §7.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// No routing entry matched the host/path.
    #[error("no entry matches host")]
    NoMatch,

    /// `entry.authorization` is set and the request's credentials didn't match.
    #[error("missing or invalid basic auth credentials")]
    Unauthorized,

    /// Upstream connect failed with ECONNREFUSED or equivalent.
    #[error("upstream connection refused: {0}")]
    UpstreamRefused(String),

    /// Upstream connection was reset mid-flight.
    #[error("upstream connection reset: {0}")]
    UpstreamReset(String),

    /// Any other upstream transport error, before response headers were sent.
    #[error("upstream transport error: {0}")]
    UpstreamOther(String),

    /// Upstream transport error after response headers were already sent;
    /// there is no status left to rewrite, the connection is torn down.
    #[error("upstream transport error after headers sent: {0}")]
    UpstreamAfterHeaders(String),

    /// The request claimed to be a WebSocket upgrade but failed validation
    /// (wrong method, missing/invalid `Upgrade` header, or no matching entry).
    #[error("invalid upgrade request")]
    InvalidUpgrade,

    /// A per-domain certificate failed to load during a reload pass. The
    /// reload continues for other domains; this is reported on the `error`
    /// hook, never propagated to a request.
    #[error("failed to load certificate for {domain}: {source}")]
    CertLoad {
        domain: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ProxyError {
    /// The HTTP status this error maps to when it can still be written as a
    /// fresh response (i.e. headers have not yet been sent downstream).
    ///
    /// `UpstreamAfterHeaders` and `CertLoad` have no meaningful status: the
    /// former tears the connection down instead of writing a status, the
    /// latter never reaches a request at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ProxyError::NoMatch => Some(StatusCode::NOT_FOUND),
            ProxyError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            ProxyError::UpstreamRefused(_) | ProxyError::UpstreamReset(_) => {
                Some(StatusCode::BAD_GATEWAY)
            }
            ProxyError::UpstreamOther(_) => Some(StatusCode::INTERNAL_SERVER_ERROR),
            ProxyError::UpstreamAfterHeaders(_) | ProxyError::CertLoad { .. } => None,
            ProxyError::InvalidUpgrade => None,
        }
    }

    /// Classify a `hyper`/`hyper-util` client transport error per spec §4.4:
    /// connection-refused/reset errors become `UpstreamRefused`/`UpstreamReset`,
    /// everything else becomes `UpstreamOther`.
    pub fn from_transport<E: fmt::Display>(err: &E, io_kind: Option<std::io::ErrorKind>) -> Self {
        let msg = err.to_string();
        match io_kind {
            Some(std::io::ErrorKind::ConnectionRefused) => ProxyError::UpstreamRefused(msg),
            Some(std::io::ErrorKind::ConnectionReset) => ProxyError::UpstreamReset(msg),
            _ => ProxyError::UpstreamOther(msg),
        }
    }
}
