//! Observation interface (spec §9: "Replace the event emitter with a small
//! observation interface"; spec §6 "Event channel").
//!
//! Hooks are optional — a [`Server`](crate::server::Server) with no hooks
//! installed behaves identically, just silently. All methods have no-op
//! defaults so callers only implement what they care about.

use crate::error::ProxyError;

/// Optional observation hooks, replacing the source's `sni`/`proxyerror`/
/// `error` event emitter with a plain trait. No consumer is required.
pub trait Hooks: Send + Sync {
    /// The SNI handshake resolved a certificate for this root domain.
    fn on_sni(&self, _root_domain: &str) {}

    /// A per-domain certificate failed to load during a reload pass. The
    /// reload continues for the remaining domains.
    fn on_cert_error(&self, _domain: &str, _err: &anyhow::Error) {}

    /// Any transport or upgrade error encountered while forwarding or
    /// tunneling a request.
    fn on_proxy_error(&self, _err: &ProxyError) {}
}

/// The default [`Hooks`] implementation: observes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl Hooks for NoopHooks {}
