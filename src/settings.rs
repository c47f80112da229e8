//! Data model: `RoutingEntry` and `Settings` (spec §3).
//!
//! Both are plain records the caller builds and hands to [`crate::Server`] —
//! the core never reads a config file itself (that's the launcher's job, see
//! `src/launcher.rs`).

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;

/// Boxed, type-erased response body. Used so a redirect's empty body, a
/// forwarded upstream's streamed body, and a fallback handler's body can all
/// flow through the same `Response<ProxyBody>` signature.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type ProxyBody = BoxBody<Bytes, BoxError>;

/// An externally-supplied handler invoked when no routing entry matches a
/// request (spec §4.2 final step, §6 "Fallback handler contract").
///
/// The fallback is responsible for fully completing the response; the core
/// does not inspect or modify what it returns.
#[async_trait::async_trait]
pub trait Fallback: Send + Sync {
    async fn handle(
        &self,
        req: http::Request<hyper::body::Incoming>,
    ) -> http::Response<ProxyBody>;
}

/// A routing rule: domain + optional path + action (forward or redirect) +
/// modifiers (auth, CORS, headers, preserveHost). Immutable once added to an
/// [`crate::entry_table::EntryTable`].
#[derive(Debug, Clone)]
pub struct RoutingEntry {
    /// Exact host, or `*.example.com` wildcard form.
    pub domain: String,
    /// Upstream base: scheme, host, optional port, optional base path.
    pub target: Option<url::Url>,
    /// Path prefix that selects this entry among entries sharing a domain.
    /// Stripped before forwarding.
    pub path: Option<String>,
    /// Expected Base64-encoded `user:password` for HTTP Basic auth.
    pub authorization: Option<String>,
    pub redirect_to_https: bool,
    pub redirect_to_url: Option<String>,
    pub redirect_to_domain: Option<String>,
    /// Enables CORS preflight (204) and response-origin echoing on simple requests.
    pub cors: bool,
    /// Pipe-separated `key: value` pairs injected into the upstream request.
    pub headers: Option<String>,
    /// If true, upstream `Host` is the incoming `Host`; else it's `target`'s host[:port].
    pub preserve_host: bool,
}

impl RoutingEntry {
    pub fn builder(domain: impl Into<String>) -> RoutingEntryBuilder {
        RoutingEntryBuilder::new(domain)
    }

    /// A wildcard `domain` begins with `*.`.
    pub fn is_wildcard(&self) -> bool {
        self.domain.starts_with("*.")
    }

    /// spec §3 invariant: an entry needs at least one way to produce a
    /// successful response. Implementers MAY reject at insertion — this
    /// crate logs a warning instead of rejecting, since `redirectToHttps`
    /// alone is a valid (if connection-dependent) responder.
    pub fn has_responder(&self) -> bool {
        self.target.is_some()
            || self.redirect_to_url.is_some()
            || self.redirect_to_domain.is_some()
            || self.redirect_to_https
    }
}

/// Builder for [`RoutingEntry`], mirroring the defaults spec §3 implies for
/// a record with mostly-optional fields.
#[derive(Debug, Clone)]
pub struct RoutingEntryBuilder {
    entry: RoutingEntry,
}

impl RoutingEntryBuilder {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            entry: RoutingEntry {
                domain: domain.into(),
                target: None,
                path: None,
                authorization: None,
                redirect_to_https: false,
                redirect_to_url: None,
                redirect_to_domain: None,
                cors: false,
                headers: None,
                preserve_host: false,
            },
        }
    }

    pub fn target(mut self, target: url::Url) -> Self {
        self.entry.target = Some(target);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.entry.path = Some(path.into());
        self
    }

    pub fn authorization(mut self, auth: impl Into<String>) -> Self {
        self.entry.authorization = Some(auth.into());
        self
    }

    pub fn redirect_to_https(mut self, yes: bool) -> Self {
        self.entry.redirect_to_https = yes;
        self
    }

    pub fn redirect_to_url(mut self, url: impl Into<String>) -> Self {
        self.entry.redirect_to_url = Some(url.into());
        self
    }

    pub fn redirect_to_domain(mut self, domain: impl Into<String>) -> Self {
        self.entry.redirect_to_domain = Some(domain.into());
        self
    }

    pub fn cors(mut self, yes: bool) -> Self {
        self.entry.cors = yes;
        self
    }

    pub fn headers(mut self, headers: impl Into<String>) -> Self {
        self.entry.headers = Some(headers.into());
        self
    }

    pub fn preserve_host(mut self, yes: bool) -> Self {
        self.entry.preserve_host = yes;
        self
    }

    pub fn build(self) -> RoutingEntry {
        self.entry
    }
}

/// Process-wide configuration (spec §3). Constructed by the caller, never
/// read from disk by the core itself.
#[derive(Clone)]
pub struct Settings {
    /// Directory whose direct subdirectories are domain names.
    pub certificates_folder: PathBuf,
    /// Filename within each domain subdirectory holding the cert chain.
    pub certificate_file: String,
    /// Filename within each domain subdirectory holding the private key.
    pub key_file: String,
    /// 0 disables the plaintext HTTP listener.
    pub http_port: u16,
    /// 0 disables the TLS listener.
    pub https_port: u16,
    /// `None`/`Duration::ZERO` disables the reload timer.
    pub auto_reload: Option<Duration>,
    /// Bind address for both listeners.
    pub host: IpAddr,
    /// Handler invoked when no entry matches.
    pub fallback: Option<Arc<dyn Fallback>>,
    /// Initial routing entries, inserted by `Server::start`.
    pub proxies: Vec<RoutingEntry>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("certificates_folder", &self.certificates_folder)
            .field("certificate_file", &self.certificate_file)
            .field("key_file", &self.key_file)
            .field("http_port", &self.http_port)
            .field("https_port", &self.https_port)
            .field("auto_reload", &self.auto_reload)
            .field("host", &self.host)
            .field("fallback", &self.fallback.is_some())
            .field("proxies", &self.proxies.len())
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            certificates_folder: PathBuf::from("./certificates"),
            certificate_file: "fullchain.pem".to_string(),
            key_file: "privkey.pem".to_string(),
            http_port: 80,
            https_port: 443,
            auto_reload: None,
            host: "0.0.0.0".parse().unwrap(),
            fallback: None,
            proxies: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_to_https_alone_is_a_responder() {
        let e = RoutingEntry::builder("example.com")
            .redirect_to_https(true)
            .build();
        assert!(e.has_responder());
    }

    #[test]
    fn entry_with_nothing_is_not_a_responder() {
        let e = RoutingEntry::builder("example.com").build();
        assert!(!e.has_responder());
    }

    #[test]
    fn wildcard_detection() {
        let e = RoutingEntry::builder("*.example.com").build();
        assert!(e.is_wildcard());
        let e = RoutingEntry::builder("example.com").build();
        assert!(!e.is_wildcard());
    }

    #[test]
    fn settings_defaults_match_spec() {
        let s = Settings::default();
        assert_eq!(s.certificate_file, "fullchain.pem");
        assert_eq!(s.key_file, "privkey.pem");
        assert_eq!(s.host, "0.0.0.0".parse::<IpAddr>().unwrap());
    }
}
