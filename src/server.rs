//! Server lifecycle and Listener Pair (spec §3 "Server lifecycle", §4.8).
//!
//! Grounded on the teacher's `serve/proxy.rs::run_proxy` accept-loop shape
//! (bind, spawn a per-connection task, `HttpBuilder::serve_connection_with_upgrades`)
//! generalized from a single fixed pair of ports into `Settings`-driven
//! listeners, and from the teacher's single always-running `run_proxy` into
//! an explicit `start`/`reset`/`reload`/`add` lifecycle an embedder can drive
//! (spec §3, §6 "Embedded handler surface").

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use http::{Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::body;
use crate::certs::{CertificateStore, SniResolver};
use crate::entry_table::EntryTable;
use crate::error::ProxyError;
use crate::forward::Forwarder;
use crate::hooks::Hooks;
use crate::policy;
use crate::reload::ReloadScheduler;
use crate::settings::{ProxyBody, RoutingEntry, Settings};
use crate::upgrade;

/// The request-dispatch engine: owns the entry table, certificate store,
/// forwarder, and (while running) the listener tasks and reload timer.
///
/// Constructed once via [`Server::new`], which returns an `Arc<Server>` since
/// every lifecycle method that spawns background work needs to hand out
/// clones of `self` to those tasks.
pub struct Server {
    settings: Arc<Settings>,
    entries: Mutex<EntryTable>,
    certs: Arc<CertificateStore>,
    forwarder: Forwarder,
    hooks: Arc<dyn Hooks>,
    scheduler: Mutex<Option<ReloadScheduler>>,
    listener_tasks: Mutex<Vec<JoinHandle<()>>>,
    http_addr: Mutex<Option<SocketAddr>>,
    https_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
    pub fn new(settings: Settings, hooks: Arc<dyn Hooks>) -> Arc<Self> {
        Arc::new(Self {
            settings: Arc::new(settings),
            entries: Mutex::new(EntryTable::new()),
            certs: Arc::new(CertificateStore::new()),
            forwarder: Forwarder::new(),
            hooks,
            scheduler: Mutex::new(None),
            listener_tasks: Mutex::new(Vec::new()),
            http_addr: Mutex::new(None),
            https_addr: Mutex::new(None),
        })
    }

    /// The plaintext listener's bound address, once `start` has opened it.
    /// Useful for tests and for settings that bind an ephemeral port (`0`).
    pub async fn http_addr(&self) -> Option<SocketAddr> {
        *self.http_addr.lock().await
    }

    /// The TLS listener's bound address, once `start` has opened it.
    pub async fn https_addr(&self) -> Option<SocketAddr> {
        *self.https_addr.lock().await
    }

    /// spec §3 `start`: load certificates, install the reload timer, open
    /// listeners, and insert the settings' initial entries.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        for entry in self.settings.proxies.iter().cloned() {
            self.add(entry).await;
        }

        self.reload().await?;

        let scheduler = ReloadScheduler::start(
            self.settings.auto_reload.filter(|_| self.settings.https_port != 0),
            Arc::clone(&self.certs),
            Arc::clone(&self.settings),
            Arc::clone(&self.hooks),
        );
        *self.scheduler.lock().await = scheduler;

        let mut tasks = Vec::new();
        if self.settings.http_port != 0 {
            tasks.push(self.spawn_http_listener().await?);
        }
        if self.settings.https_port != 0 {
            tasks.push(self.spawn_https_listener().await?);
        }
        *self.listener_tasks.lock().await = tasks;

        Ok(())
    }

    /// spec §3 `reset`: close listeners, clear entries and certificates,
    /// cancel the reload timer. Idempotent and safe to call concurrently
    /// with itself (spec §5).
    pub async fn reset(&self) {
        for task in self.listener_tasks.lock().await.drain(..) {
            task.abort();
        }
        if let Some(scheduler) = self.scheduler.lock().await.take() {
            scheduler.stop();
        }
        self.entries.lock().await.clear();
        self.certs.clear();
        *self.http_addr.lock().await = None;
        *self.https_addr.lock().await = None;
    }

    /// spec §3 `reload` / §4.6: recompute the certificate map. No-op when no
    /// TLS listener is configured.
    pub async fn reload(&self) -> anyhow::Result<()> {
        if self.settings.https_port == 0 {
            return Ok(());
        }
        self.certs
            .reload(
                &self.settings.certificates_folder,
                &self.settings.certificate_file,
                &self.settings.key_file,
                Arc::clone(&self.hooks),
            )
            .await
    }

    /// spec §3 `add(entry)`.
    pub async fn add(&self, entry: RoutingEntry) {
        self.entries.lock().await.add(entry);
    }

    /// spec §6 "Embedded handler surface" `onRequest`: dispatch a single
    /// request through entry lookup, the upgrade check, and the policy
    /// pipeline / forwarder. Usable standalone by a caller embedding this
    /// dispatcher inside its own listener.
    pub async fn on_request(&self, req: Request<Incoming>, is_tls: bool) -> Response<ProxyBody> {
        let host = incoming_host(&req);
        let path = req.uri().path().to_string();

        let entry = {
            let entries = self.entries.lock().await;
            entries.find(&host, &path).ok().cloned()
        };

        let Some(entry) = entry else {
            return self.dispatch_unmatched(req).await;
        };

        if upgrade::is_websocket_upgrade(req.method(), req.headers()) {
            return self.on_upgrade(entry, req, &host, is_tls).await;
        }

        if let Some(resp) = policy::evaluate(&entry, &req, is_tls) {
            return resp;
        }

        match self.forwarder.forward(&entry, req, &host, is_tls).await {
            Ok(resp) => resp,
            Err(err) => self.error_response(err),
        }
    }

    /// spec §6 "Embedded handler surface" `onUpgrade`: run the upgrade
    /// tunnel for a request already matched to `entry`. `on_request` reaches
    /// this internally; it's also exposed directly for an embedder that owns
    /// its own listener and wants to route upgrade attempts itself.
    pub async fn on_upgrade(
        &self,
        entry: RoutingEntry,
        req: Request<Incoming>,
        host: &str,
        is_tls: bool,
    ) -> Response<ProxyBody> {
        match upgrade::upgrade(&self.forwarder, &entry, req, host, is_tls).await {
            Ok(resp) => resp,
            Err(err) => self.error_response(err),
        }
    }

    /// spec §4.2 final step: no entry matched. Hyper's single request/response
    /// model has no way to "close the channel" for one request on a
    /// keep-alive connection, so an unmatched upgrade attempt is answered the
    /// same way as an unmatched ordinary request.
    async fn dispatch_unmatched(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        if let Some(fallback) = &self.settings.fallback {
            return fallback.handle(req).await;
        }
        let mut resp = Response::new(body::empty());
        *resp.status_mut() = StatusCode::NOT_FOUND;
        resp
    }

    fn error_response(&self, err: ProxyError) -> Response<ProxyBody> {
        self.hooks.on_proxy_error(&err);
        tracing::warn!(error = %err, "dispatch error");
        let status = match &err {
            ProxyError::InvalidUpgrade => StatusCode::BAD_REQUEST,
            _ => err.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        };
        let mut resp = Response::new(body::empty());
        *resp.status_mut() = status;
        resp
    }

    async fn spawn_http_listener(self: &Arc<Self>) -> anyhow::Result<JoinHandle<()>> {
        let addr = SocketAddr::new(self.settings.host, self.settings.http_port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind http listener on {addr}"))?;
        let bound = listener.local_addr().context("http listener local_addr")?;
        *self.http_addr.lock().await = Some(bound);
        tracing::info!(addr = %bound, "http listener bound");

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(s) => s,
                    Err(err) => {
                        tracing::warn!(error = %err, "http accept error");
                        continue;
                    }
                };
                if let Err(err) = tune_tunnel_socket(&stream) {
                    tracing::debug!(error = %err, "http socket tuning failed");
                }
                let this = Arc::clone(&this);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| {
                        let this = Arc::clone(&this);
                        async move { Ok::<_, Infallible>(this.on_request(req, false).await) }
                    });
                    if let Err(err) = HttpBuilder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(io, service)
                        .await
                    {
                        tracing::debug!(error = %err, "http connection error");
                    }
                });
            }
        }))
    }

    async fn spawn_https_listener(self: &Arc<Self>) -> anyhow::Result<JoinHandle<()>> {
        let addr = SocketAddr::new(self.settings.host, self.settings.https_port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind https listener on {addr}"))?;
        let bound = listener.local_addr().context("https listener local_addr")?;
        *self.https_addr.lock().await = Some(bound);
        tracing::info!(addr = %bound, "https listener bound");

        let resolver = Arc::new(SniResolver::new(Arc::clone(&self.certs), Arc::clone(&self.hooks)));
        let mut tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(resolver);
        tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(s) => s,
                    Err(err) => {
                        tracing::warn!(error = %err, "https accept error");
                        continue;
                    }
                };
                if let Err(err) = tune_tunnel_socket(&stream) {
                    tracing::debug!(error = %err, "https socket tuning failed");
                }
                let acceptor = acceptor.clone();
                let this = Arc::clone(&this);
                tokio::spawn(async move {
                    // A missing/non-matching SNI fails the handshake here,
                    // since `SniResolver::resolve` returns `None` (spec §4.8).
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(s) => s,
                        Err(err) => {
                            tracing::debug!(error = %err, "tls handshake failed");
                            return;
                        }
                    };
                    let io = TokioIo::new(tls_stream);
                    let service = service_fn(move |req| {
                        let this = Arc::clone(&this);
                        async move { Ok::<_, Infallible>(this.on_request(req, true).await) }
                    });
                    if let Err(err) = HttpBuilder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(io, service)
                        .await
                    {
                        tracing::debug!(error = %err, "https connection error");
                    }
                });
            }
        }))
    }
}

/// spec §4.5: every accepted connection can turn into an upgrade tunnel, so
/// both listeners tune the socket at accept time rather than only once a
/// request asks to upgrade. `set_nodelay` is native to `tokio::net::TcpStream`;
/// keepalive has no such method, hence the `socket2::SockRef` detour. No idle
/// timeout is configured anywhere in this stack (`HttpBuilder` is built with
/// its defaults), so there is none to disable here.
fn tune_tunnel_socket(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let sock_ref = socket2::SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(60));
    sock_ref.set_tcp_keepalive(&keepalive)
}

/// The raw `Host` header (or request-target authority as a fallback),
/// trimmed. Left un-lowercased and with any port intact: the forwarder and
/// entry table each normalize it the way they need.
fn incoming_host(req: &Request<Incoming>) -> String {
    req.headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .unwrap_or("")
        .trim()
        .to_string()
}
