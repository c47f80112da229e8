//! HTTP/HTTPS reverse proxy and redirector: host+path routing, a per-entry
//! policy pipeline, streaming forward, WebSocket tunneling, and SNI-driven
//! certificate reload.
//!
//! [`server::Server`] is the entry point: construct it with [`settings::Settings`]
//! and an optional [`hooks::Hooks`] implementation, call `start`, and feed it
//! requests either by letting it own its listeners or by driving
//! `on_request`/`on_upgrade` from an externally owned one.

pub mod body;
pub mod certs;
pub mod entry_table;
pub mod error;
pub mod forward;
pub mod hooks;
pub mod launcher;
pub mod logging;
pub mod policy;
pub mod reload;
pub mod server;
pub mod settings;
pub mod upgrade;

pub use error::ProxyError;
pub use hooks::{Hooks, NoopHooks};
pub use server::Server;
pub use settings::{Fallback, ProxyBody, RoutingEntry, Settings};
