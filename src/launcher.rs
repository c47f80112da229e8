//! Launcher configuration file (`proxyd.toml`): TOML-shaped DTOs that convert
//! into [`Settings`] and [`RoutingEntry`] values. Explicitly not part of the
//! core's contract (spec §1 "Out of scope... the core never reads
//! configuration files itself"); only `src/bin/proxyd.rs` calls this.
//!
//! Grounded on the teacher's `serve/config.rs::{ServeConfig, Mapping}`: a
//! plain `Serialize`/`Deserialize` DTO with `#[serde(default)]` fields, a
//! `toml::from_str`/`std::fs::read_to_string` load path, and a conversion
//! step from the wire shape into the domain type.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::settings::{RoutingEntry, Settings};

/// Top-level shape of `proxyd.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LauncherConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub proxies: Vec<ProxyEntrySection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub certificates_folder: PathBuf,
    pub certificate_file: String,
    pub key_file: String,
    pub http_port: u16,
    pub https_port: u16,
    /// Milliseconds; `0` disables scheduled reload.
    pub auto_reload_ms: u64,
    pub host: IpAddr,
}

impl Default for ServerSection {
    fn default() -> Self {
        let defaults = Settings::default();
        Self {
            certificates_folder: defaults.certificates_folder,
            certificate_file: defaults.certificate_file,
            key_file: defaults.key_file,
            http_port: defaults.http_port,
            https_port: defaults.https_port,
            auto_reload_ms: 0,
            host: defaults.host,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxyEntrySection {
    pub domain: String,
    pub target: Option<String>,
    pub path: Option<String>,
    pub authorization: Option<String>,
    pub redirect_to_https: bool,
    pub redirect_to_url: Option<String>,
    pub redirect_to_domain: Option<String>,
    pub cors: bool,
    pub headers: Option<String>,
    pub preserve_host: bool,
}

/// Read and parse `path`, converting into a [`Settings`] ready for
/// [`crate::server::Server::new`]. `fallback` is supplied by the caller since
/// it's a trait object, not something TOML can express.
pub fn load(path: &std::path::Path) -> Result<Settings> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read launcher config: {}", path.display()))?;
    let config: LauncherConfig =
        toml::from_str(&raw).with_context(|| format!("parse launcher config: {}", path.display()))?;
    into_settings(config)
}

fn into_settings(config: LauncherConfig) -> Result<Settings> {
    let server = config.server;
    let mut proxies = Vec::with_capacity(config.proxies.len());
    for section in config.proxies {
        proxies.push(into_entry(section)?);
    }

    Ok(Settings {
        certificates_folder: server.certificates_folder,
        certificate_file: server.certificate_file,
        key_file: server.key_file,
        http_port: server.http_port,
        https_port: server.https_port,
        auto_reload: (server.auto_reload_ms > 0)
            .then(|| Duration::from_millis(server.auto_reload_ms)),
        host: server.host,
        fallback: None,
        proxies,
    })
}

fn into_entry(section: ProxyEntrySection) -> Result<RoutingEntry> {
    let mut builder = RoutingEntry::builder(section.domain);
    if let Some(target) = section.target {
        let url = url::Url::parse(&target).with_context(|| format!("invalid target url: {target}"))?;
        builder = builder.target(url);
    }
    if let Some(path) = section.path {
        builder = builder.path(path);
    }
    if let Some(auth) = section.authorization {
        builder = builder.authorization(auth);
    }
    builder = builder.redirect_to_https(section.redirect_to_https);
    if let Some(url) = section.redirect_to_url {
        builder = builder.redirect_to_url(url);
    }
    if let Some(domain) = section.redirect_to_domain {
        builder = builder.redirect_to_domain(domain);
    }
    builder = builder.cors(section.cors);
    if let Some(headers) = section.headers {
        builder = builder.headers(headers);
    }
    builder = builder.preserve_host(section.preserve_host);
    Ok(builder.build())
}
