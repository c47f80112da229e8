//! Ordered collection of routing entries with host+path lookup (spec §4.1).
//!
//! The open question in spec §9 is answered explicitly: entries are kept in
//! a plain `Vec`, never reduced to a single-slot-per-domain map, because
//! insertion order is part of the tie-break policy and multiple entries can
//! legitimately share a domain (disambiguated by `path`).

use crate::error::ProxyError;
use crate::settings::RoutingEntry;

/// Ordered collection of routing entries. Mutated only by `add`/`reset`-style
/// callers; read on every dispatch.
#[derive(Debug, Default)]
pub struct EntryTable {
    entries: Vec<RoutingEntry>,
}

impl EntryTable {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Append an entry. Insertion order is preserved and is part of the
    /// tie-break policy in `find`.
    pub fn add(&mut self, entry: RoutingEntry) {
        if !entry.has_responder() {
            tracing::warn!(
                domain = %entry.domain,
                "routing entry has no target, redirectToUrl, redirectToDomain, or redirectToHttps; it can never respond successfully"
            );
        }
        self.entries.push(entry);
    }

    /// Drop all entries (spec §3 `reset`).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up at most one entry by host + request path.
    ///
    /// `host` is lowercased and has any trailing `:port` stripped before
    /// matching (per spec §4.1); pass the raw `Host` header value.
    /// `path` is the request URI's `pathname`.
    pub fn find(&self, host: &str, path: &str) -> Result<&RoutingEntry, ProxyError> {
        let host = normalize_host(host);

        // Stage 1: domain filter.
        let eligible: Vec<&RoutingEntry> = self
            .entries
            .iter()
            .filter(|e| domain_matches(&e.domain, &host))
            .collect();

        // Stage 2: disambiguation.
        if eligible.len() == 1 {
            return Ok(eligible[0]);
        }
        if eligible.is_empty() {
            return Err(ProxyError::NoMatch);
        }
        if let Some(e) = eligible.iter().find(|e| match &e.path {
            Some(p) => path == p.as_str() || path.starts_with(&format!("{p}/")),
            None => false,
        }) {
            return Ok(e);
        }
        if let Some(e) = eligible.iter().find(|e| e.path.is_none()) {
            return Ok(e);
        }
        Err(ProxyError::NoMatch)
    }
}

/// Lowercase the host and strip a trailing `:port`.
fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = match host.rfind(':') {
        // Guard against stripping the last segment of a bare IPv6 literal
        // (no brackets, so there's no reliable port delimiter) by only
        // stripping when what follows is a valid port number.
        Some(idx) if host[idx + 1..].chars().all(|c| c.is_ascii_digit()) && idx + 1 < host.len() => {
            &host[..idx]
        }
        _ => host,
    };
    host.to_lowercase()
}

/// Strip the first dot-separated label from a hostname.
fn parent(host: &str) -> Option<&str> {
    host.split_once('.').map(|(_, rest)| rest)
}

/// spec §4.1 stage 1: exact match, or wildcard match against host/parent(host).
fn domain_matches(entry_domain: &str, host: &str) -> bool {
    if entry_domain == host {
        return true;
    }
    if let Some(suffix) = entry_domain.strip_prefix("*.") {
        if suffix == host {
            return true;
        }
        if let Some(p) = parent(host) {
            if suffix == p {
                return true;
            }
        }
    }
    false
}
