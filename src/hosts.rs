//! Host alias file parsing (`~/.ssh/config`).
//!
//! The parser is line-oriented: `Host <name>` opens a stanza, subsequent
//! `key value` or `key = value` lines populate it with lower-cased keys.
//! Wildcard stanzas (`*` or `?` in the pattern) are skipped entirely; the
//! service only connects to hosts it can name exactly.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One non-wildcard `Host` stanza from the alias file.
#[derive(Debug, Clone, Default)]
pub struct HostStanza {
    pub name: String,
    attrs: HashMap<String, String>,
}

impl HostStanza {
    /// Raw attribute lookup by lower-cased key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// `HostName`, falling back to the alias itself.
    pub fn hostname(&self) -> String {
        self.attrs
            .get("hostname")
            .cloned()
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn user(&self) -> Option<String> {
        self.attrs.get("user").cloned()
    }

    /// `Port`, defaulting to 22 on absence or garbage.
    pub fn port(&self) -> u16 {
        self.attrs
            .get("port")
            .and_then(|p| p.parse().ok())
            .unwrap_or(22)
    }

    /// `IdentityFile` with surrounding quotes stripped.
    pub fn identity_file(&self) -> Option<String> {
        self.attrs
            .get("identityfile")
            .map(|f| f.trim_matches(['"', '\'']).to_string())
    }
}

/// Host descriptor served by the `ssh://hosts` resource.
#[derive(Debug, Clone, Serialize)]
pub struct HostEntry {
    pub name: String,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub port: u16,
}

/// Path of the user-level alias file.
pub fn config_path() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".ssh").join("config")
}

/// Parse alias-file content into stanzas, preserving file order.
pub fn parse_config(content: &str) -> Vec<HostStanza> {
    let mut stanzas: Vec<HostStanza> = Vec::new();
    let mut current: Option<usize> = None;

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.to_lowercase().starts_with("host ") {
            let pattern = line[5..].trim();
            if pattern.contains('*') || pattern.contains('?') {
                current = None;
                continue;
            }
            stanzas.push(HostStanza {
                name: pattern.to_string(),
                attrs: HashMap::new(),
            });
            current = Some(stanzas.len() - 1);
            continue;
        }

        let Some(idx) = current else { continue };
        let (key, value) = if let Some((k, v)) = line.split_once('=') {
            (k, v)
        } else if let Some((k, v)) = line.split_once(char::is_whitespace) {
            (k, v)
        } else {
            continue;
        };
        stanzas[idx]
            .attrs
            .insert(key.trim().to_lowercase(), value.trim().to_string());
    }

    stanzas
}

/// Read and parse one alias file.
pub fn parse_config_file(path: &Path) -> std::io::Result<Vec<HostStanza>> {
    Ok(parse_config(&std::fs::read_to_string(path)?))
}

/// Read and parse the alias file. A missing or unreadable file yields an
/// empty list, logged at warn level, so the caller fails per-host instead.
pub fn load_hosts() -> Vec<HostStanza> {
    let path = config_path();
    match parse_config_file(&path) {
        Ok(stanzas) => stanzas,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read SSH config");
            Vec::new()
        }
    }
}

/// Look up a single alias, re-reading the file.
pub fn find_host(alias: &str) -> Option<HostStanza> {
    load_hosts().into_iter().find(|s| s.name == alias)
}

/// All hosts as resource descriptors, in file order.
pub fn host_entries() -> Vec<HostEntry> {
    load_hosts()
        .into_iter()
        .map(|s| HostEntry {
            hostname: s.hostname(),
            user: s.user(),
            port: s.port(),
            name: s.name,
        })
        .collect()
}
