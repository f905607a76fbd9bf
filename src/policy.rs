//! Command safety gate.
//!
//! Every candidate command is checked here before any remote effect. The
//! gate runs in one of three modes: `disabled` (everything non-empty
//! passes), `blacklist` (deny-pattern match rejects), `whitelist` (at least
//! one allow-pattern must match). Patterns are compiled once at startup;
//! invalid patterns are logged and dropped.

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::sync::LazyLock;

const SECURITY_MODE_ENV_VAR: &str = "MCP_SSH_SECURITY_MODE";
const CASE_SENSITIVE_ENV_VAR: &str = "MCP_SSH_CASE_SENSITIVE";
const COMMAND_BLACKLIST_ENV_VAR: &str = "MCP_SSH_COMMAND_BLACKLIST";
const COMMAND_WHITELIST_ENV_VAR: &str = "MCP_SSH_COMMAND_WHITELIST";

/// Default deny patterns, used when no blacklist is configured.
pub const DEFAULT_BLACKLIST_PATTERNS: &[&str] = &[
    r"rm\s+.*-r.*",                      // recursive deletions
    r"rm\s+.*-f.*",                      // forced deletions
    r"dd\s+.*",                          // disk operations
    r"mkfs[.\s].*",                      // format filesystem
    r"fdisk\s+.*",                       // disk partitioning
    r"parted\s+.*",                      // disk partitioning
    r"sudo\s+.*",                        // privilege escalation
    r"su\s+.*",                          // switch user
    r"passwd\s+.*",                      // password changes
    r"iptables\s+.*",                    // firewall rules
    r"ufw\s+.*",                         // ubuntu firewall
    r"systemctl\s+(stop|disable|mask).*", // service control
    r"service\s+(stop|disable).*",       // service control
    r"killall\s+.*",                     // kill all processes
    r"pkill\s+.*",                       // kill processes by name
    r"shutdown\s+.*",                    // system shutdown
    r"reboot\s+.*",                      // system reboot
    r"halt\s+.*",                        // system halt
    r"init\s+[06]",                      // shutdown/reboot via init
    r"mount\s+.*",                       // mount filesystems
    r"umount\s+.*",                      // unmount filesystems
    r"chmod\s+.*777.*",                  // permission broadening
    r"chown\s+.*root.*",                 // ownership change to root
    r".*>\s*/dev/sd[a-z].*",             // write to disk devices
    r".*>\s*/dev/nvme.*",                // write to NVMe devices
    r"crontab\s+-r",                     // remove crontab
    r"history\s+-c",                     // clear command history
    r".*\|\s*sh\s*$",                    // pipe to shell
    r".*\|\s*bash\s*$",                  // pipe to bash
    r"curl\s+.*\|\s*(sh|bash)",          // download and execute
    r"wget\s+.*\|\s*(sh|bash)",          // download and execute
];

/// Gate mode, from `MCP_SSH_SECURITY_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    Disabled,
    Blacklist,
    Whitelist,
}

impl SecurityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityMode::Disabled => "disabled",
            SecurityMode::Blacklist => "blacklist",
            SecurityMode::Whitelist => "whitelist",
        }
    }

    /// An unrecognized mode falls back to `blacklist` (fail closed).
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "disabled" => SecurityMode::Disabled,
            "blacklist" => SecurityMode::Blacklist,
            "whitelist" => SecurityMode::Whitelist,
            other => {
                tracing::error!(mode = other, "unknown security mode, using blacklist");
                SecurityMode::Blacklist
            }
        }
    }
}

/// Snapshot of the gate's configuration for `get_security_info`.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyInfo {
    pub security_mode: String,
    pub case_sensitive: bool,
    pub blacklist_patterns_count: usize,
    pub whitelist_patterns_count: usize,
    pub blacklist_patterns: Vec<String>,
    pub whitelist_patterns: Vec<String>,
}

/// Compiled allow/deny policy. Built once; immutable afterwards.
pub struct CommandPolicy {
    mode: SecurityMode,
    case_sensitive: bool,
    blacklist: Vec<Regex>,
    whitelist: Vec<Regex>,
}

impl CommandPolicy {
    /// Build a policy from explicit sources. `blacklist_src`/`whitelist_src`
    /// are semicolon- or newline-separated pattern lists; an empty blacklist
    /// source selects the defaults, an empty whitelist source stays empty.
    pub fn new(
        mode: SecurityMode,
        case_sensitive: bool,
        blacklist_src: &str,
        whitelist_src: &str,
    ) -> Self {
        let blacklist = compile_patterns(blacklist_src, DEFAULT_BLACKLIST_PATTERNS, case_sensitive);
        let whitelist = compile_patterns(whitelist_src, &[], case_sensitive);
        tracing::info!(
            mode = mode.as_str(),
            case_sensitive,
            blacklist = blacklist.len(),
            whitelist = whitelist.len(),
            "command policy built"
        );
        Self {
            mode,
            case_sensitive,
            blacklist,
            whitelist,
        }
    }

    pub fn from_env() -> Self {
        let mode = SecurityMode::parse(
            &std::env::var(SECURITY_MODE_ENV_VAR).unwrap_or_else(|_| "blacklist".into()),
        );
        let case_sensitive = std::env::var(CASE_SENSITIVE_ENV_VAR)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let blacklist_src = std::env::var(COMMAND_BLACKLIST_ENV_VAR).unwrap_or_default();
        let whitelist_src = std::env::var(COMMAND_WHITELIST_ENV_VAR).unwrap_or_default();
        Self::new(mode, case_sensitive, &blacklist_src, &whitelist_src)
    }

    /// Decide whether `command` may run on `host`.
    ///
    /// Returns `(allowed, reason)`; the reason names the deciding pattern so
    /// rejections are actionable.
    pub fn validate(&self, command: &str, host: &str) -> (bool, String) {
        let command = command.trim();
        if command.is_empty() {
            return (false, "Empty command not allowed".to_string());
        }

        if self.mode == SecurityMode::Disabled {
            return (true, "Security validation disabled".to_string());
        }

        tracing::debug!(host, command = %truncate(command, 100), "validating command");

        match self.mode {
            SecurityMode::Whitelist => self.validate_whitelist(command),
            _ => self.validate_blacklist(command),
        }
    }

    fn validate_whitelist(&self, command: &str) -> (bool, String) {
        if self.whitelist.is_empty() {
            return (
                false,
                "No whitelist patterns configured - all commands blocked".to_string(),
            );
        }
        for pattern in &self.whitelist {
            if pattern.is_match(command) {
                return (
                    true,
                    format!("Command matches whitelist pattern: {}", pattern.as_str()),
                );
            }
        }
        tracing::warn!(command, "command not in whitelist");
        (false, "Command not found in whitelist patterns".to_string())
    }

    fn validate_blacklist(&self, command: &str) -> (bool, String) {
        for pattern in &self.blacklist {
            if pattern.is_match(command) {
                tracing::warn!(command, pattern = pattern.as_str(), "command blocked");
                return (
                    false,
                    format!("Command blocked by security policy: {}", pattern.as_str()),
                );
            }
        }
        (true, "Command passed security validation".to_string())
    }

    pub fn info(&self) -> PolicyInfo {
        PolicyInfo {
            security_mode: self.mode.as_str().to_string(),
            case_sensitive: self.case_sensitive,
            blacklist_patterns_count: self.blacklist.len(),
            whitelist_patterns_count: self.whitelist.len(),
            blacklist_patterns: self.blacklist.iter().map(|p| p.as_str().to_string()).collect(),
            whitelist_patterns: self.whitelist.iter().map(|p| p.as_str().to_string()).collect(),
        }
    }
}

/// Split a pattern source on `;` and newlines and compile each entry.
/// Invalid patterns are logged and dropped; they neither allow nor deny.
fn compile_patterns(src: &str, defaults: &[&str], case_sensitive: bool) -> Vec<Regex> {
    let sources: Vec<&str> = if src.trim().is_empty() {
        defaults.to_vec()
    } else {
        src.split([';', '\n'])
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    };

    let mut patterns = Vec::with_capacity(sources.len());
    for source in sources {
        match RegexBuilder::new(source)
            .case_insensitive(!case_sensitive)
            .build()
        {
            Ok(re) => patterns.push(re),
            Err(e) => tracing::error!(pattern = source, error = %e, "invalid regex pattern"),
        }
    }
    patterns
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

static POLICY: LazyLock<CommandPolicy> = LazyLock::new(CommandPolicy::from_env);

/// The process-wide policy, built from the environment on first use.
pub fn policy() -> &'static CommandPolicy {
    &POLICY
}
