//! Environment-driven configuration.
//!
//! All knobs are read once at startup from `MCP_SSH_*` environment variables
//! and frozen behind a `LazyLock`. Integer values are whole seconds or bytes;
//! unparseable values fall back to the default with a warning.

use std::sync::LazyLock;
use std::time::Duration;

/// Service-wide settings, resolved from the environment once.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bound on opening an SSH session (`MCP_SSH_CONNECT_TIMEOUT`).
    pub connect_timeout: Duration,
    /// Bound on each remote exec (`MCP_SSH_COMMAND_TIMEOUT`).
    pub command_timeout: Duration,
    /// Bound on waiting for exec output, e.g. the background PID line
    /// (`MCP_SSH_READ_TIMEOUT`).
    pub read_timeout: Duration,
    /// Bound on SFTP put/get (`MCP_SSH_TRANSFER_TIMEOUT`).
    pub transfer_timeout: Duration,
    /// Stdout cap for the first poll after launch, in bytes
    /// (`MCP_SSH_MAX_OUTPUT_SIZE`).
    pub max_output_size: usize,
    /// How long `execute_command` waits before its single status poll, so
    /// quick commands finish in one round-trip (`MCP_SSH_QUICK_WAIT_TIME`).
    pub quick_wait: Duration,
    /// Default chunk size for `get_command_output`, in bytes
    /// (`MCP_SSH_CHUNK_SIZE`).
    pub chunk_size: usize,
    /// Retain SSH sessions across tool calls (`MCP_SSH_CONNECTION_REUSE`).
    pub connection_reuse: bool,
    /// Directory on the remote host where spool files land
    /// (`MCP_SSH_TEMP_DIR`).
    pub temp_dir: String,
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, default, "ignoring unparseable value");
            default
        }),
        Err(_) => default,
    }
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(env_u64(name, default))
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => raw.trim().eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

impl Settings {
    fn from_env() -> Self {
        Self {
            connect_timeout: env_secs("MCP_SSH_CONNECT_TIMEOUT", 30),
            command_timeout: env_secs("MCP_SSH_COMMAND_TIMEOUT", 60),
            read_timeout: env_secs("MCP_SSH_READ_TIMEOUT", 30),
            transfer_timeout: env_secs("MCP_SSH_TRANSFER_TIMEOUT", 300),
            max_output_size: env_u64("MCP_SSH_MAX_OUTPUT_SIZE", 50_000) as usize,
            quick_wait: env_secs("MCP_SSH_QUICK_WAIT_TIME", 5),
            chunk_size: env_u64("MCP_SSH_CHUNK_SIZE", 10_000) as usize,
            connection_reuse: env_bool("MCP_SSH_CONNECTION_REUSE", false),
            temp_dir: std::env::var("MCP_SSH_TEMP_DIR")
                .unwrap_or_else(|_| std::env::temp_dir().to_string_lossy().into_owned()),
        }
    }
}

static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::from_env);

/// The process-wide settings.
pub fn settings() -> &'static Settings {
    &SETTINGS
}
