//! SSH session layer.
//!
//! Opens authenticated sessions to hosts named in `~/.ssh/config`, runs
//! remote commands over exec channels with a wall-clock timeout, and moves
//! files over SFTP. Commands containing shell metacharacters are wrapped
//! before execution: `bash -c <quoted>` for the common case, a quoted
//! heredoc when the command's own quoting would defeat single-quote
//! escaping.

use crate::config;
use crate::hosts;
use russh::ChannelMsg;
use russh::client::{self, Handle};
use russh::keys::{self, PrivateKeyWithHashAlg};
use russh_sftp::client::SftpSession;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Result of one remote exec.
///
/// `timed_out` means the wall-clock bound expired before the remote side
/// reported exit status; `stdout`/`stderr` then hold whatever arrived first.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Hosts come from the user's own config file; trust them the way
        // paramiko's AutoAddPolicy would.
        Ok(true)
    }
}

/// An authenticated SSH session to one host alias.
pub struct SshSession {
    handle: Handle<ClientHandler>,
    host: String,
}

impl SshSession {
    /// Open a session to `alias`, resolving it through the host alias file.
    ///
    /// Authentication is key-based: the stanza's `IdentityFile`, falling back
    /// to `SSH_KEY_FILE` and then `~/.ssh/id_rsa`. The key is loaded without
    /// a passphrase first; if that fails and `SSH_KEY_PHRASE` is set, loading
    /// is retried with it.
    pub async fn connect(alias: &str) -> Result<Self, String> {
        let stanza = hosts::find_host(alias)
            .ok_or_else(|| format!("Host '{alias}' not found in SSH config"))?;

        let settings = config::settings();
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        });

        let hostname = stanza.hostname();
        let port = stanza.port();
        let user = stanza
            .user()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "root".to_string());

        tracing::debug!(alias, hostname = %hostname, port, user = %user, "connecting");

        let connect = client::connect(ssh_config, (hostname.as_str(), port), ClientHandler);
        let mut handle = tokio::time::timeout(settings.connect_timeout, connect)
            .await
            .map_err(|_| {
                format!(
                    "Connection to {hostname}:{port} timed out after {}s",
                    settings.connect_timeout.as_secs()
                )
            })?
            .map_err(|e| format!("Failed to connect to {hostname}:{port}: {e}"))?;

        let key_path = identity_path(&stanza);
        let key = load_identity(&key_path)?;

        // RSA keys must be signed with the server's preferred rsa-sha2 hash;
        // legacy ssh-rsa (SHA1) signatures are widely rejected.
        let hash_alg = handle.best_supported_rsa_hash().await.ok().flatten().flatten();
        let auth = handle
            .authenticate_publickey(&user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
            .await
            .map_err(|e| format!("Key authentication failed: {e}"))?;
        if !auth.success() {
            return Err(format!(
                "Authentication to {alias} failed: key {} was not accepted",
                key_path.display()
            ));
        }

        tracing::info!(alias, "connected");
        Ok(Self {
            handle,
            host: alias.to_string(),
        })
    }

    /// Run `command` verbatim on the remote side, bounded by `timeout`.
    ///
    /// On timeout the partial output collected so far is returned with
    /// `timed_out` set and the channel is closed so the session stays
    /// usable; a timeout is not an error at this layer.
    pub async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput, String> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| format!("Failed to open channel: {e}"))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| format!("Failed to execute command: {e}"))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code: Option<u32> = None;

        let waited = tokio::time::timeout(timeout, async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => {
                        stdout.extend_from_slice(&data);
                    }
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        // ext == 1 is stderr in the SSH protocol.
                        if ext == 1 {
                            stderr.extend_from_slice(&data);
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = Some(exit_status);
                    }
                    Some(ChannelMsg::Eof) => {
                        if exit_code.is_some() {
                            break;
                        }
                    }
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
        })
        .await;

        let timed_out = waited.is_err();
        if timed_out {
            tracing::warn!(
                host = %self.host,
                timeout_secs = timeout.as_secs(),
                partial_stdout = stdout.len(),
                "remote command timed out, returning partial output"
            );
        }

        let _ = channel.close().await;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: exit_code.map(|c| c as i32),
            timed_out,
        })
    }

    /// Run a user-supplied command, applying shell wrapping where needed,
    /// bounded by the read timeout.
    pub async fn exec_command(&self, command: &str) -> Result<ExecOutput, String> {
        let prepared = prepare_command(command);
        self.exec(&prepared, config::settings().read_timeout).await
    }

    async fn sftp(&self) -> Result<SftpSession, String> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| format!("Failed to open channel: {e}"))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| format!("Failed to request SFTP subsystem: {e}"))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| format!("Failed to start SFTP session: {e}"))
    }

    /// Upload a local file over SFTP. Returns the byte count transferred
    /// (the local file size).
    pub async fn put(&self, local: &str, remote: &str, timeout: Duration) -> Result<u64, String> {
        tokio::time::timeout(timeout, self.put_inner(local, remote))
            .await
            .map_err(|_| format!("File transfer timed out after {}s", timeout.as_secs()))?
    }

    async fn put_inner(&self, local: &str, remote: &str) -> Result<u64, String> {
        let meta = tokio::fs::metadata(local)
            .await
            .map_err(|_| format!("Local file does not exist: {local}"))?;
        if !meta.is_file() {
            return Err(format!("Local path is not a file: {local}"));
        }

        let sftp = self.sftp().await?;
        let mut src = tokio::fs::File::open(local)
            .await
            .map_err(|e| format!("Failed to open local file {local}: {e}"))?;
        let mut dst = sftp
            .create(remote)
            .await
            .map_err(|e| format!("Failed to create remote file {remote}: {e}"))?;
        tokio::io::copy(&mut src, &mut dst)
            .await
            .map_err(|e| format!("Upload to {remote} failed: {e}"))?;
        dst.shutdown()
            .await
            .map_err(|e| format!("Failed to finalize remote file {remote}: {e}"))?;

        Ok(meta.len())
    }

    /// Download a remote file over SFTP. Returns the byte count transferred
    /// (the final local file size).
    pub async fn get(&self, remote: &str, local: &str, timeout: Duration) -> Result<u64, String> {
        tokio::time::timeout(timeout, self.get_inner(remote, local))
            .await
            .map_err(|_| format!("File transfer timed out after {}s", timeout.as_secs()))?
    }

    async fn get_inner(&self, remote: &str, local: &str) -> Result<u64, String> {
        let sftp = self.sftp().await?;
        sftp.metadata(remote)
            .await
            .map_err(|_| format!("Remote file does not exist: {remote}"))?;

        let mut src = sftp
            .open(remote)
            .await
            .map_err(|e| format!("Failed to open remote file {remote}: {e}"))?;
        let mut dst = tokio::fs::File::create(local)
            .await
            .map_err(|e| format!("Failed to create local file {local}: {e}"))?;
        tokio::io::copy(&mut src, &mut dst)
            .await
            .map_err(|e| format!("Download from {remote} failed: {e}"))?;
        dst.flush()
            .await
            .map_err(|e| format!("Failed to flush local file {local}: {e}"))?;

        let meta = tokio::fs::metadata(local)
            .await
            .map_err(|e| format!("Failed to stat local file {local}: {e}"))?;
        Ok(meta.len())
    }
}

/// Resolve the identity file for a stanza: `IdentityFile`, then
/// `SSH_KEY_FILE`, then `~/.ssh/id_rsa`, with `~` expanded.
fn identity_path(stanza: &hosts::HostStanza) -> PathBuf {
    let raw = stanza
        .identity_file()
        .or_else(|| std::env::var("SSH_KEY_FILE").ok())
        .unwrap_or_else(|| "~/.ssh/id_rsa".to_string());
    expand_tilde(&raw)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Load a private key, retrying with `SSH_KEY_PHRASE` if the key turns out
/// to be encrypted.
fn load_identity(path: &Path) -> Result<keys::PrivateKey, String> {
    if !path.exists() {
        return Err(format!("Identity file does not exist: {}", path.display()));
    }

    match keys::load_secret_key(path, None) {
        Ok(key) => Ok(key),
        Err(initial) => {
            let phrase = std::env::var("SSH_KEY_PHRASE")
                .ok()
                .filter(|p| !p.is_empty());
            match phrase {
                Some(phrase) => {
                    tracing::debug!(path = %path.display(), "retrying key load with passphrase");
                    keys::load_secret_key(path, Some(&phrase)).map_err(|e| {
                        format!("Failed to load key {} with passphrase: {e}", path.display())
                    })
                }
                None => Err(format!(
                    "Private key {} requires a passphrase but SSH_KEY_PHRASE is not set: {initial}",
                    path.display()
                )),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Command wrapping
// ---------------------------------------------------------------------------

/// Metacharacters that require the command to run under a shell.
const SHELL_FEATURES: &[&str] = &[
    "|", ">", "<", ">>", "<<", "&&", "||", ";", "$", "`", "$(", "${",
];

/// Quote sequences that already make a command non-simple.
const MIXED_QUOTE_PATTERNS: &[&str] = &["'\"'", "\"'", "\\'", "\\\""];

/// Quoting that defeats single-quote escaping; these need the heredoc form.
const HEREDOC_PATTERNS: &[&str] = &["'\"'", "\"'", "\\'", "\\\"", "\\\\"];

/// A simple command can be forwarded to the remote side unchanged.
pub fn is_simple_command(command: &str) -> bool {
    if SHELL_FEATURES.iter().any(|f| command.contains(f)) {
        return false;
    }
    !MIXED_QUOTE_PATTERNS.iter().any(|p| command.contains(p))
}

/// True when the command's own quoting would break `bash -c '<cmd>'`.
pub fn has_complex_quoting(command: &str) -> bool {
    HEREDOC_PATTERNS.iter().any(|p| command.contains(p))
}

/// POSIX shell quoting: wrap in single quotes, escaping embedded ones.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    let safe = s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Wrap a command for safe remote execution.
///
/// Simple commands pass through untouched. Commands with shell features get
/// `bash -c <quoted>`; commands whose quoting would defeat that get a quoted
/// heredoc, whose delimiter is grown until it cannot collide with the
/// command text.
pub fn prepare_command(command: &str) -> String {
    if is_simple_command(command) {
        return command.to_string();
    }
    if has_complex_quoting(command) {
        heredoc_command(command)
    } else {
        format!("bash -c {}", shell_quote(command))
    }
}

fn heredoc_command(command: &str) -> String {
    let mut delimiter = String::from("EOF_CMD");
    while command.contains(&delimiter) {
        delimiter = format!("EOF_{delimiter}");
    }
    format!("bash << '{delimiter}'\n{command}\n{delimiter}")
}

/// Build the wrapper that launches `command` detached from the channel.
///
/// The wrapper redirects stdout/stderr to the spool files, records the exit
/// status next to the stdout spool, and prints the background PID as its own
/// only output. `nohup … &` keeps the command alive after the channel
/// closes.
pub fn background_command(command: &str, output_file: &str, error_file: &str) -> String {
    let script = format!("{command}\necho $? > {output_file}.exit");
    format!(
        "nohup bash -c {} > {} 2> {} &\necho $!",
        shell_quote(&script),
        output_file,
        error_file
    )
}

// ---------------------------------------------------------------------------
// Session pooling
// ---------------------------------------------------------------------------

/// A session borrowed from the pool for the duration of one tool call.
///
/// Fresh sessions close when the lease drops; pooled sessions are returned
/// to the pool, and the owned guard serializes exec traffic per session.
pub enum SessionLease {
    Fresh(SshSession),
    Pooled(OwnedMutexGuard<SshSession>),
}

impl std::ops::Deref for SessionLease {
    type Target = SshSession;

    fn deref(&self) -> &SshSession {
        match self {
            SessionLease::Fresh(session) => session,
            SessionLease::Pooled(guard) => guard,
        }
    }
}

/// Hands out SSH sessions, one per call, or pooled per host when connection
/// reuse is enabled.
#[derive(Clone)]
pub struct SessionPool {
    reuse: bool,
    sessions: Arc<Mutex<HashMap<String, Arc<Mutex<SshSession>>>>>,
}

impl SessionPool {
    #[must_use]
    pub fn new(reuse: bool) -> Self {
        Self {
            reuse,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Borrow a session for `host`, connecting if necessary.
    pub async fn acquire(&self, host: &str) -> Result<SessionLease, String> {
        if !self.reuse {
            return Ok(SessionLease::Fresh(SshSession::connect(host).await?));
        }

        let entry = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(host) {
                Some(entry) => entry.clone(),
                None => {
                    let session = SshSession::connect(host).await?;
                    let entry = Arc::new(Mutex::new(session));
                    sessions.insert(host.to_string(), entry.clone());
                    entry
                }
            }
        };

        Ok(SessionLease::Pooled(entry.lock_owned().await))
    }
}
