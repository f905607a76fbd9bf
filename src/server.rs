//! MCP server: tool definitions using rmcp macros.
//!
//! Exposes the remote execution surface:
//! - `execute_command`: launch a command in the background on an SSH host
//! - `get_command_output`: byte-ranged reads of a command's spooled stdout
//! - `get_command_status`: lightweight liveness/exit-code check
//! - `kill_command`: escalating SIGTERM/SIGKILL termination
//! - `transfer_file`: SFTP upload/download
//! - `get_security_info`: the active command policy
//!
//! plus the `ssh://hosts` resource listing the configured host aliases.

use crate::config;
use crate::hosts;
use crate::policy;
use crate::process;
use crate::registry::{ProcessRegistry, ProcessStatus, ProcessUpdate};
use crate::session::SessionPool;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::schemars;
use rmcp::service::{RequestContext, RoleServer};
use rmcp::tool;
use rmcp::tool_handler;
use rmcp::tool_router;
use rmcp::{ErrorData as McpError, ServerHandler};
use serde::Serialize;
use std::time::Instant;

// ---------------------------------------------------------------------------
// Parameter structs (deserialized from MCP tool call arguments)
// ---------------------------------------------------------------------------

/// Parameters for the `execute_command` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ExecuteCommandParams {
    /// Host alias from the SSH config file (1-253 characters).
    pub host: String,
    /// Command to execute (1-2000 characters).
    pub command: String,
}

/// Parameters for the `get_command_output` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct GetOutputParams {
    /// Process ID returned by execute_command.
    pub process_id: String,
    /// Byte offset to read from. Defaults to 0.
    pub start_byte: Option<u64>,
    /// Chunk size in bytes (1-100000). Defaults to MCP_SSH_CHUNK_SIZE.
    pub chunk_size: Option<u64>,
}

/// Parameters for the `get_command_status` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct GetStatusParams {
    /// Process ID returned by execute_command.
    pub process_id: String,
}

/// Parameters for the `kill_command` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct KillCommandParams {
    /// Process ID returned by execute_command.
    pub process_id: String,
    /// Whether to remove the spool files after the kill. Defaults to true.
    pub cleanup_files: Option<bool>,
}

/// Parameters for the `transfer_file` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct TransferFileParams {
    /// Host alias from the SSH config file.
    pub host: String,
    /// Local file path.
    pub local_path: String,
    /// Remote file path.
    pub remote_path: String,
    /// Transfer direction: 'upload' or 'download'.
    pub direction: String,
}

// ---------------------------------------------------------------------------
// Result structs (serialized to JSON and returned as tool content)
// ---------------------------------------------------------------------------

/// Structured result shared by the command tools.
///
/// `process_id` keys all follow-up calls; `has_more_output` signals that the
/// stdout spool holds more bytes past `chunk_start + output_size`.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub process_id: String,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub execution_time: f64,
    pub output_size: usize,
    pub has_more_output: bool,
    pub chunk_start: u64,
    pub error_message: String,
}

impl CommandResult {
    fn failure(
        process_id: impl Into<String>,
        status: ProcessStatus,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            process_id: process_id.into(),
            status: status.as_str().to_string(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            execution_time: 0.0,
            output_size: 0,
            has_more_output: false,
            chunk_start: 0,
            error_message: error_message.into(),
        }
    }
}

/// Result of a kill attempt.
#[derive(Debug, Clone, Serialize)]
pub struct KillProcessResult {
    pub success: bool,
    pub process_id: String,
    pub message: String,
    pub error_message: String,
}

impl KillProcessResult {
    fn failure(process_id: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            process_id: process_id.into(),
            message: String::new(),
            error_message: error_message.into(),
        }
    }
}

/// Result of a file transfer.
#[derive(Debug, Clone, Serialize)]
pub struct FileTransferResult {
    pub success: bool,
    pub bytes_transferred: u64,
    pub local_path: String,
    pub remote_path: String,
    pub host: String,
    pub error_message: String,
}

/// Classify an error from the remote plumbing: timeouts become status
/// `timeout` in the response record instead of leaking as exceptions.
fn error_status(message: &str) -> ProcessStatus {
    if message.to_lowercase().contains("timed out") {
        ProcessStatus::Timeout
    } else {
        ProcessStatus::Failed
    }
}

// ---------------------------------------------------------------------------
// MCP Server
// ---------------------------------------------------------------------------

/// The agentssh MCP server.
///
/// Holds the [`ProcessRegistry`] tracking background commands and the
/// [`SessionPool`] handing out SSH sessions (fresh per call, or pooled per
/// host when connection reuse is enabled).
#[derive(Clone)]
pub struct AgentSshServer {
    registry: ProcessRegistry,
    pool: SessionPool,
    tool_router: ToolRouter<AgentSshServer>,
}

impl AgentSshServer {
    /// Create a new server instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: ProcessRegistry::new(),
            pool: SessionPool::new(config::settings().connection_reuse),
            tool_router: Self::tool_router(),
        }
    }
}

impl Default for AgentSshServer {
    fn default() -> Self {
        Self::new()
    }
}

fn json_content<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("JSON serialization error: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[tool_router]
impl AgentSshServer {
    #[tool(
        description = "Execute a command on an SSH host in the background. The command is validated against the security policy, launched detached with its output spooled to files, and given a short quick-wait so fast commands return their full result in one call. Always returns a process_id for follow-up calls. If has_more_output is true, fetch the rest with get_command_output starting at chunk_start + output_size."
    )]
    async fn execute_command(
        &self,
        Parameters(params): Parameters<ExecuteCommandParams>,
    ) -> Result<CallToolResult, McpError> {
        let started = Instant::now();
        let settings = config::settings();

        if params.host.is_empty() || params.host.len() > 253 {
            return json_content(&CommandResult::failure(
                "",
                ProcessStatus::Failed,
                "Host must be 1-253 characters",
            ));
        }
        if params.command.is_empty() || params.command.len() > 2000 {
            return json_content(&CommandResult::failure(
                "",
                ProcessStatus::Failed,
                "Command must be 1-2000 characters",
            ));
        }

        tracing::info!(host = %params.host, command = %params.command, "execute_command");

        // The policy gate runs before any remote effect.
        let (allowed, reason) = policy::policy().validate(&params.command, &params.host);
        if !allowed {
            tracing::warn!(host = %params.host, reason = %reason, "command blocked");
            return json_content(&CommandResult::failure(
                "",
                ProcessStatus::Failed,
                format!("Security policy violation: {reason}"),
            ));
        }

        let session = match self.pool.acquire(&params.host).await {
            Ok(session) => session,
            Err(e) => {
                return json_content(&CommandResult::failure(
                    "",
                    ProcessStatus::Failed,
                    format!("Failed to establish SSH connection: {e}"),
                ));
            }
        };

        // The record allocates the spool paths the launcher needs; it is
        // removed again if the launch fails, so no identifier leaks.
        let record = self
            .registry
            .start(&params.host, &params.command, &settings.temp_dir)
            .await;

        let pid = match process::launch(&session, &params.command, &record).await {
            Ok(pid) => pid,
            Err(e) => {
                self.registry.remove(&record.process_id).await;
                return json_content(&CommandResult::failure("", error_status(&e), e));
            }
        };

        let record = self
            .registry
            .update(
                &record.process_id,
                ProcessUpdate {
                    pid: Some(pid),
                    ..Default::default()
                },
            )
            .await
            .unwrap_or(record);

        tracing::info!(process_id = %record.process_id, pid, "launched");

        // Quick wait: fast commands complete here and return in one call.
        tokio::time::sleep(settings.quick_wait).await;

        match process::poll(&session, &record, settings.max_output_size).await {
            Ok(snapshot) => {
                let status = record.status.refine(snapshot.status);
                self.registry
                    .update(
                        &record.process_id,
                        ProcessUpdate {
                            status: Some(status),
                            exit_code: snapshot.exit_code,
                            ..Default::default()
                        },
                    )
                    .await;

                let output_size = snapshot.stdout.len();
                let has_more_output = output_size >= settings.max_output_size;
                json_content(&CommandResult {
                    success: true,
                    process_id: record.process_id.clone(),
                    status: status.as_str().to_string(),
                    stdout: snapshot.stdout,
                    stderr: snapshot.stderr,
                    exit_code: snapshot.exit_code,
                    execution_time: started.elapsed().as_secs_f64(),
                    output_size,
                    has_more_output,
                    chunk_start: 0,
                    error_message: String::new(),
                })
            }
            Err(e) => {
                let status = error_status(&e);
                if status == ProcessStatus::Timeout {
                    self.registry
                        .update(
                            &record.process_id,
                            ProcessUpdate {
                                status: Some(ProcessStatus::Timeout),
                                ..Default::default()
                            },
                        )
                        .await;
                }
                let mut result = CommandResult::failure(record.process_id.clone(), status, e);
                result.execution_time = started.elapsed().as_secs_f64();
                json_content(&result)
            }
        }
    }

    #[tool(
        description = "Read a byte-ranged chunk of a background command's stdout. Pass the process_id from execute_command, the start_byte to read from, and an optional chunk_size (1-100000 bytes). has_more_output=true means more bytes exist past this chunk; has_more_output=false while the command is still running means no more data yet, not end of stream."
    )]
    async fn get_command_output(
        &self,
        Parameters(params): Parameters<GetOutputParams>,
    ) -> Result<CallToolResult, McpError> {
        let Some(record) = self.registry.get(&params.process_id).await else {
            return json_content(&CommandResult::failure(
                params.process_id.clone(),
                ProcessStatus::Failed,
                format!("Process {} not found", params.process_id),
            ));
        };

        let settings = config::settings();
        let chunk_size = params.chunk_size.unwrap_or(settings.chunk_size as u64);
        if !(1..=100_000).contains(&chunk_size) {
            return json_content(&CommandResult::failure(
                params.process_id.clone(),
                ProcessStatus::Failed,
                "chunk_size must be between 1 and 100000 bytes",
            ));
        }
        let start_byte = params.start_byte.unwrap_or(0);

        tracing::info!(process_id = %params.process_id, start_byte, chunk_size, "get_command_output");

        let session = match self.pool.acquire(&record.host).await {
            Ok(session) => session,
            Err(e) => {
                return json_content(&CommandResult::failure(
                    params.process_id.clone(),
                    ProcessStatus::Failed,
                    format!("Failed to establish SSH connection: {e}"),
                ));
            }
        };

        let (data, has_more) =
            match process::chunk(&session, &record, start_byte, chunk_size).await {
                Ok(chunk) => chunk,
                Err(e) => {
                    return json_content(&CommandResult::failure(
                        params.process_id.clone(),
                        error_status(&e),
                        format!("Output retrieval failed: {e}"),
                    ));
                }
            };

        // Small status refresh alongside the chunk read.
        match process::poll(&session, &record, 1000).await {
            Ok(snapshot) => {
                let status = record.status.refine(snapshot.status);
                self.registry
                    .update(
                        &record.process_id,
                        ProcessUpdate {
                            status: Some(status),
                            exit_code: snapshot.exit_code,
                            ..Default::default()
                        },
                    )
                    .await;

                let output_size = data.len();
                json_content(&CommandResult {
                    success: true,
                    process_id: params.process_id.clone(),
                    status: status.as_str().to_string(),
                    stdout: data,
                    stderr: snapshot.stderr,
                    exit_code: snapshot.exit_code,
                    execution_time: record.start_time.elapsed().as_secs_f64(),
                    output_size,
                    has_more_output: has_more,
                    chunk_start: start_byte,
                    error_message: String::new(),
                })
            }
            Err(e) => json_content(&CommandResult::failure(
                params.process_id.clone(),
                error_status(&e),
                format!("Status check failed: {e}"),
            )),
        }
    }

    #[tool(
        description = "Check whether a background command is still running, without transferring any output. Returns status (running/completed/failed/killed/timeout), exit_code once available, and the elapsed time. The cheapest call for polling loops."
    )]
    async fn get_command_status(
        &self,
        Parameters(params): Parameters<GetStatusParams>,
    ) -> Result<CallToolResult, McpError> {
        let Some(record) = self.registry.get(&params.process_id).await else {
            return json_content(&CommandResult::failure(
                params.process_id.clone(),
                ProcessStatus::Failed,
                format!("Process {} not found", params.process_id),
            ));
        };

        let session = match self.pool.acquire(&record.host).await {
            Ok(session) => session,
            Err(e) => {
                return json_content(&CommandResult::failure(
                    params.process_id.clone(),
                    ProcessStatus::Failed,
                    format!("Failed to establish SSH connection: {e}"),
                ));
            }
        };

        match process::status_only(&session, &record).await {
            Ok((observed, exit_code)) => {
                let status = record.status.refine(observed);
                self.registry
                    .update(
                        &record.process_id,
                        ProcessUpdate {
                            status: Some(status),
                            exit_code,
                            ..Default::default()
                        },
                    )
                    .await;

                json_content(&CommandResult {
                    success: true,
                    process_id: params.process_id.clone(),
                    status: status.as_str().to_string(),
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code,
                    execution_time: record.start_time.elapsed().as_secs_f64(),
                    output_size: 0,
                    has_more_output: false,
                    chunk_start: 0,
                    error_message: String::new(),
                })
            }
            Err(e) => json_content(&CommandResult::failure(
                params.process_id.clone(),
                error_status(&e),
                format!("Status check failed: {e}"),
            )),
        }
    }

    #[tool(
        description = "Kill a running background command with escalating signals: SIGTERM, a 2-second grace period, then SIGKILL. Optionally removes the command's spool files afterwards (cleanup_files, default true). Fails without any remote effect if the process is not running."
    )]
    async fn kill_command(
        &self,
        Parameters(params): Parameters<KillCommandParams>,
    ) -> Result<CallToolResult, McpError> {
        let Some(record) = self.registry.get(&params.process_id).await else {
            return json_content(&KillProcessResult::failure(
                params.process_id.clone(),
                format!("Process {} not found", params.process_id),
            ));
        };

        // Kills on non-running records short-circuit before any remote work.
        if record.status != ProcessStatus::Running {
            return json_content(&KillProcessResult::failure(
                params.process_id.clone(),
                format!(
                    "Process {} is not running (status: {})",
                    params.process_id,
                    record.status.as_str()
                ),
            ));
        }

        tracing::info!(process_id = %params.process_id, "kill_command");

        let session = match self.pool.acquire(&record.host).await {
            Ok(session) => session,
            Err(e) => {
                return json_content(&KillProcessResult::failure(
                    params.process_id.clone(),
                    format!("Failed to establish SSH connection: {e}"),
                ));
            }
        };

        match process::kill(&session, &record).await {
            Ok((true, mut message)) => {
                self.registry
                    .update(
                        &params.process_id,
                        ProcessUpdate {
                            status: Some(ProcessStatus::Killed),
                            ..Default::default()
                        },
                    )
                    .await;

                if params.cleanup_files.unwrap_or(true) {
                    if process::cleanup_files(&session, &record).await {
                        message.push_str(" Files cleaned up.");
                    } else {
                        message.push_str(" Warning: Failed to clean up some files.");
                    }
                }

                tracing::info!(process_id = %params.process_id, "killed");
                json_content(&KillProcessResult {
                    success: true,
                    process_id: params.process_id.clone(),
                    message,
                    error_message: String::new(),
                })
            }
            Ok((false, message)) => json_content(&KillProcessResult::failure(
                params.process_id.clone(),
                message,
            )),
            Err(e) => json_content(&KillProcessResult::failure(
                params.process_id.clone(),
                format!("Error killing process: {e}"),
            )),
        }
    }

    #[tool(
        description = "Transfer a file between the local machine and an SSH host over SFTP. direction='upload' copies local_path to remote_path; direction='download' copies remote_path to local_path. Returns the number of bytes transferred."
    )]
    async fn transfer_file(
        &self,
        Parameters(params): Parameters<TransferFileParams>,
    ) -> Result<CallToolResult, McpError> {
        let failure = |error_message: String| FileTransferResult {
            success: false,
            bytes_transferred: 0,
            local_path: params.local_path.clone(),
            remote_path: params.remote_path.clone(),
            host: params.host.clone(),
            error_message,
        };

        if params.direction != "upload" && params.direction != "download" {
            return json_content(&failure(format!(
                "Invalid direction: {}. Use 'upload' or 'download'",
                params.direction
            )));
        }

        tracing::info!(
            host = %params.host,
            direction = %params.direction,
            local = %params.local_path,
            remote = %params.remote_path,
            "transfer_file"
        );

        let session = match self.pool.acquire(&params.host).await {
            Ok(session) => session,
            Err(e) => {
                return json_content(&failure(format!(
                    "Failed to connect to host '{}': {e}",
                    params.host
                )));
            }
        };

        let timeout = config::settings().transfer_timeout;
        let transferred = if params.direction == "upload" {
            session.put(&params.local_path, &params.remote_path, timeout).await
        } else {
            session.get(&params.remote_path, &params.local_path, timeout).await
        };

        match transferred {
            Ok(bytes_transferred) => {
                tracing::info!(bytes_transferred, "transfer complete");
                json_content(&FileTransferResult {
                    success: true,
                    bytes_transferred,
                    local_path: params.local_path.clone(),
                    remote_path: params.remote_path.clone(),
                    host: params.host.clone(),
                    error_message: String::new(),
                })
            }
            Err(e) => json_content(&failure(e)),
        }
    }

    #[tool(description = "Get the active command security policy: mode, case sensitivity, and the compiled blacklist/whitelist patterns.")]
    async fn get_security_info(&self) -> Result<CallToolResult, McpError> {
        json_content(&policy::policy().info())
    }
}

#[tool_handler]
impl ServerHandler for AgentSshServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "agentssh".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "agentssh runs commands on SSH hosts without blocking on them:\n\n\
                 EXECUTION: execute_command launches the command in the background on the \
                 remote host (stdout/stderr land in spool files) and waits a few seconds so \
                 quick commands return their full result immediately. Long commands return \
                 with status 'running' and a process_id.\n\n\
                 FOLLOW-UP: get_command_status is a cheap liveness check; get_command_output \
                 reads stdout in byte-ranged chunks (follow has_more_output until false); \
                 kill_command terminates with SIGTERM then SIGKILL and can clean up the \
                 spool files.\n\n\
                 FILES: transfer_file uploads or downloads a single file over SFTP.\n\n\
                 HOSTS: targets are aliases from ~/.ssh/config; the ssh://hosts resource \
                 lists them. Authentication is key-based (IdentityFile, SSH_KEY_FILE, or \
                 ~/.ssh/id_rsa; SSH_KEY_PHRASE unlocks encrypted keys).\n\n\
                 SECURITY: every command passes an allow/deny policy first \
                 (MCP_SSH_SECURITY_MODE: blacklist, whitelist, or disabled); \
                 get_security_info shows the active rules."
                    .to_string(),
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let mut resource = RawResource::new("ssh://hosts", "hosts");
        resource.description = Some("Host aliases from the user's SSH config file".to_string());
        resource.mime_type = Some("application/json".to_string());
        Ok(ListResourcesResult {
            meta: None,
            resources: vec![resource.no_annotation()],
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        match request.uri.as_str() {
            "ssh://hosts" => {
                let entries = hosts::host_entries();
                let json = serde_json::to_string_pretty(&entries).map_err(|e| {
                    McpError::internal_error(format!("JSON serialization error: {e}"), None)
                })?;
                Ok(ReadResourceResult {
                    contents: vec![ResourceContents::text(json, "ssh://hosts")],
                })
            }
            other => Err(McpError::resource_not_found(
                format!("unknown resource: {other}"),
                None,
            )),
        }
    }
}
