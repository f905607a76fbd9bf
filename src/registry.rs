//! Process registry: tracks background commands by short opaque ids.
//!
//! The registry is the only shared mutable state in the service. Records are
//! created when a command is launched, looked up by every subsequent
//! `get_command_output`/`get_command_status`/`kill_command` call, and updated
//! with partial merges as status changes are observed. State is in-memory
//! only; it does not survive a service restart.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

/// The status of a tracked background command.
///
/// `running` may move to any other state (including `timeout`, which a later
/// liveness check can still refine into a terminal state); no transition
/// leads back to `running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Running,
    Completed,
    Failed,
    Killed,
    Timeout,
}

impl ProcessStatus {
    /// Apply a freshly observed status while keeping transitions monotonic:
    /// `running` accepts anything, `timeout` may still resolve to a terminal
    /// state, and terminal states never change.
    pub fn refine(self, observed: ProcessStatus) -> ProcessStatus {
        match self {
            ProcessStatus::Running => observed,
            ProcessStatus::Timeout if observed != ProcessStatus::Running => observed,
            _ => self,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Failed => "failed",
            ProcessStatus::Killed => "killed",
            ProcessStatus::Timeout => "timeout",
        }
    }
}

/// One tracked background command.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    /// 8-hex-character opaque handle, unique for the registry's lifetime.
    pub process_id: String,
    /// Host alias the command was launched on.
    pub host: String,
    pub command: String,
    /// Remote PID; unset until the background launch succeeds.
    pub pid: Option<u32>,
    pub start_time: Instant,
    pub status: ProcessStatus,
    /// Set only once the status leaves `running`.
    pub exit_code: Option<i32>,
    /// Remote spool file capturing stdout.
    pub output_file: String,
    /// Remote spool file capturing stderr.
    pub error_file: String,
}

impl ProcessRecord {
    /// Spool file holding the command's ASCII exit code.
    pub fn exit_file(&self) -> String {
        format!("{}.exit", self.output_file)
    }
}

/// Partial update applied to a record; `None` fields are left untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessUpdate {
    pub pid: Option<u32>,
    pub status: Option<ProcessStatus>,
    pub exit_code: Option<i32>,
}

/// Thread-safe registry of background commands.
#[derive(Clone)]
pub struct ProcessRegistry {
    entries: Arc<Mutex<HashMap<String, ProcessRecord>>>,
}

impl ProcessRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create and insert a record for a command about to be launched.
    ///
    /// Allocates a collision-checked 8-hex id and spool paths embedding the
    /// id and creation timestamp under `temp_dir`. The record starts in
    /// status `running` with no PID; the caller fills the PID in after the
    /// launch reports one, or removes the record if the launch fails.
    pub async fn start(&self, host: &str, command: &str, temp_dir: &str) -> ProcessRecord {
        let mut entries = self.entries.lock().await;

        let mut process_id = short_id();
        while entries.contains_key(&process_id) {
            process_id = short_id();
        }

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let base = format!("{temp_dir}/mcp_ssh_{process_id}_{timestamp}");

        let record = ProcessRecord {
            process_id: process_id.clone(),
            host: host.to_string(),
            command: command.to_string(),
            pid: None,
            start_time: Instant::now(),
            status: ProcessStatus::Running,
            exit_code: None,
            output_file: format!("{base}.out"),
            error_file: format!("{base}.err"),
        };

        entries.insert(process_id, record.clone());
        record
    }

    /// Look up a record by id.
    pub async fn get(&self, process_id: &str) -> Option<ProcessRecord> {
        self.entries.lock().await.get(process_id).cloned()
    }

    /// Merge `update` into the record, returning the updated copy.
    ///
    /// Concurrent callers may observe a status transition at slightly
    /// different times; the merge itself is atomic under the registry lock.
    pub async fn update(&self, process_id: &str, update: ProcessUpdate) -> Option<ProcessRecord> {
        let mut entries = self.entries.lock().await;
        let record = entries.get_mut(process_id)?;
        if let Some(pid) = update.pid {
            record.pid = Some(pid);
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(exit_code) = update.exit_code {
            record.exit_code = Some(exit_code);
        }
        Some(record.clone())
    }

    /// Drop a record, e.g. when its background launch failed. Returns the
    /// removed record if it existed.
    pub async fn remove(&self, process_id: &str) -> Option<ProcessRecord> {
        self.entries.lock().await.remove(process_id)
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// First 8 hex characters of a v4 UUID.
fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
