//! Remote background command plumbing.
//!
//! Launches commands detached on the remote host with stdout/stderr spooled
//! to files, probes liveness with the null signal, reads bounded slices of
//! the spools, and terminates processes with escalating signals. Every
//! remote command issued here is bounded by the configured command timeout;
//! an expired bound surfaces as an error whose text contains "timed out" so
//! the tool surface can report status `timeout`.

use crate::config;
use crate::registry::{ProcessRecord, ProcessStatus};
use crate::session::{self, SshSession};
use std::time::Duration;

/// Snapshot produced by [`poll`]: liveness-derived status plus bounded
/// spool reads.
#[derive(Debug, Clone)]
pub struct PollOutput {
    pub status: ProcessStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Run one plumbing command under the command timeout.
async fn run(session: &SshSession, command: &str) -> Result<session::ExecOutput, String> {
    let timeout = config::settings().command_timeout;
    let output = session.exec(command, timeout).await?;
    if output.timed_out {
        return Err(format!(
            "Remote command timed out after {}s",
            timeout.as_secs()
        ));
    }
    Ok(output)
}

/// Launch `command` detached on the remote host, returning its PID.
///
/// The PID line is read under the read timeout. If the wrapper's output is
/// not a bare integer, the launch failed and the caller must not record a
/// PID.
pub async fn launch(
    session: &SshSession,
    command: &str,
    record: &ProcessRecord,
) -> Result<u32, String> {
    let wrapper = session::background_command(command, &record.output_file, &record.error_file);
    let read_timeout = config::settings().read_timeout;

    let output = session.exec(&wrapper, read_timeout).await?;
    if output.timed_out {
        return Err(format!(
            "Background launch timed out after {}s",
            read_timeout.as_secs()
        ));
    }

    parse_pid(&output.stdout)
        .ok_or_else(|| format!("Failed to get PID: {}", output.stdout.trim()))
}

/// Parse the PID line emitted by the background wrapper.
pub fn parse_pid(raw: &str) -> Option<u32> {
    raw.trim().parse().ok()
}

/// Parse the contents of an exit-code spool. Empty or non-numeric content
/// means the code is not (yet) known.
pub fn parse_exit_code(raw: &str) -> Option<i32> {
    raw.trim().parse().ok()
}

/// Null-signal liveness probe.
pub async fn is_alive(session: &SshSession, pid: u32) -> Result<bool, String> {
    let output = run(
        session,
        &format!("kill -0 {pid} 2>/dev/null && echo 'RUNNING' || echo 'STOPPED'"),
    )
    .await?;
    Ok(output.stdout.trim() == "RUNNING")
}

/// Map liveness onto a status: a live PID is `running`, anything else
/// (including a record that never got a PID) is `completed`.
async fn liveness_status(
    session: &SshSession,
    record: &ProcessRecord,
) -> Result<ProcessStatus, String> {
    match record.pid {
        Some(pid) => {
            if is_alive(session, pid).await? {
                Ok(ProcessStatus::Running)
            } else {
                Ok(ProcessStatus::Completed)
            }
        }
        None => Ok(ProcessStatus::Completed),
    }
}

async fn read_exit_code(session: &SshSession, record: &ProcessRecord) -> Result<Option<i32>, String> {
    let output = run(
        session,
        &format!("cat {} 2>/dev/null || echo ''", record.exit_file()),
    )
    .await?;
    Ok(parse_exit_code(&output.stdout))
}

/// Poll liveness and read up to `max_bytes` of stdout (and half that of
/// stderr) from the spools.
///
/// A record without a PID is reported as `completed` — nothing is left to
/// probe. Spool reads are consistent only up to the writer's flush boundary,
/// so a poll racing completion may observe a truncated tail.
pub async fn poll(
    session: &SshSession,
    record: &ProcessRecord,
    max_bytes: usize,
) -> Result<PollOutput, String> {
    let status = liveness_status(session, record).await?;

    let exit_code = if status == ProcessStatus::Running {
        None
    } else {
        read_exit_code(session, record).await?
    };

    let stdout = run(
        session,
        &format!("head -c {} {} 2>/dev/null || echo ''", max_bytes, record.output_file),
    )
    .await?
    .stdout;

    let stderr = run(
        session,
        &format!("head -c {} {} 2>/dev/null || echo ''", max_bytes / 2, record.error_file),
    )
    .await?
    .stdout;

    Ok(PollOutput {
        status,
        stdout,
        stderr,
        exit_code,
    })
}

/// Liveness check and exit-code read only; no spool output is transferred.
pub async fn status_only(
    session: &SshSession,
    record: &ProcessRecord,
) -> Result<(ProcessStatus, Option<i32>), String> {
    let status = liveness_status(session, record).await?;
    let exit_code = if status == ProcessStatus::Running {
        None
    } else {
        read_exit_code(session, record).await?
    };
    Ok((status, exit_code))
}

/// Read bytes `[start_byte, start_byte + chunk_size)` from the stdout spool
/// and probe whether a byte exists past the end of the chunk.
///
/// `has_more == false` for a still-running process means "no more data
/// yet", not end of stream.
pub async fn chunk(
    session: &SshSession,
    record: &ProcessRecord,
    start_byte: u64,
    chunk_size: u64,
) -> Result<(String, bool), String> {
    let data = run(
        session,
        &format!(
            "tail -c +{} {} 2>/dev/null | head -c {}",
            start_byte + 1,
            record.output_file,
            chunk_size
        ),
    )
    .await?
    .stdout;

    let probe = run(
        session,
        &format!(
            "tail -c +{} {} 2>/dev/null | head -c 1",
            start_byte + chunk_size + 1,
            record.output_file
        ),
    )
    .await?
    .stdout;

    Ok((data, !probe.trim().is_empty()))
}

/// Terminate a background process with escalating signals.
///
/// SIGTERM first, a 2-second grace period, then SIGKILL if the liveness
/// probe still sees the process. Returns `(success, message)`; failure to
/// die after SIGKILL is reported, not retried.
pub async fn kill(session: &SshSession, record: &ProcessRecord) -> Result<(bool, String), String> {
    let Some(pid) = record.pid else {
        return Ok((false, "No PID available for process".to_string()));
    };

    run(session, &format!("kill {pid} 2>&1")).await?;

    tokio::time::sleep(Duration::from_secs(2)).await;

    if !is_alive(session, pid).await? {
        return Ok((true, format!("Process {pid} terminated gracefully")));
    }

    let force = run(session, &format!("kill -9 {pid} 2>&1")).await?;

    if !is_alive(session, pid).await? {
        Ok((true, format!("Process {pid} force killed")))
    } else {
        Ok((
            false,
            format!("Failed to kill process {pid}: {}", force.stdout.trim()),
        ))
    }
}

/// Remove the stdout, stderr, and exit-code spools. Best-effort: the caller
/// reports failure as a warning, never as a failed kill.
pub async fn cleanup_files(session: &SshSession, record: &ProcessRecord) -> bool {
    run(
        session,
        &format!(
            "rm -f {} {} {} 2>/dev/null",
            record.output_file,
            record.error_file,
            record.exit_file()
        ),
    )
    .await
    .is_ok()
}
