//! Subprocess execution with time limits and cancellation
//!
//! Runs one external tool invocation to completion, capturing both
//! streams in full. Two time limits apply: the soft limit stops the
//! run gracefully (SIGTERM, reported as a retryable timeout) and the
//! hard limit force-kills (fatal). A cancellation token triggers the
//! same terminate-then-kill sequence.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use colforge_core::error::JobFailure;

/// One tool invocation.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub env: Vec<(String, String)>,
    pub soft_limit: Duration,
    pub hard_limit: Duration,
    pub termination_grace: Duration,
}

/// Result of a run that reached process exit on its own.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Runs the process to completion. A non-zero exit is not an error
/// here: the outcome carries the exit code and streams, and the
/// caller classifies it. Errors are timeouts, cancellation, and spawn
/// or i/o failures.
pub async fn run(
    spec: &ProcessSpec,
    cancel: &CancellationToken,
) -> Result<ProcessOutcome, JobFailure> {
    if cancel.is_cancelled() {
        return Err(JobFailure::Cancelled);
    }

    let started = Instant::now();
    let mut child = Command::new(&spec.executable)
        .args(&spec.args)
        .current_dir(&spec.workdir)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout_task = drain(child.stdout.take());
    let stderr_task = drain(child.stderr.take());

    let soft = tokio::time::sleep(spec.soft_limit);
    tokio::pin!(soft);

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            debug!("cancellation requested, terminating child");
            terminate(&mut child, spec.termination_grace).await;
            return Err(JobFailure::Cancelled);
        }
        _ = &mut soft => {
            debug!("soft time limit reached, terminating child");
            send_sigterm(&child);
            let remainder = spec.hard_limit.saturating_sub(spec.soft_limit);
            return match tokio::time::timeout(remainder, child.wait()).await {
                Ok(_) => Err(JobFailure::SoftTimeout),
                Err(_) => {
                    child.kill().await?;
                    Err(JobFailure::HardTimeout)
                }
            };
        }
    };

    let stdout = collect(stdout_task).await?;
    let stderr = collect(stderr_task).await?;

    Ok(ProcessOutcome {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
        duration: started.elapsed(),
    })
}

fn drain(
    stream: Option<impl AsyncReadExt + Unpin + Send + 'static>,
) -> Option<JoinHandle<std::io::Result<String>>> {
    stream.map(|mut stream| {
        tokio::spawn(async move {
            let mut buf = String::new();
            stream.read_to_string(&mut buf).await?;
            Ok(buf)
        })
    })
}

async fn collect(
    task: Option<JoinHandle<std::io::Result<String>>>,
) -> Result<String, JobFailure> {
    match task {
        Some(task) => {
            let content = task
                .await
                .map_err(|e| JobFailure::Io(format!("stream reader panicked: {e}")))??;
            Ok(content)
        }
        None => Ok(String::new()),
    }
}

/// SIGTERM, a grace period, then SIGKILL if the child is still alive.
async fn terminate(child: &mut Child, grace: Duration) {
    send_sigterm(child);
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) {}
