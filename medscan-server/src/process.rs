//! External process runner
//!
//! The classifier and the compositor are separate programs. Each run gets a
//! hard time budget covering exit and output collection; on expiry the
//! child's whole process group is killed and a timeout is reported.
//! Crashed runs (non-zero exit) may be retried with backoff. Spawn failures
//! and timeouts are never retried.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use medscan_common::config::ProcessConfig;
use medscan_common::Error as CoreError;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Bytes of stderr kept when logging a failed run
const STDERR_LOG_LIMIT: usize = 2048;

/// Process runner errors
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exceeded {timeout:?} and was killed")]
    TimedOut { program: String, timeout: Duration },

    #[error("I/O error while running process: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output reader task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ProcessError {
    /// Convert into the core taxonomy, naming the collaborator in public text
    pub fn into_core(self, collaborator: &str) -> CoreError {
        match self {
            ProcessError::TimedOut { .. } => CoreError::Timeout(format!("{} timed out", collaborator)),
            ProcessError::Spawn { .. } => {
                CoreError::upstream(format!("{} could not be started", collaborator), self.to_string())
            }
            other => CoreError::upstream(format!("{} failed", collaborator), other.to_string()),
        }
    }
}

/// Captured result of a finished run
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
    /// Runs made, including retries
    pub attempts: u32,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Trailing stderr, lossily decoded, for diagnostics
    pub fn stderr_tail(&self) -> String {
        let start = self.stderr.len().saturating_sub(STDERR_LOG_LIMIT);
        String::from_utf8_lossy(&self.stderr[start..]).trim().to_string()
    }
}

/// A configured external program
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl ExternalCommand {
    pub fn from_config(config: &ProcessConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: config.timeout(),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run once with the configured args followed by `extra`
    pub async fn run<I, S>(&self, extra: I) -> Result<ProcessOutput, ProcessError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(extra)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a timeout can take down helpers the child forked
        #[cfg(unix)]
        command.process_group(0);

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let pid = child.id();

        // Drain both pipes concurrently so a chatty child cannot block on a full pipe
        let mut stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let mut stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        // One deadline covers the exit and the pipe drain
        let collect = async {
            let status = child.wait().await?;
            // Leftover descendants may still hold the pipes open
            kill_process_group(pid);
            let stdout = (&mut stdout_task).await??;
            let stderr = (&mut stderr_task).await??;
            Ok::<_, ProcessError>((status, stdout, stderr))
        };

        let outcome = tokio::time::timeout(self.timeout, collect).await;
        let (status, stdout, stderr) = match outcome {
            Ok(result) => result?,
            Err(_) => {
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    warn!(program = %self.program, error = %e, "Failed to kill timed out process");
                }
                stdout_task.abort();
                stderr_task.abort();
                warn!(
                    program = %self.program,
                    timeout_secs = self.timeout.as_secs(),
                    "Process timed out and was killed"
                );
                return Err(ProcessError::TimedOut {
                    program: self.program.clone(),
                    timeout: self.timeout,
                });
            }
        };
        let elapsed = started.elapsed();

        debug!(
            program = %self.program,
            exit = ?status.code(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Process finished"
        );

        Ok(ProcessOutput {
            status,
            stdout,
            stderr,
            elapsed,
            attempts: 1,
        })
    }

    /// Run, retrying crashed attempts up to the configured limit
    ///
    /// The last output is returned even when every attempt exited non-zero;
    /// the caller decides what a failed exit means.
    pub async fn run_with_retry<S: AsRef<OsStr>>(
        &self,
        extra: &[S],
    ) -> Result<ProcessOutput, ProcessError> {
        let mut backoff = self.retry_backoff;
        let mut attempt = 1;

        loop {
            let mut output = self.run(extra).await?;
            output.attempts = attempt;

            if output.success() || attempt >= self.max_attempts {
                return Ok(output);
            }

            warn!(
                program = %self.program,
                attempt,
                max_attempts = self.max_attempts,
                exit = ?output.status.code(),
                stderr = %output.stderr_tail(),
                "Process exited with failure, retrying after backoff"
            );

            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
            attempt += 1;
        }
    }
}

/// SIGKILL every process in the group led by `pid`
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => debug!(pgid = pid, error = %e, "Failed to signal process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
