//! Subprocess execution with a bounded wait.

use std::fmt;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::BridgeOutput;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to wait for process: {0}")]
    Io(#[source] io::Error),

    #[error("process did not finish in time")]
    TimedOut,

    #[error("process was cancelled")]
    Cancelled,
}

/// Runs one program to completion and captures its output.
///
/// Implementations must never return before the child has exited or been
/// killed and reaped.
#[async_trait]
pub trait CommandRunner: Send + Sync + fmt::Debug {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<BridgeOutput, RunError>;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioCommandRunner;

enum Waited {
    Finished(io::Result<BridgeOutput>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<BridgeOutput, RunError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(RunError::Spawn)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let waited = {
            let collect = async {
                let (status, stdout, stderr) =
                    tokio::join!(child.wait(), drain(stdout), drain(stderr));
                Ok::<_, io::Error>(BridgeOutput {
                    exit_code: status?.code().unwrap_or(-1),
                    stdout: stdout?,
                    stderr: stderr?,
                })
            };
            tokio::select! {
                biased;
                () = cancel.cancelled() => Waited::Cancelled,
                result = tokio::time::timeout(timeout, collect) => match result {
                    Ok(output) => Waited::Finished(output),
                    Err(_) => Waited::TimedOut,
                },
            }
        };

        match waited {
            Waited::Finished(output) => output.map_err(RunError::Io),
            Waited::TimedOut => {
                reap(&mut child, program).await;
                Err(RunError::TimedOut)
            }
            Waited::Cancelled => {
                reap(&mut child, program).await;
                Err(RunError::Cancelled)
            }
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Kill the child and wait for it to exit.
async fn reap(child: &mut tokio::process::Child, program: &Path) {
    if let Err(err) = child.kill().await {
        warn!(program = %program.display(), error = %err, "failed to kill bridge process");
    }
}
