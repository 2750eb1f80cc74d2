use serde::Serialize;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{OperationError, OperationResult};
use crate::exec::executor::CommandExecutor;
use crate::security::AcceptedCommand;

/// Events buffered between the pipe reader and a slow consumer
const EVENT_BUFFER: usize = 64;

/// One unit of progress from a streaming command.
///
/// Every stream ends with exactly one `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    Stdout { line: String },
    Stderr { line: String },
    Complete { exit_code: i32 },
    Error { message: String },
}

impl OutputEvent {
    /// Name used for the SSE `event:` field
    pub fn name(&self) -> &'static str {
        match self {
            OutputEvent::Stdout { .. } => "stdout",
            OutputEvent::Stderr { .. } => "stderr",
            OutputEvent::Complete { .. } => "complete",
            OutputEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutputEvent::Complete { .. } | OutputEvent::Error { .. })
    }
}

pub type OutputStream = ReceiverStream<OutputEvent>;

impl CommandExecutor {
    /// Spawn the command and stream its output line by line.
    ///
    /// Spawn failures are returned directly; anything after that arrives as
    /// an event. Dropping the stream kills the child.
    pub async fn stream(&self, command: &AcceptedCommand) -> OperationResult<OutputStream> {
        self.check_working_dir()?;

        let mut child = self
            .command(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| OperationError::Spawn {
                program: command.program().to_string(),
                source,
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(OperationError::Io(io::Error::other("child pipes unavailable")));
        };

        tracing::debug!(command = %command, pid = ?child.id(), "streaming command");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let label = command.to_string();
        tokio::spawn(async move {
            pump(child, BufReader::new(stdout).split(b'\n'), BufReader::new(stderr).split(b'\n'), tx, label)
                .await;
        });

        Ok(ReceiverStream::new(rx))
    }
}

/// Forward lines from whichever pipe is ready until both close, then reap
/// the child and send the terminal event.
async fn pump<O, E>(
    mut child: Child,
    mut stdout: Split<BufReader<O>>,
    mut stderr: Split<BufReader<E>>,
    tx: mpsc::Sender<OutputEvent>,
    label: String,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        let event = tokio::select! {
            segment = stdout.next_segment(), if stdout_open => match segment {
                Ok(Some(bytes)) => OutputEvent::Stdout { line: decode_line(&bytes) },
                Ok(None) => {
                    stdout_open = false;
                    continue;
                }
                Err(e) => {
                    abort(&mut child, &tx, &label, e).await;
                    return;
                }
            },
            segment = stderr.next_segment(), if stderr_open => match segment {
                Ok(Some(bytes)) => OutputEvent::Stderr { line: decode_line(&bytes) },
                Ok(None) => {
                    stderr_open = false;
                    continue;
                }
                Err(e) => {
                    abort(&mut child, &tx, &label, e).await;
                    return;
                }
            },
            _ = tx.closed() => {
                tracing::debug!(command = %label, "stream consumer gone, killing child");
                let _ = child.kill().await;
                return;
            }
        };

        if tx.send(event).await.is_err() {
            tracing::debug!(command = %label, "stream consumer gone, killing child");
            let _ = child.kill().await;
            return;
        }
    }

    // The child may close its pipes and keep running
    let status = tokio::select! {
        status = child.wait() => status,
        _ = tx.closed() => {
            tracing::debug!(command = %label, "stream consumer gone before exit, killing child");
            let _ = child.kill().await;
            return;
        }
    };

    let terminal = match status {
        Ok(status) => {
            let exit_code = status.code().unwrap_or(-1);
            tracing::info!(command = %label, exit_code, "streamed command finished");
            OutputEvent::Complete { exit_code }
        }
        Err(e) => {
            tracing::warn!(command = %label, error = %e, "failed to reap streamed command");
            OutputEvent::Error {
                message: format!("Failed to wait for process: {}", e),
            }
        }
    };
    let _ = tx.send(terminal).await;
}

async fn abort(child: &mut Child, tx: &mpsc::Sender<OutputEvent>, label: &str, error: io::Error) {
    tracing::warn!(command = %label, error = %error, "error reading command output");
    let _ = child.kill().await;
    let _ = tx
        .send(OutputEvent::Error {
            message: format!("Error reading output: {}", error),
        })
        .await;
}

/// Lossy UTF-8 with the line terminator (and a preceding CR) removed
fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
