use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;

use crate::error::{OperationError, OperationResult};
use crate::security::AcceptedCommand;

/// Result of running a command to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Render into the text returned to callers.
    ///
    /// Sections for non-empty stdout and stderr, an exit code trailer when it
    /// is non-zero, and `(no output)` when there is nothing to show.
    pub fn render(&self) -> String {
        let mut sections: Vec<String> = Vec::new();

        if !self.stdout.is_empty() {
            sections.push("=== STDOUT ===".to_string());
            sections.push(self.stdout.clone());
        }

        if !self.stderr.is_empty() {
            sections.push("=== STDERR ===".to_string());
            sections.push(self.stderr.clone());
        }

        if self.exit_code != 0 {
            sections.push(format!("\n=== EXIT CODE: {} ===", self.exit_code));
        }

        if sections.is_empty() {
            "(no output)".to_string()
        } else {
            sections.join("\n")
        }
    }
}

/// Runs validated commands inside a working directory
///
/// Programs are spawned directly with an argument vector; nothing is ever
/// handed to a shell.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    working_dir: PathBuf,
}

impl CommandExecutor {
    pub fn new<P: AsRef<Path>>(working_dir: P) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
        }
    }

    /// Run the command to completion and capture both output streams
    pub async fn run(&self, command: &AcceptedCommand) -> OperationResult<CommandOutput> {
        self.check_working_dir()?;

        tracing::debug!(command = %command, cwd = %self.working_dir.display(), "running command");

        let output = self
            .command(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| OperationError::Spawn {
                program: command.program().to_string(),
                source,
            })?;

        let output = self.process_output(output);
        tracing::info!(command = %command, exit_code = output.exit_code, "command finished");

        Ok(output)
    }

    /// Build the process with stdin closed and the child tied to the handle
    pub(crate) fn command(&self, command: &AcceptedCommand) -> Command {
        let mut cmd = Command::new(command.program());
        cmd.args(command.args())
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    pub(crate) fn check_working_dir(&self) -> OperationResult<()> {
        if !self.working_dir.is_dir() {
            return Err(OperationError::RepositoryPathMissing(self.working_dir.clone()));
        }
        Ok(())
    }

    fn process_output(&self, output: Output) -> CommandOutput {
        CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            // Killed by a signal
            exit_code: output.status.code().unwrap_or(-1),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}
