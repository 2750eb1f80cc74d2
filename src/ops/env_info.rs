use futures::future::join_all;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{OperationError, OperationResult};
use crate::exec::CommandExecutor;
use crate::repo::Repository;
use crate::security::AcceptedCommand;

/// Environment variables included in the built-in report
const REPORTED_VARIABLES: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "SHELL",
    "LANG",
    "CC",
    "CXX",
    "CFLAGS",
    "LDFLAGS",
    "PKG_CONFIG_PATH",
];

/// Build tools queried with `--version`
const REPORTED_TOOLS: &[&str] = &[
    "gcc", "g++", "clang", "make", "cmake", "python3", "git", "rustc", "cargo",
];

/// A single `--version` query that does not answer in time counts as missing
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Installed version of a build tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolVersion {
    pub tool: String,
    pub version: Option<String>,
}

impl ToolVersion {
    /// Run `<tool> --version` and keep the first line it prints
    pub async fn detect(tool: &str) -> Self {
        let query = Command::new(tool)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let version = match tokio::time::timeout(VERSION_TIMEOUT, query).await {
            Ok(Ok(output)) => Self::parse(&output.stdout).or_else(|| Self::parse(&output.stderr)),
            Ok(Err(_)) | Err(_) => None,
        };

        Self {
            tool: tool.to_string(),
            version,
        }
    }

    /// First non-empty line of the version output
    pub fn parse(output: &[u8]) -> Option<String> {
        String::from_utf8_lossy(output)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }
}

impl std::fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}: {}", self.tool, version),
            None => write!(f, "{}: not found", self.tool),
        }
    }
}

/// Describe the build environment of `repo`.
///
/// A configured script replaces the built-in report and runs with the
/// repository as its working directory.
pub async fn env_info(repo: &Repository, script: Option<&Path>) -> OperationResult<String> {
    if let Some(script) = script {
        if !script.is_file() {
            return Err(OperationError::FileNotFound(format!(
                "Environment info script not found: {}",
                script.display()
            )));
        }

        let command = AcceptedCommand::new(script.to_string_lossy(), Vec::new());
        let output = CommandExecutor::new(repo.path()).run(&command).await?;
        return Ok(output.render());
    }

    Ok(builtin_report().await)
}

async fn builtin_report() -> String {
    let mut report = String::from("=== ENVIRONMENT ===\n");
    for name in REPORTED_VARIABLES {
        if let Ok(value) = std::env::var(name) {
            report.push_str(&format!("{}={}\n", name, value));
        }
    }

    let versions = join_all(REPORTED_TOOLS.iter().map(|tool| ToolVersion::detect(tool))).await;

    report.push_str("\n=== TOOL VERSIONS ===\n");
    for version in versions {
        report.push_str(&format!("{}\n", version));
    }

    report
}
