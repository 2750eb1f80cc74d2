use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::security::LineRange;

/// Errors raised while turning a tool call into a typed request
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
}

/// One operation with its arguments, parsed at the transport boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationRequest {
    List,
    RunBuild { repo: Option<String>, args: String },
    RunVcs { repo: Option<String>, args: String },
    ListDir { repo: Option<String>, args: String },
    ReadFile {
        repo: Option<String>,
        path: String,
        line_range: LineRange,
    },
    EnvInfo { repo: Option<String> },
}

#[derive(Debug, Default, Deserialize)]
struct CommandArgs {
    #[serde(default)]
    repo: Option<String>,
    #[serde(default)]
    args: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ReadFileArgs {
    #[serde(default)]
    repo: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(flatten)]
    line_range: LineRange,
}

#[derive(Debug, Default, Deserialize)]
struct RepoArgs {
    #[serde(default)]
    repo: Option<String>,
}

impl OperationRequest {
    /// Parse a named tool call. A null argument bag counts as empty.
    pub fn from_tool_call(name: &str, arguments: &Value) -> Result<Self, RequestError> {
        let request = match name {
            "list" => OperationRequest::List,
            "make" => {
                let CommandArgs { repo, args } = parse_args(name, arguments)?;
                OperationRequest::RunBuild {
                    repo,
                    args: args.unwrap_or_default(),
                }
            }
            "git" => {
                let CommandArgs { repo, args } = parse_args(name, arguments)?;
                OperationRequest::RunVcs {
                    repo,
                    args: args.unwrap_or_default(),
                }
            }
            "ls" => {
                let CommandArgs { repo, args } = parse_args(name, arguments)?;
                OperationRequest::ListDir {
                    repo,
                    args: args.unwrap_or_default(),
                }
            }
            "read_file" => {
                let ReadFileArgs {
                    repo,
                    path,
                    line_range,
                } = parse_args(name, arguments)?;
                OperationRequest::ReadFile {
                    repo,
                    path: path.unwrap_or_default(),
                    line_range,
                }
            }
            "env" => {
                let RepoArgs { repo } = parse_args(name, arguments)?;
                OperationRequest::EnvInfo { repo }
            }
            other => return Err(RequestError::UnknownTool(other.to_string())),
        };

        Ok(request)
    }

    /// Tool name of this operation
    pub fn operation_name(&self) -> &'static str {
        match self {
            OperationRequest::List => "list",
            OperationRequest::RunBuild { .. } => "make",
            OperationRequest::RunVcs { .. } => "git",
            OperationRequest::ListDir { .. } => "ls",
            OperationRequest::ReadFile { .. } => "read_file",
            OperationRequest::EnvInfo { .. } => "env",
        }
    }

    pub fn repo(&self) -> Option<&str> {
        match self {
            OperationRequest::List => None,
            OperationRequest::RunBuild { repo, .. }
            | OperationRequest::RunVcs { repo, .. }
            | OperationRequest::ListDir { repo, .. }
            | OperationRequest::ReadFile { repo, .. }
            | OperationRequest::EnvInfo { repo } => repo.as_deref(),
        }
    }

    /// Raw argument text, as recorded in the audit log
    pub fn raw_args(&self) -> &str {
        match self {
            OperationRequest::RunBuild { args, .. }
            | OperationRequest::RunVcs { args, .. }
            | OperationRequest::ListDir { args, .. } => args,
            OperationRequest::ReadFile { path, .. } => path,
            OperationRequest::List | OperationRequest::EnvInfo { .. } => "",
        }
    }
}

fn parse_args<T: DeserializeOwned + Default>(tool: &str, arguments: &Value) -> Result<T, RequestError> {
    if arguments.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(arguments.clone()).map_err(|e| RequestError::InvalidArguments {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}
