use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use thiserror::Error;

use crate::security::patterns::find_dangerous_pattern;
use crate::security::{ALLOWED_GIT_SUBCOMMANDS, GIT_PROGRAM, LS_PROGRAM, MAKE_PROGRAM};

static MAKE_ARGS_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[\*a-zA-Z0-9_\-=\s/\.'"]+$"#).expect("make charset must compile")
});

static LS_FLAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-[a-zA-Z]+$").expect("ls flag pattern must compile"));

/// Coarse classification of a rejected argument string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionCategory {
    DangerousPattern,
    DisallowedSubcommand,
    ForcedOperation,
    InvalidCharacter,
    InvalidFlag,
    PathEscape,
    MissingArgument,
    InvalidRange,
}

impl RejectionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCategory::DangerousPattern => "dangerous-pattern",
            RejectionCategory::DisallowedSubcommand => "disallowed-subcommand",
            RejectionCategory::ForcedOperation => "forced-operation",
            RejectionCategory::InvalidCharacter => "invalid-character",
            RejectionCategory::InvalidFlag => "invalid-flag",
            RejectionCategory::PathEscape => "path-escape",
            RejectionCategory::MissingArgument => "missing-argument",
            RejectionCategory::InvalidRange => "invalid-range",
        }
    }
}

impl fmt::Display for RejectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{subject} contain dangerous patterns ({pattern}): {text}")]
    DangerousPattern {
        subject: &'static str,
        pattern: &'static str,
        text: String,
    },

    #[error("Git subcommand '{subcommand}' not allowed. Allowed commands: {allowed}")]
    DisallowedSubcommand { subcommand: String, allowed: String },

    #[error("Force {0} not allowed")]
    ForcedOperation(String),

    #[error("{subject} contain invalid characters: {text}")]
    InvalidCharacter { subject: &'static str, text: String },

    #[error("Invalid ls flag: {0}")]
    InvalidFlag(String),

    #[error(
        "Access denied: Path '{path}' resolves to '{}' which is outside repository '{}'",
        resolved.display(),
        root.display()
    )]
    OutsideRepository {
        path: String,
        resolved: PathBuf,
        root: PathBuf,
    },

    #[error("Absolute paths not allowed: {0}")]
    AbsolutePath(String),

    #[error("Path traversal not allowed: {0}")]
    PathTraversal(String),

    #[error("{0}")]
    MissingArgument(&'static str),

    #[error("Invalid line range: {0}")]
    InvalidRange(String),
}

impl ValidationError {
    pub fn category(&self) -> RejectionCategory {
        match self {
            ValidationError::DangerousPattern { .. } => RejectionCategory::DangerousPattern,
            ValidationError::DisallowedSubcommand { .. } => RejectionCategory::DisallowedSubcommand,
            ValidationError::ForcedOperation(_) => RejectionCategory::ForcedOperation,
            ValidationError::InvalidCharacter { .. } => RejectionCategory::InvalidCharacter,
            ValidationError::InvalidFlag(_) => RejectionCategory::InvalidFlag,
            ValidationError::OutsideRepository { .. }
            | ValidationError::AbsolutePath(_)
            | ValidationError::PathTraversal(_) => RejectionCategory::PathEscape,
            ValidationError::MissingArgument(_) => RejectionCategory::MissingArgument,
            ValidationError::InvalidRange(_) => RejectionCategory::InvalidRange,
        }
    }
}

/// A command that passed validation, ready to hand to the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedCommand {
    program: String,
    args: Vec<String>,
}

impl AcceptedCommand {
    pub(crate) fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Operands that are not flags (used for path confinement)
    pub fn operands(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .map(String::as_str)
            .filter(|arg| !arg.starts_with('-'))
    }
}

impl fmt::Display for AcceptedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Optional 1-based inclusive line bounds for file reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LineRange {
    #[serde(default, rename = "start_line")]
    pub start: Option<i64>,
    #[serde(default, rename = "end_line")]
    pub end: Option<i64>,
}

impl LineRange {
    pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
        Self { start, end }
    }

    /// True when no bound was given
    pub fn is_full(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Resolve the range against a file's line count.
    ///
    /// Returns inclusive 1-based `(start, end)`. An end past the last line is
    /// clamped; an inverted range or one that starts past the end is rejected.
    pub fn resolve(&self, total_lines: usize) -> Result<(usize, usize), ValidationError> {
        if let Some(start) = self.start
            && start < 1
        {
            return Err(ValidationError::InvalidRange(format!(
                "start_line must be >= 1, got {}",
                start
            )));
        }
        if let Some(end) = self.end
            && end < 1
        {
            return Err(ValidationError::InvalidRange(format!(
                "end_line must be >= 1, got {}",
                end
            )));
        }
        if let (Some(start), Some(end)) = (self.start, self.end)
            && start > end
        {
            return Err(ValidationError::InvalidRange(format!(
                "start_line ({}) is greater than end_line ({})",
                start, end
            )));
        }

        let start = self.start.map_or(1, |s| s as usize);
        if start > total_lines {
            return Err(ValidationError::InvalidRange(format!(
                "start_line ({}) exceeds total lines ({})",
                start, total_lines
            )));
        }
        let end = self
            .end
            .map_or(total_lines, |e| (e as usize).min(total_lines));

        Ok((start, end))
    }
}

/// Validates raw argument strings for each operation
pub struct CommandValidator {
    allowed_git_subcommands: HashSet<&'static str>,
}

impl CommandValidator {
    pub fn new() -> Self {
        // Use shared allowlist from security module
        let allowed_git_subcommands = ALLOWED_GIT_SUBCOMMANDS.iter().copied().collect();

        Self {
            allowed_git_subcommands,
        }
    }

    /// Validate build tool arguments. Empty args run the default target.
    pub fn validate_make(&self, args: &str) -> Result<AcceptedCommand, ValidationError> {
        if args.is_empty() {
            return Ok(AcceptedCommand::new(MAKE_PROGRAM, Vec::new()));
        }

        self.check_for_injection("Make arguments", args)?;

        // Targets or variable assignments; quotes allowed for values with spaces
        if !MAKE_ARGS_CHARSET.is_match(args) {
            return Err(ValidationError::InvalidCharacter {
                subject: "Make arguments",
                text: args.to_string(),
            });
        }

        let tokens = shlex::split(args).ok_or_else(|| ValidationError::InvalidCharacter {
            subject: "Make arguments (unbalanced quotes)",
            text: args.to_string(),
        })?;

        Ok(AcceptedCommand::new(MAKE_PROGRAM, tokens))
    }

    /// Validate version control arguments against the subcommand allowlist
    pub fn validate_git(&self, args: &str) -> Result<AcceptedCommand, ValidationError> {
        if args.is_empty() {
            return Err(ValidationError::MissingArgument(
                "Git command requires arguments",
            ));
        }

        self.check_for_injection("Git arguments", args)?;

        let parts: Vec<&str> = args.split_whitespace().collect();
        let subcommand = match parts.first() {
            Some(first) => first.to_lowercase(),
            None => {
                return Err(ValidationError::MissingArgument("Empty git command"));
            }
        };

        if !self.allowed_git_subcommands.contains(subcommand.as_str()) {
            return Err(ValidationError::DisallowedSubcommand {
                subcommand,
                allowed: Self::allowed_git_list(),
            });
        }

        if matches!(subcommand.as_str(), "checkout" | "pull")
            && parts.iter().any(|p| *p == "-f" || *p == "--force")
        {
            return Err(ValidationError::ForcedOperation(subcommand));
        }

        Ok(AcceptedCommand::new(
            GIT_PROGRAM,
            parts.into_iter().map(str::to_string).collect(),
        ))
    }

    /// Validate directory listing arguments.
    ///
    /// Paths must be relative and free of `..`; the dispatcher still confines
    /// them against the repository root afterwards.
    pub fn validate_ls(&self, args: &str) -> Result<AcceptedCommand, ValidationError> {
        if args.is_empty() {
            return Ok(AcceptedCommand::new(LS_PROGRAM, Vec::new()));
        }

        self.check_for_injection("Ls arguments", args)?;

        let mut tokens = Vec::new();
        for part in args.split_whitespace() {
            if part.starts_with('-') {
                if !LS_FLAG.is_match(part) {
                    return Err(ValidationError::InvalidFlag(part.to_string()));
                }
            } else {
                Self::check_relative_path(part)?;
            }
            tokens.push(part.to_string());
        }

        Ok(AcceptedCommand::new(LS_PROGRAM, tokens))
    }

    /// Check for shell metacharacters and parent-directory idioms
    fn check_for_injection(&self, subject: &'static str, text: &str) -> Result<(), ValidationError> {
        match find_dangerous_pattern(text) {
            Some(pattern) => Err(ValidationError::DangerousPattern {
                subject,
                pattern,
                text: text.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn check_relative_path(path: &str) -> Result<(), ValidationError> {
        if path.starts_with('/') {
            return Err(ValidationError::AbsolutePath(path.to_string()));
        }
        if path.split('/').any(|segment| segment == "..") {
            return Err(ValidationError::PathTraversal(path.to_string()));
        }
        Ok(())
    }

    fn allowed_git_list() -> String {
        let mut allowed: Vec<&str> = ALLOWED_GIT_SUBCOMMANDS.to_vec();
        allowed.sort_unstable();
        allowed.join(", ")
    }
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new()
    }
}
