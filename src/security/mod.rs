pub mod confine;
pub mod patterns;
pub mod session;
pub mod validator;

pub use confine::{ResolvedPath, confine_relative, resolve_confined};
pub use patterns::{contains_dangerous_pattern, contains_shell_metacharacter};
pub use session::{AuthFailure, SessionCredential, SessionGate};
pub use validator::{AcceptedCommand, CommandValidator, LineRange, RejectionCategory, ValidationError};

/// Build tool invoked by the `make` operation
pub const MAKE_PROGRAM: &str = "make";

/// Version control client invoked by the `git` operation
pub const GIT_PROGRAM: &str = "git";

/// Directory lister invoked by the `ls` operation
pub const LS_PROGRAM: &str = "ls";

/// Allowlist of permitted git subcommands
///
/// Read operations plus the branch operations needed to sync a working tree.
/// Anything that publishes or rewrites remote state stays out.
///
/// Adding a new subcommand requires careful security review.
pub const ALLOWED_GIT_SUBCOMMANDS: &[&str] = &[
    // Read operations
    "status",
    "log",
    "branch",
    "diff",
    "show",
    // Branch operations
    "checkout",
    "pull",
    "fetch",
    "reset",
];
