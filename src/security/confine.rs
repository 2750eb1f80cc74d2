use path_clean::PathClean;
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::security::patterns::find_shell_metacharacter;
use crate::security::validator::ValidationError;

/// An absolute path proven to be the repository root or a descendant of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath(PathBuf);

impl ResolvedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Resolve `path_text` against `repo_root` and prove it stays inside.
///
/// Absolute paths are accepted as long as they land inside the repository.
pub fn resolve_confined(path_text: &str, repo_root: &Path) -> Result<ResolvedPath, ValidationError> {
    if path_text.is_empty() {
        return Err(ValidationError::MissingArgument("File path cannot be empty"));
    }

    if let Some(pattern) = find_shell_metacharacter(path_text) {
        return Err(ValidationError::DangerousPattern {
            subject: "File path",
            pattern,
            text: path_text.to_string(),
        });
    }

    let candidate = Path::new(path_text);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        repo_root.join(candidate)
    };

    let root = canonicalize_lenient(repo_root);
    let resolved = canonicalize_lenient(&joined);

    // Path::starts_with compares whole components, so /repoXYZ is not under /repo
    if !resolved.starts_with(&root) {
        return Err(ValidationError::OutsideRepository {
            path: path_text.to_string(),
            resolved,
            root,
        });
    }

    // Second, independent pass for inputs that spell out a parent directory
    if has_parent_component(candidate) && !recheck_contained(&joined, repo_root, &root) {
        return Err(ValidationError::PathTraversal(path_text.to_string()));
    }

    Ok(ResolvedPath(resolved))
}

/// Directory-listing variant: only relative paths without `..` are allowed.
pub fn confine_relative(path_text: &str, repo_root: &Path) -> Result<ResolvedPath, ValidationError> {
    let candidate = Path::new(path_text);
    if candidate.is_absolute() {
        return Err(ValidationError::AbsolutePath(path_text.to_string()));
    }
    if has_parent_component(candidate) {
        return Err(ValidationError::PathTraversal(path_text.to_string()));
    }
    resolve_confined(path_text, repo_root)
}

fn has_parent_component(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}

/// Canonicalize the longest existing ancestor and re-append the rest.
///
/// `fs::canonicalize` alone fails for paths that do not exist yet.
fn canonicalize_lenient(path: &Path) -> PathBuf {
    let cleaned = path.clean();
    let mut existing = cleaned.as_path();
    let mut tail: Vec<&OsStr> = Vec::new();

    loop {
        if let Ok(canonical) = fs::canonicalize(existing) {
            return tail
                .iter()
                .rev()
                .fold(canonical, |acc, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name);
                existing = parent;
            }
            _ => return cleaned.clone(),
        }
    }
}

fn recheck_contained(joined: &Path, repo_root: &Path, canonical_root: &Path) -> bool {
    match fs::canonicalize(joined) {
        Ok(strict) => strict.starts_with(canonical_root),
        Err(_) => joined.clean().starts_with(repo_root.clean()),
    }
}
