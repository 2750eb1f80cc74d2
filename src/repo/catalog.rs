use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{OperationError, OperationResult};

/// A named working directory that operations run in and are confined to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repository {
    pub name: String,
    pub root_path: PathBuf,
    pub description: String,
}

impl Repository {
    pub fn new<P: AsRef<Path>>(name: impl Into<String>, root_path: P, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root_path: root_path.as_ref().to_path_buf(),
            description: description.into(),
        }
    }

    /// Get the repository path
    pub fn path(&self) -> &Path {
        &self.root_path
    }
}

/// Read-only set of repositories found at startup
#[derive(Debug, Clone, Default)]
pub struct RepoCatalog {
    base_dir: PathBuf,
    repos: Vec<Repository>,
}

impl RepoCatalog {
    /// Scan the immediate subdirectories of `base_dir` for git working trees
    pub fn discover<P: AsRef<Path>>(base_dir: P) -> Self {
        let base_dir = base_dir.as_ref();
        let base_dir = fs::canonicalize(base_dir).unwrap_or_else(|_| base_dir.to_path_buf());

        let repos = match Self::scan(&base_dir) {
            Ok(repos) => repos,
            Err(e) => {
                tracing::error!(base_dir = %base_dir.display(), error = %e, "error discovering repositories");
                Vec::new()
            }
        };

        tracing::info!(
            count = repos.len(),
            base_dir = %base_dir.display(),
            "discovered repositories"
        );

        Self { base_dir, repos }
    }

    /// Build a catalog from known repositories
    pub fn from_repositories(base_dir: impl Into<PathBuf>, mut repos: Vec<Repository>) -> Self {
        repos.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            base_dir: base_dir.into(),
            repos,
        }
    }

    fn scan(base_dir: &Path) -> std::io::Result<Vec<Repository>> {
        let mut repos = Vec::new();

        for entry in fs::read_dir(base_dir)? {
            let path = entry?.path();
            if !path.is_dir() || !path.join(".git").exists() {
                continue;
            }

            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let relative = path.strip_prefix(base_dir).unwrap_or(&path);
            let description = format!("Repository at {}", relative.display());

            repos.push(Repository::new(name, &path, description));
        }

        repos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(repos)
    }

    /// Look up a repository by name.
    ///
    /// The root must still exist as a directory at lookup time.
    pub fn get(&self, name: Option<&str>) -> OperationResult<&Repository> {
        let name = match name {
            Some(name) if !name.is_empty() => name,
            _ => return Err(OperationError::MissingRepository),
        };

        let repo = self
            .repos
            .iter()
            .find(|repo| repo.name == name)
            .ok_or_else(|| OperationError::UnknownRepository(name.to_string()))?;

        if !repo.root_path.is_dir() {
            return Err(OperationError::RepositoryPathMissing(repo.root_path.clone()));
        }

        Ok(repo)
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repos
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    /// Text returned by the `list` operation
    pub fn render_list(&self) -> String {
        if self.repos.is_empty() {
            return "No repositories configured".to_string();
        }

        let mut output = String::from("Available repositories:\n\n");
        for repo in &self.repos {
            output.push_str(&format!("- {}\n", repo.name));
            output.push_str(&format!("  Path: {}\n", repo.root_path.display()));
            output.push_str(&format!("  Description: {}\n\n", repo.description));
        }
        output
    }
}
