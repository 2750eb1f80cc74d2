#![allow(dead_code)]

use mcp_build::{Dispatcher, RepoCatalog};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Helper to create a test git repository
pub fn create_test_repo() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let repo_path = temp_dir.path().to_path_buf();
    init_git(&repo_path);
    (temp_dir, repo_path)
}

/// Helper to create a commit
pub fn create_commit(repo_path: &Path, file: &str, content: &str, message: &str) {
    let file_path = repo_path.join(file);
    if let Some(parent) = file_path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    fs::write(&file_path, content).expect("Failed to write file");

    git(repo_path, &["add", file]);
    git(repo_path, &["commit", "-m", message]);
}

/// Helper to create a base directory holding one git repository named `demo`
///
/// The repository has a Makefile, a committed README and a 100-line file.
pub fn create_repos_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let repo_path = temp_dir.path().join("demo");
    fs::create_dir_all(&repo_path).unwrap();
    init_git(&repo_path);

    create_commit(&repo_path, "README.md", "# demo\n", "Initial commit");
    fs::write(
        repo_path.join("Makefile"),
        "all:\n\t@echo building\n\nfail:\n\t@echo broken >&2\n\t@exit 3\n",
    )
    .unwrap();
    write_numbered_lines(&repo_path.join("src/lines.txt"), 100);

    (temp_dir, repo_path)
}

/// Dispatcher over everything discovered under `base_dir`
pub fn create_dispatcher(base_dir: &Path) -> Dispatcher {
    Dispatcher::new(RepoCatalog::discover(base_dir))
}

/// Write a file whose lines read "line 1" .. "line N"
pub fn write_numbered_lines(path: &Path, count: usize) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let content: String = (1..=count).map(|i| format!("line {}\n", i)).collect();
    fs::write(path, content).unwrap();
}

pub fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

pub fn make_available() -> bool {
    Command::new("make").arg("--version").output().is_ok()
}

fn init_git(repo_path: &Path) {
    // Initialize git repo
    git(repo_path, &["init"]);

    // Configure git
    git(repo_path, &["config", "user.name", "Test User"]);
    git(repo_path, &["config", "user.email", "test@example.com"]);

    // Discovery only needs the marker directory
    fs::create_dir_all(repo_path.join(".git")).unwrap();
}

/// Missing git is tolerated; tests that need it check `git_available`
fn git(repo_path: &Path, args: &[&str]) {
    let _ = Command::new("git").args(args).current_dir(repo_path).output();
}
