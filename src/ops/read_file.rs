use std::io;
use tokio::fs;

use crate::error::{OperationError, OperationResult};
use crate::repo::Repository;
use crate::security::{LineRange, resolve_confined};

/// Read a file inside `repo`, optionally limited to a line range.
///
/// The path may be relative to the repository root or absolute, as long as it
/// resolves inside the root. Content is decoded lossily.
pub async fn read_file(repo: &Repository, path: &str, range: LineRange) -> OperationResult<String> {
    let resolved = resolve_confined(path, repo.path())?;

    let metadata = fs::metadata(resolved.as_path())
        .await
        .map_err(|e| map_io_error(e, path))?;
    if !metadata.is_file() {
        return Err(OperationError::NotAFile(path.to_string()));
    }

    let bytes = fs::read(resolved.as_path())
        .await
        .map_err(|e| map_io_error(e, path))?;
    let content = String::from_utf8_lossy(&bytes);

    // Line terminators are kept so the selection reproduces the file exactly
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let total = lines.len();
    let shown = resolved.as_path().display();

    if range.is_full() {
        return Ok(format!("File: {}\nTotal lines: {}\n\n{}", shown, total, content));
    }

    let (start, end) = range.resolve(total)?;
    let selected = lines[start - 1..end].concat();

    tracing::debug!(path = %shown, start, end, total, "read file range");

    Ok(format!(
        "File: {}\nLines {}-{} of {}\n\n{}",
        shown, start, end, total, selected
    ))
}

fn map_io_error(error: io::Error, path: &str) -> OperationError {
    match error.kind() {
        io::ErrorKind::NotFound => OperationError::FileNotFound(path.to_string()),
        io::ErrorKind::PermissionDenied => OperationError::PermissionDenied(path.to_string()),
        _ => OperationError::Io(error),
    }
}
