use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024; // 10MB

/// One entry destined for the audit log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditRecord {
    Command {
        command: String,
        repo_path: PathBuf,
        exit_code: i32,
    },
    Rejection {
        operation: String,
        args: String,
        reason: String,
        repo: Option<String>,
    },
}

/// Append-only record of executed commands and rejected requests
#[derive(Debug)]
pub struct AuditLogger {
    log_path: PathBuf,
}

impl AuditLogger {
    /// Create an AuditLogger writing to `path`
    pub fn with_path<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let log_path = path.as_ref().to_path_buf();

        // Ensure directory exists
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }

        Ok(Self { log_path })
    }

    /// Log a command execution
    pub fn log_command(
        &self,
        command: &str,
        repo_path: &Path,
        exit_code: i32,
    ) -> std::io::Result<()> {
        let log_entry = format!(
            "[{}] [{}] [{}] [exit:{}] {}\n",
            Utc::now().to_rfc3339(),
            current_user(),
            escape_field(&repo_path.display().to_string()),
            exit_code,
            escape_field(command)
        );

        self.append(&log_entry)
    }

    /// Log a rejected request for forensics
    ///
    /// Records the raw arguments as received, with control characters and
    /// quotes escaped so one request always produces exactly one line.
    pub fn log_validation_failure(
        &self,
        operation: &str,
        args: &str,
        reason: &str,
        repo: Option<&str>,
    ) -> std::io::Result<()> {
        let log_entry = format!(
            "[{}] [{}] [{}] [VALIDATION-REJECTED] operation=\"{}\" args=\"{}\" reason=\"{}\"\n",
            Utc::now().to_rfc3339(),
            current_user(),
            escape_field(repo.unwrap_or("-")),
            escape_field(operation),
            escape_field(args),
            escape_field(reason)
        );

        self.append(&log_entry)
    }

    /// Write one record
    pub fn record(&self, record: &AuditRecord) -> io::Result<()> {
        match record {
            AuditRecord::Command {
                command,
                repo_path,
                exit_code,
            } => self.log_command(command, repo_path, *exit_code),
            AuditRecord::Rejection {
                operation,
                args,
                reason,
                repo,
            } => self.log_validation_failure(operation, args, reason, repo.as_deref()),
        }
    }

    /// Write one record on the blocking thread pool
    pub async fn record_async(self: Arc<Self>, record: AuditRecord) -> io::Result<()> {
        tokio::task::spawn_blocking(move || self.record(&record))
            .await
            .map_err(io::Error::other)?
    }

    fn append(&self, log_entry: &str) -> std::io::Result<()> {
        // Check and rotate log if needed
        self.rotate_if_needed()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        file.write_all(log_entry.as_bytes())?;
        file.flush()?;

        Ok(())
    }

    /// Rotate log file if it exceeds MAX_LOG_SIZE
    fn rotate_if_needed(&self) -> std::io::Result<()> {
        if !self.log_path.exists() {
            return Ok(());
        }

        let metadata = fs::metadata(&self.log_path)?;
        if metadata.len() > MAX_LOG_SIZE {
            // Rotate: audit.log -> audit.log.1
            let backup_path = self.log_path.with_extension("log.1");
            fs::rename(&self.log_path, backup_path)?;
        }

        Ok(())
    }

    /// Get the path to the log file
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

/// Escape newlines, quotes and other control characters
fn escape_field(text: &str) -> String {
    text.escape_debug().to_string()
}

fn current_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_logger_creates_parent() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("nested/dir/audit.log");

        let logger = AuditLogger::with_path(&log_path).unwrap();
        assert_eq!(logger.log_path(), log_path);
        assert!(log_path.parent().unwrap().is_dir());
    }

    #[test]
    fn test_log_command() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("audit.log");

        let logger = AuditLogger::with_path(&log_path).unwrap();
        logger
            .log_command("make clean all", Path::new("/srv/repos/demo"), 0)
            .unwrap();

        let content = fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("make clean all"));
        assert!(content.contains("/srv/repos/demo"));
        assert!(content.contains("exit:0"));
    }

    #[test]
    fn test_multiple_log_entries() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("audit.log");

        let logger = AuditLogger::with_path(&log_path).unwrap();
        let repo_path = Path::new("/srv/repos/demo");

        logger.log_command("git status", repo_path, 0).unwrap();
        logger.log_command("ls -la", repo_path, 0).unwrap();
        logger.log_command("make test", repo_path, 2).unwrap();

        let content = fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].contains("exit:2"));
    }

    #[test]
    fn test_log_rotation() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("audit.log");

        let logger = AuditLogger::with_path(&log_path).unwrap();
        let repo_path = Path::new("/srv/repos/demo");

        // Write a large entry to trigger rotation
        let large_command = "make ".to_string() + &"x".repeat(MAX_LOG_SIZE as usize);
        logger.log_command(&large_command, repo_path, 0).unwrap();

        // Write another entry - should trigger rotation
        logger.log_command("git status", repo_path, 0).unwrap();

        let backup_path = log_path.with_extension("log.1");
        assert!(backup_path.exists());

        assert!(log_path.exists());
        let metadata = fs::metadata(&log_path).unwrap();
        assert!(metadata.len() < MAX_LOG_SIZE);
    }

    #[test]
    fn test_log_validation_failure() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("audit.log");

        let logger = AuditLogger::with_path(&log_path).unwrap();
        logger
            .log_validation_failure(
                "git",
                "status; rm -rf /",
                "Git arguments contain dangerous patterns",
                Some("demo"),
            )
            .unwrap();

        let content = fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("VALIDATION-REJECTED"));
        assert!(content.contains("operation=\"git\""));
        assert!(content.contains("status; rm -rf /"));
        assert!(content.contains("[demo]"));
    }

    #[test]
    fn test_log_validation_failure_without_repo() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("audit.log");

        let logger = AuditLogger::with_path(&log_path).unwrap();
        logger
            .log_validation_failure("make", "all`id`", "backtick", None)
            .unwrap();

        let content = fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("[-] [VALIDATION-REJECTED]"));
    }

    #[test]
    fn test_rejected_newline_stays_on_one_line() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("audit.log");

        let logger = AuditLogger::with_path(&log_path).unwrap();
        let forged = "push\n[2026-01-01T00:00:00+00:00] [admin] [/srv/demo] [exit:0] git status";
        logger
            .log_validation_failure("git", forged, "Git subcommand 'push' not allowed", Some("demo"))
            .unwrap();
        logger
            .log_validation_failure("git", "status\" reason=\"ok", "quote", Some("demo\nx"))
            .unwrap();

        let content = fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("args=\"push\\n[2026-01-01"));
        assert!(!lines.iter().any(|line| line.starts_with("[2026-01-01")));
        assert!(lines[1].contains("args=\"status\\\" reason=\\\"ok\""));
        assert!(lines[1].contains("[demo\\nx]"));
    }

    #[test]
    fn test_command_with_newline_is_escaped() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("audit.log");

        let logger = AuditLogger::with_path(&log_path).unwrap();
        logger
            .log_command("make 'a\nb'", Path::new("/srv/repos/demo"), 0)
            .unwrap();

        let content = fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("a\\nb"));
    }

    #[tokio::test]
    async fn test_record_async() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("audit.log");

        let logger = Arc::new(AuditLogger::with_path(&log_path).unwrap());
        logger
            .clone()
            .record_async(AuditRecord::Command {
                command: "ls -la".into(),
                repo_path: PathBuf::from("/srv/repos/demo"),
                exit_code: 0,
            })
            .await
            .unwrap();
        logger
            .record_async(AuditRecord::Rejection {
                operation: "git".into(),
                args: "push".into(),
                reason: "not allowed".into(),
                repo: None,
            })
            .await
            .unwrap();

        let content = fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[exit:0] ls -la"));
        assert!(lines[1].contains("[-] [VALIDATION-REJECTED] operation=\"git\""));
    }
}
