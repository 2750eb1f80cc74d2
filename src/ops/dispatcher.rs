use futures::StreamExt;
use futures::stream::BoxStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::audit::{AuditLogger, AuditRecord};
use crate::error::{OperationError, OperationResult};
use crate::exec::{CommandExecutor, OutputEvent};
use crate::ops::env_info::env_info;
use crate::ops::read_file::read_file;
use crate::ops::request::OperationRequest;
use crate::repo::{RepoCatalog, Repository};
use crate::security::{AcceptedCommand, CommandValidator, confine_relative};

/// Output events of a streamed operation
pub type EventStream = BoxStream<'static, OutputEvent>;

/// Routes typed requests through validation, repository lookup and execution
pub struct Dispatcher {
    catalog: RepoCatalog,
    validator: CommandValidator,
    env_info_script: Option<PathBuf>,
    audit: Option<Arc<AuditLogger>>,
}

impl Dispatcher {
    pub fn new(catalog: RepoCatalog) -> Self {
        Self {
            catalog,
            validator: CommandValidator::new(),
            env_info_script: None,
            audit: None,
        }
    }

    pub fn with_env_info_script(mut self, script: Option<PathBuf>) -> Self {
        self.env_info_script = script;
        self
    }

    pub fn with_audit_logger(mut self, audit: Option<AuditLogger>) -> Self {
        self.audit = audit.map(Arc::new);
        self
    }

    pub fn catalog(&self) -> &RepoCatalog {
        &self.catalog
    }

    /// Run an operation to completion and return its rendered text
    pub async fn dispatch(&self, request: &OperationRequest) -> OperationResult<String> {
        let result = self.run(request).await;
        if let Err(e) = &result {
            self.record_failure(request, e).await;
        }
        result
    }

    /// Start a command operation and stream its output.
    ///
    /// Only build, version control and directory listing stream; anything
    /// else is `UnsupportedStreaming`. Validation and spawn failures are
    /// returned before any event is produced.
    pub async fn dispatch_streaming(&self, request: &OperationRequest) -> OperationResult<EventStream> {
        let result = self.start_stream(request).await;
        if let Err(e) = &result {
            self.record_failure(request, e).await;
        }
        result
    }

    async fn run(&self, request: &OperationRequest) -> OperationResult<String> {
        match request {
            OperationRequest::List => Ok(self.catalog.render_list()),
            OperationRequest::RunBuild { .. }
            | OperationRequest::RunVcs { .. }
            | OperationRequest::ListDir { .. } => {
                let (command, repo) = self.prepare(request)?;
                let output = CommandExecutor::new(repo.path()).run(&command).await?;
                if let Some(audit) = &self.audit {
                    write_audit(audit.clone(), command_record(&command, repo.path(), output.exit_code)).await;
                }
                Ok(output.render())
            }
            OperationRequest::ReadFile {
                repo,
                path,
                line_range,
            } => {
                let repo = self.catalog.get(repo.as_deref())?;
                read_file(repo, path, *line_range).await
            }
            OperationRequest::EnvInfo { repo } => {
                let repo = self.catalog.get(repo.as_deref())?;
                env_info(repo, self.env_info_script.as_deref()).await
            }
        }
    }

    async fn start_stream(&self, request: &OperationRequest) -> OperationResult<EventStream> {
        let (command, repo) = self.prepare(request)?;
        let stream = CommandExecutor::new(repo.path()).stream(&command).await?;

        let audit = self.audit.clone();
        let root = repo.root_path.clone();
        let stream = stream.inspect(move |event| {
            if let (Some(audit), OutputEvent::Complete { exit_code }) = (&audit, event) {
                tokio::spawn(write_audit(audit.clone(), command_record(&command, &root, *exit_code)));
            }
        });

        Ok(stream.boxed())
    }

    /// Validate a command operation, resolve its repository and confine any
    /// listing operands to it.
    fn prepare(&self, request: &OperationRequest) -> OperationResult<(AcceptedCommand, &Repository)> {
        let (verdict, repo) = match request {
            OperationRequest::RunBuild { repo, args } => (self.validator.validate_make(args), repo),
            OperationRequest::RunVcs { repo, args } => (self.validator.validate_git(args), repo),
            OperationRequest::ListDir { repo, args } => (self.validator.validate_ls(args), repo),
            other => return Err(OperationError::UnsupportedStreaming(other.operation_name())),
        };

        let command = verdict?;
        let repo = self.catalog.get(repo.as_deref())?;

        if matches!(request, OperationRequest::ListDir { .. }) {
            for operand in command.operands() {
                confine_relative(operand, repo.path())?;
            }
        }

        Ok((command, repo))
    }

    /// Log validation failures; other errors are left to the caller
    async fn record_failure(&self, request: &OperationRequest, error: &OperationError) {
        let Some(category) = error.rejection() else {
            return;
        };

        tracing::warn!(
            operation = request.operation_name(),
            repo = request.repo().unwrap_or("-"),
            category = %category,
            "request rejected"
        );

        if let Some(audit) = &self.audit {
            let record = AuditRecord::Rejection {
                operation: request.operation_name().to_string(),
                args: request.raw_args().to_string(),
                reason: error.to_string(),
                repo: request.repo().map(str::to_string),
            };
            write_audit(audit.clone(), record).await;
        }
    }
}

fn command_record(command: &AcceptedCommand, repo_path: &Path, exit_code: i32) -> AuditRecord {
    AuditRecord::Command {
        command: command.to_string(),
        repo_path: repo_path.to_path_buf(),
        exit_code,
    }
}

/// Audit writes never fail a request
async fn write_audit(audit: Arc<AuditLogger>, record: AuditRecord) {
    if let Err(e) = audit.record_async(record).await {
        tracing::warn!(error = %e, "failed to write audit log");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::LineRange;
    use std::fs;
    use tempfile::TempDir;

    fn create_dispatcher() -> (TempDir, Dispatcher) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("demo");
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.c"), "int main(void) { return 0; }\n").unwrap();

        let catalog = RepoCatalog::discover(temp_dir.path());
        let audit = AuditLogger::with_path(temp_dir.path().join("logs/audit.log")).unwrap();
        let dispatcher = Dispatcher::new(catalog).with_audit_logger(Some(audit));
        (temp_dir, dispatcher)
    }

    fn ls(args: &str) -> OperationRequest {
        OperationRequest::ListDir {
            repo: Some("demo".into()),
            args: args.into(),
        }
    }

    #[tokio::test]
    async fn test_list() {
        let (_temp, dispatcher) = create_dispatcher();
        let text = dispatcher.dispatch(&OperationRequest::List).await.unwrap();
        assert!(text.contains("- demo"));
    }

    #[tokio::test]
    async fn test_ls_runs_in_repo() {
        let (_temp, dispatcher) = create_dispatcher();
        let text = dispatcher.dispatch(&ls("src")).await.unwrap();
        assert!(text.contains("=== STDOUT ==="));
        assert!(text.contains("main.c"));
    }

    #[tokio::test]
    async fn test_rejection_is_audited() {
        let (temp, dispatcher) = create_dispatcher();
        let err = dispatcher.dispatch(&ls("-la; rm -rf /")).await.unwrap_err();
        assert!(err.to_string().contains("dangerous patterns"));

        let log = fs::read_to_string(temp.path().join("logs/audit.log")).unwrap();
        assert!(log.contains("VALIDATION-REJECTED"));
        assert!(log.contains("-la; rm -rf /"));
    }

    #[tokio::test]
    async fn test_execution_is_audited() {
        let (temp, dispatcher) = create_dispatcher();
        dispatcher.dispatch(&ls("-la")).await.unwrap();

        let log = fs::read_to_string(temp.path().join("logs/audit.log")).unwrap();
        assert!(log.contains("ls -la"));
        assert!(log.contains("exit:0"));
    }

    #[tokio::test]
    async fn test_repo_required() {
        let (_temp, dispatcher) = create_dispatcher();
        let request = OperationRequest::RunVcs {
            repo: None,
            args: "status".into(),
        };
        let err = dispatcher.dispatch(&request).await.unwrap_err();
        assert!(matches!(err, OperationError::MissingRepository));
    }

    #[tokio::test]
    async fn test_validation_precedes_repo_lookup() {
        let (_temp, dispatcher) = create_dispatcher();
        let request = OperationRequest::RunVcs {
            repo: Some("nope".into()),
            args: "push origin main".into(),
        };
        let err = dispatcher.dispatch(&request).await.unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ls_symlink_escape_rejected() {
        let (temp, dispatcher) = create_dispatcher();
        let outside = temp.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, temp.path().join("demo/escape")).unwrap();

        let err = dispatcher.dispatch(&ls("escape")).await.unwrap_err();
        assert!(err.to_string().contains("outside repository"));
    }

    #[tokio::test]
    async fn test_read_file_through_dispatcher() {
        let (_temp, dispatcher) = create_dispatcher();
        let request = OperationRequest::ReadFile {
            repo: Some("demo".into()),
            path: "src/main.c".into(),
            line_range: LineRange::default(),
        };
        let text = dispatcher.dispatch(&request).await.unwrap();
        assert!(text.contains("Total lines: 1"));
    }

    #[tokio::test]
    async fn test_streaming_unsupported_for_read_file() {
        let (_temp, dispatcher) = create_dispatcher();
        let request = OperationRequest::ReadFile {
            repo: Some("demo".into()),
            path: "src/main.c".into(),
            line_range: LineRange::default(),
        };
        let result = dispatcher.dispatch_streaming(&request).await;
        assert!(matches!(result, Err(OperationError::UnsupportedStreaming("read_file"))));
    }

    #[tokio::test]
    async fn test_streaming_ls() {
        let (_temp, dispatcher) = create_dispatcher();
        let events: Vec<OutputEvent> = dispatcher
            .dispatch_streaming(&ls("src"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events[0], OutputEvent::Stdout { line: "main.c".into() });
        assert_eq!(events.last(), Some(&OutputEvent::Complete { exit_code: 0 }));
    }
}
