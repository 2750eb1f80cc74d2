mod helpers;

use futures::StreamExt;
use helpers::{create_dispatcher, create_repos_dir, git_available, make_available};
use mcp_build::audit::AuditLogger;
use mcp_build::exec::OutputEvent;
use mcp_build::{Dispatcher, OperationError, OperationRequest, RepoCatalog};
use std::fs;

fn make(args: &str) -> OperationRequest {
    OperationRequest::RunBuild {
        repo: Some("demo".into()),
        args: args.into(),
    }
}

fn git(args: &str) -> OperationRequest {
    OperationRequest::RunVcs {
        repo: Some("demo".into()),
        args: args.into(),
    }
}

fn ls(args: &str) -> OperationRequest {
    OperationRequest::ListDir {
        repo: Some("demo".into()),
        args: args.into(),
    }
}

#[tokio::test]
async fn test_list_repositories() {
    let (temp_dir, repo_path) = create_repos_dir();
    let dispatcher = create_dispatcher(temp_dir.path());

    let text = dispatcher.dispatch(&OperationRequest::List).await.unwrap();
    assert!(text.starts_with("Available repositories:\n\n"));
    assert!(text.contains("- demo\n"));
    assert!(text.contains(&format!("Path: {}", fs::canonicalize(&repo_path).unwrap().display())));
}

#[tokio::test]
async fn test_git_status_and_log() {
    if !git_available() {
        return;
    }
    let (temp_dir, _repo_path) = create_repos_dir();
    let dispatcher = create_dispatcher(temp_dir.path());

    let text = dispatcher.dispatch(&git("status")).await.unwrap();
    assert!(text.contains("=== STDOUT ==="));
    assert!(!text.contains("EXIT CODE"));

    let text = dispatcher.dispatch(&git("log --oneline")).await.unwrap();
    assert!(text.contains("Initial commit"));
}

#[tokio::test]
async fn test_make_default_target_and_failure() {
    if !make_available() {
        return;
    }
    let (temp_dir, _repo_path) = create_repos_dir();
    let dispatcher = create_dispatcher(temp_dir.path());

    let text = dispatcher.dispatch(&make("")).await.unwrap();
    assert!(text.contains("building"));

    // A failing build is still a successful operation
    let text = dispatcher.dispatch(&make("fail")).await.unwrap();
    assert!(text.contains("=== STDERR ===\nbroken"));
    assert!(text.contains("=== EXIT CODE: "));
}

#[tokio::test]
async fn test_ls_lists_repository_root() {
    let (temp_dir, _repo_path) = create_repos_dir();
    let dispatcher = create_dispatcher(temp_dir.path());

    let text = dispatcher.dispatch(&ls("-a")).await.unwrap();
    assert!(text.contains("Makefile"));
    assert!(text.contains("README.md"));
    assert!(text.contains(".git"));

    let text = dispatcher.dispatch(&ls("src")).await.unwrap();
    assert!(text.contains("lines.txt"));
}

#[tokio::test]
async fn test_executed_commands_are_audited() {
    let (temp_dir, _repo_path) = create_repos_dir();
    let log_path = temp_dir.path().join("audit.log");
    let dispatcher = Dispatcher::new(RepoCatalog::discover(temp_dir.path()))
        .with_audit_logger(Some(AuditLogger::with_path(&log_path).unwrap()));

    dispatcher.dispatch(&ls("src")).await.unwrap();

    let log = fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("[exit:0] ls src"));
}

#[tokio::test]
async fn test_streaming_ls_ends_with_complete() {
    let (temp_dir, _repo_path) = create_repos_dir();
    let dispatcher = create_dispatcher(temp_dir.path());

    let events: Vec<OutputEvent> = dispatcher
        .dispatch_streaming(&ls("src"))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(
        events.first(),
        Some(&OutputEvent::Stdout {
            line: "lines.txt".into()
        })
    );
    assert_eq!(events.last(), Some(&OutputEvent::Complete { exit_code: 0 }));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_streaming_make_preserves_order() {
    if !make_available() {
        return;
    }
    let (temp_dir, repo_path) = create_repos_dir();
    let recipe: String = (1..=50).map(|i| format!("\t@echo step {}\n", i)).collect();
    fs::write(repo_path.join("Makefile"), format!("steps:\n{}", recipe)).unwrap();
    let dispatcher = create_dispatcher(temp_dir.path());

    let events: Vec<OutputEvent> = dispatcher
        .dispatch_streaming(&make("steps"))
        .await
        .unwrap()
        .collect()
        .await;

    let lines: Vec<String> = events
        .iter()
        .filter_map(|event| match event {
            OutputEvent::Stdout { line } => Some(line.clone()),
            _ => None,
        })
        .collect();
    let expected: Vec<String> = (1..=50).map(|i| format!("step {}", i)).collect();
    assert_eq!(lines, expected);
    assert_eq!(events.last(), Some(&OutputEvent::Complete { exit_code: 0 }));
}

#[tokio::test]
async fn test_streaming_failure_reports_exit_code() {
    if !make_available() {
        return;
    }
    let (temp_dir, _repo_path) = create_repos_dir();
    let dispatcher = create_dispatcher(temp_dir.path());

    let events: Vec<OutputEvent> = dispatcher
        .dispatch_streaming(&make("fail"))
        .await
        .unwrap()
        .collect()
        .await;

    assert!(events.contains(&OutputEvent::Stderr {
        line: "broken".into()
    }));
    match events.last() {
        Some(OutputEvent::Complete { exit_code }) => assert_ne!(*exit_code, 0),
        other => panic!("unexpected terminal event: {:?}", other),
    }
}

#[tokio::test]
async fn test_streaming_rejections_happen_before_the_stream() {
    let (temp_dir, _repo_path) = create_repos_dir();
    let dispatcher = create_dispatcher(temp_dir.path());

    let result = dispatcher.dispatch_streaming(&git("push")).await;
    assert!(matches!(result, Err(OperationError::Validation(_))));

    let request = OperationRequest::ReadFile {
        repo: Some("demo".into()),
        path: "README.md".into(),
        line_range: Default::default(),
    };
    let result = dispatcher.dispatch_streaming(&request).await;
    assert!(matches!(result, Err(OperationError::UnsupportedStreaming("read_file"))));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_dropping_stream_stops_command() {
    if !make_available() {
        return;
    }
    let (temp_dir, repo_path) = create_repos_dir();
    // The recipe shell's parent is the make process the dispatcher spawned
    fs::write(repo_path.join("Makefile"), "hang:\n\t@echo $$PPID\n\t@sleep 3\n").unwrap();
    let dispatcher = create_dispatcher(temp_dir.path());

    let mut stream = dispatcher.dispatch_streaming(&make("hang")).await.unwrap();
    let pid = match stream.next().await {
        Some(OutputEvent::Stdout { line }) => line,
        other => panic!("expected the make pid, got {:?}", other),
    };
    let proc_dir = std::path::PathBuf::from(format!("/proc/{}", pid));
    assert!(proc_dir.exists());

    drop(stream);

    let mut exited = false;
    for _ in 0..100 {
        if !proc_dir.exists() {
            exited = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert!(exited, "make (pid {}) still running after the stream was dropped", pid);
}

#[tokio::test]
async fn test_env_info_builtin_report() {
    let (temp_dir, _repo_path) = create_repos_dir();
    let dispatcher = create_dispatcher(temp_dir.path());

    let request = OperationRequest::EnvInfo {
        repo: Some("demo".into()),
    };
    let text = dispatcher.dispatch(&request).await.unwrap();
    assert!(text.contains("=== ENVIRONMENT ==="));
    assert!(text.contains("=== TOOL VERSIONS ==="));
    assert!(text.contains("make: "));
}

#[cfg(unix)]
#[tokio::test]
async fn test_env_info_script() {
    use std::os::unix::fs::PermissionsExt;

    let (temp_dir, _repo_path) = create_repos_dir();
    let script = temp_dir.path().join("env.sh");
    fs::write(&script, "#!/bin/sh\necho custom report\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let dispatcher = create_dispatcher(temp_dir.path()).with_env_info_script(Some(script));
    let request = OperationRequest::EnvInfo {
        repo: Some("demo".into()),
    };
    let text = dispatcher.dispatch(&request).await.unwrap();
    assert!(text.contains("custom report"));
    assert!(!text.contains("=== TOOL VERSIONS ==="));
}
