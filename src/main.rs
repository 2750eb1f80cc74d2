use clap::Parser;
use mcp_build::audit::AuditLogger;
use mcp_build::config::{
    CredentialOptions, CredentialSource, ServerConfig, Transport, resolve_session_key,
};
use mcp_build::security::{SessionCredential, SessionGate};
use mcp_build::transport::{AppState, http, stdio};
use mcp_build::{AppResult, Dispatcher, RepoCatalog};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Build, version control and file access for repositories, served over MCP
#[derive(Debug, Parser)]
#[command(name = "mcp-build", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Transport to serve on (stdio or http)
    #[arg(long)]
    transport: Option<Transport>,

    /// HTTP listen host
    #[arg(long)]
    host: Option<String>,

    /// HTTP listen port
    #[arg(long)]
    port: Option<u16>,

    /// Session key for HTTP clients
    #[arg(long, env = "MCP_BUILD_SESSION_KEY", hide_env_values = true)]
    session_key: Option<String>,

    /// Generate a session key even on stdio
    #[arg(long)]
    generate_key: bool,

    /// File the session key is loaded from or persisted to
    #[arg(long, value_name = "FILE")]
    key_file: Option<PathBuf>,

    /// Directory whose subdirectories are served as repositories
    #[arg(long, value_name = "DIR")]
    repos_dir: Option<PathBuf>,

    /// Script run by the env tool instead of the built-in report
    #[arg(long, value_name = "FILE")]
    env_script: Option<PathBuf>,

    /// Append-only audit log of executed and rejected commands
    #[arg(long, value_name = "FILE")]
    audit_log: Option<PathBuf>,

    /// Log filter (overrides RUST_LOG), e.g. "debug" or "mcp_build=trace"
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "server exited with an error");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Logs go to stderr; stdout belongs to the stdio transport
fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> AppResult<()> {
    let config = load_config(&cli)?;

    let credential_options = CredentialOptions {
        explicit_key: cli.session_key.clone(),
        key_file: cli.key_file.clone(),
        generate: cli.generate_key,
    };
    let network = config.transport == Transport::Http;
    let credential = match resolve_session_key(&credential_options, network)? {
        Some((credential, source)) => {
            if source == CredentialSource::Generated {
                print_key_banner(&credential);
            }
            tracing::info!(fingerprint = %credential.fingerprint(), source = ?source, "session key active");
            Some(credential)
        }
        None => None,
    };

    let catalog = RepoCatalog::discover(&config.repos_dir);
    if catalog.is_empty() {
        tracing::warn!(repos_dir = %catalog.base_dir().display(), "no repositories found");
    }
    let audit = match &config.audit_log {
        Some(path) => Some(AuditLogger::with_path(path)?),
        None => None,
    };
    let dispatcher = Dispatcher::new(catalog)
        .with_env_info_script(config.env_info_script.clone())
        .with_audit_logger(audit);

    match config.transport {
        Transport::Stdio => stdio::serve(&dispatcher).await?,
        Transport::Http => {
            let state = Arc::new(AppState::new(dispatcher, SessionGate::new(credential)));
            http::serve(state, &config.http).await?;
        }
    }

    Ok(())
}

/// Defaults, then the config file, then command line flags
fn load_config(cli: &Cli) -> AppResult<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    if let Some(transport) = cli.transport {
        config.transport = transport;
    }
    if let Some(host) = &cli.host {
        config.http.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.http.port = port;
    }
    if let Some(repos_dir) = &cli.repos_dir {
        config.repos_dir = repos_dir.clone();
    }
    if let Some(script) = &cli.env_script {
        config.env_info_script = Some(script.clone());
    }
    if let Some(audit_log) = &cli.audit_log {
        config.audit_log = Some(audit_log.clone());
    }

    config.validate()?;
    Ok(config)
}

/// The only place a generated key is ever shown
fn print_key_banner(credential: &SessionCredential) {
    eprintln!("============================================================");
    eprintln!("Session key: {}", credential.expose());
    eprintln!("Send it as 'Authorization: Bearer <key>' or '?key=<key>'");
    eprintln!("============================================================");
}
