use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::settings::ConfigError;
use crate::security::SessionCredential;

/// Where the session credential comes from at startup
#[derive(Debug, Clone, Default)]
pub struct CredentialOptions {
    /// Key given on the command line or in the environment
    pub explicit_key: Option<String>,
    /// File the key is persisted in
    pub key_file: Option<PathBuf>,
    /// Generate a key even when no other option asks for one
    pub generate: bool,
}

/// How the credential was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Explicit,
    KeyFile,
    /// Freshly generated and written to the key file
    GeneratedToFile,
    /// Freshly generated and only held in memory
    Generated,
}

/// Resolve the credential for this run.
///
/// Returns `None` when no credential is required.
pub fn resolve_session_key(
    options: &CredentialOptions,
    network_transport: bool,
) -> Result<Option<(SessionCredential, CredentialSource)>, ConfigError> {
    if let Some(key) = options.explicit_key.as_deref().filter(|k| !k.is_empty()) {
        let credential = SessionCredential::new(key);
        if let Some(path) = &options.key_file {
            let existing = read_key_file(path)?;
            if existing.as_deref() != Some(key) {
                write_key_file(path, &credential)?;
                tracing::info!(path = %path.display(), "session key written to key file");
            }
        }
        return Ok(Some((credential, CredentialSource::Explicit)));
    }

    if let Some(path) = &options.key_file {
        if let Some(existing) = read_key_file(path)? {
            tracing::info!(path = %path.display(), "loaded session key from key file");
            return Ok(Some((SessionCredential::new(existing), CredentialSource::KeyFile)));
        }

        let credential = SessionCredential::generate();
        write_key_file(path, &credential)?;
        tracing::info!(path = %path.display(), "generated new session key");
        return Ok(Some((credential, CredentialSource::GeneratedToFile)));
    }

    if network_transport || options.generate {
        return Ok(Some((SessionCredential::generate(), CredentialSource::Generated)));
    }

    Ok(None)
}

/// Trimmed key file content, or `None` if the file is missing or blank
fn read_key_file(path: &Path) -> Result<Option<String>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let key = contents.trim();
            Ok((!key.is_empty()).then(|| key.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::KeyFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_key_file(path: &Path, credential: &SessionCredential) -> Result<(), ConfigError> {
    let key_file_error = |source| ConfigError::KeyFile {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).map_err(key_file_error)?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    // Owner read/write only from the moment the file exists
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(key_file_error)?;

    // An existing file keeps its old mode on open; tighten it before writing
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(key_file_error)?;
    }

    file.write_all(credential.expose().as_bytes())
        .map_err(key_file_error)?;

    Ok(())
}
