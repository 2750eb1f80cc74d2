pub mod credentials;
pub mod settings;

pub use credentials::{CredentialOptions, CredentialSource, resolve_session_key};
pub use settings::{ConfigError, HttpConfig, ServerConfig, Transport};
