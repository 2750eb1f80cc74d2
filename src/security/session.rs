use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use std::fmt;
use subtle::ConstantTimeEq;

/// Random bytes in a generated session key (before base64 encoding)
const GENERATED_KEY_BYTES: usize = 32;

/// Characters of the key shown in logs
const FINGERPRINT_CHARS: usize = 4;

/// The single shared secret that gates network access.
///
/// Never printed by `Debug`; logs only ever see [`SessionCredential::fingerprint`].
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential(String);

impl SessionCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Generate a URL-safe random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; GENERATED_KEY_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// The raw secret, for persisting to a key file or showing once at startup
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn fingerprint(&self) -> String {
        let prefix: String = self.0.chars().take(FINGERPRINT_CHARS).collect();
        format!("{}…", prefix)
    }

    /// Timing-safe comparison against a presented token
    pub fn matches(&self, candidate: &str) -> bool {
        bool::from(self.0.as_bytes().ct_eq(candidate.as_bytes()))
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionCredential({})", self.fingerprint())
    }
}

/// Why a request was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Neither a bearer token nor a `key` parameter was presented
    MissingToken,
    /// A token was presented but did not match
    InvalidToken,
}

/// Decides whether a network caller may reach the dispatcher
#[derive(Debug, Clone, Default)]
pub struct SessionGate {
    credential: Option<SessionCredential>,
}

impl SessionGate {
    pub fn new(credential: Option<SessionCredential>) -> Self {
        Self { credential }
    }

    pub fn is_enabled(&self) -> bool {
        self.credential.is_some()
    }

    /// `authorization` is the raw `Authorization` header value, `query_key`
    /// the `key` query parameter.
    pub fn authorize(&self, authorization: Option<&str>, query_key: Option<&str>) -> bool {
        self.check(authorization, query_key).is_ok()
    }

    pub fn check(&self, authorization: Option<&str>, query_key: Option<&str>) -> Result<(), AuthFailure> {
        let Some(credential) = &self.credential else {
            return Ok(());
        };

        let bearer = authorization.and_then(|value| value.strip_prefix("Bearer "));
        if let Some(token) = bearer
            && credential.matches(token)
        {
            return Ok(());
        }

        let query_key = query_key.filter(|key| !key.is_empty());
        if let Some(key) = query_key
            && credential.matches(key)
        {
            return Ok(());
        }

        if bearer.is_none() && query_key.is_none() {
            Err(AuthFailure::MissingToken)
        } else {
            Err(AuthFailure::InvalidToken)
        }
    }
}
