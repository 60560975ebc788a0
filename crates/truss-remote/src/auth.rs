//! Credential handling for Baseten deployments.
//!
//! An [`AuthService`] owns the API key captured when a service client is
//! built. Each call to [`AuthService::authenticate()`] produces an
//! [`AuthToken`], which knows how to render itself as HTTP headers.

use crate::error::TrussError;
use std::collections::HashMap;

/// Environment variable consulted by [`AuthService::from_env`].
pub const API_KEY_ENV: &str = "BASETEN_API_KEY";

/// Kind of credential carried by an [`AuthToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    /// Workspace API key, sent as `Authorization: Api-Key <key>`.
    ApiKey,
}

/// A credential ready to be attached to outbound requests.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    auth_type: AuthType,
    value: String,
}

impl AuthToken {
    pub fn new(auth_type: AuthType, value: impl Into<String>) -> Self {
        Self {
            auth_type,
            value: value.into(),
        }
    }

    pub fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    /// Header name/value pairs carrying this credential.
    pub fn header(&self) -> HashMap<String, String> {
        let value = match self.auth_type {
            AuthType::ApiKey => format!("Api-Key {}", self.value),
        };
        HashMap::from([("Authorization".to_string(), value)])
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Don't leak the actual key in debug output
        f.debug_struct("AuthToken")
            .field("auth_type", &self.auth_type)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Derives request credentials from a fixed API key.
#[derive(Clone)]
pub struct AuthService {
    api_key: String,
}

impl AuthService {
    /// Create a new service from an API key. An empty key is rejected.
    pub fn new(api_key: impl Into<String>) -> Result<Self, TrussError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(TrussError::AuthError("Missing Baseten API key".to_string()));
        }
        Ok(Self { api_key })
    }

    /// Build from the `BASETEN_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, TrussError> {
        let key = std::env::var(API_KEY_ENV)
            .map_err(|_| TrussError::AuthError(format!("{API_KEY_ENV} is not set")))?;
        Self::new(key)
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn authenticate(&self) -> AuthToken {
        AuthToken::new(AuthType::ApiKey, self.api_key.clone())
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Serializes tests that mutate `BASETEN_API_KEY`.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
