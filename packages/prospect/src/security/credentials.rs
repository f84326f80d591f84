//! Provider credential handling with secure memory.
//!
//! External providers (LLM, embedding, search) authenticate with API keys
//! the embedding application hands in opaquely. Keys live in
//! `secrecy`-backed storage so they never reach logs, debug output, or
//! error messages; the raw value is only readable at the point an auth
//! header is built.

use std::fmt;

use secrecy::{ExposeSecret, SecretBox};

/// An API key for an external provider.
pub struct ApiKey(SecretBox<str>);

impl ApiKey {
    /// Wrap a key value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretBox::new(Box::from(value.into().as_str())))
    }

    /// Read a key from an environment variable. Missing or blank values
    /// count as absent.
    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(Self::new)
    }

    /// Expose the key value.
    ///
    /// Only call this where the key is actually sent (building the
    /// Authorization header of an outbound request).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

// SecretBox<str> is not Clone; rewrap the exposed value.
impl Clone for ApiKey {
    fn clone(&self) -> Self {
        Self::new(self.expose().to_string())
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Credentials for a chat/embedding model provider.
#[derive(Clone)]
pub struct ProviderCredentials {
    /// API key (secret)
    pub api_key: ApiKey,

    /// API base URL (optional override for proxies and compatible APIs)
    pub base_url: Option<String>,
}

impl ProviderCredentials {
    pub fn new(api_key: impl Into<ApiKey>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_never_prints() {
        let key = ApiKey::new("sk-very-secret");
        assert_eq!(format!("{}", key), "[REDACTED]");
        assert_eq!(format!("{:?}", key), "[REDACTED]");
        assert_eq!(key.expose(), "sk-very-secret");
        assert_eq!(key.clone().expose(), "sk-very-secret");
    }

    #[test]
    fn from_env_treats_blank_as_absent() {
        std::env::set_var("PROSPECT_TEST_API_KEY", "sk-from-env");
        let key = ApiKey::from_env("PROSPECT_TEST_API_KEY").unwrap();
        assert_eq!(key.expose(), "sk-from-env");

        std::env::set_var("PROSPECT_TEST_API_KEY_BLANK", "   ");
        assert!(ApiKey::from_env("PROSPECT_TEST_API_KEY_BLANK").is_none());
        assert!(ApiKey::from_env("PROSPECT_TEST_API_KEY_UNSET").is_none());
    }

    #[test]
    fn credentials_debug_redacts() {
        let creds = ProviderCredentials::new("sk-test").with_base_url("https://proxy.local");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-test"));
    }
}
