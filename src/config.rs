//! Engine and coordinator configuration
//!
//! Defaults are read from the environment, falling back to constants.

use std::time::Duration;

/// Default per-request timeout when neither the caller nor the environment sets one
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default lifetime of a cached secure session
pub const DEFAULT_SESSION_TTL_SECS: u64 = 600;

pub const DEFAULT_SECURITY_KEY_PATH: &str = "/ISAPI/Security/GetSecurityKey?format=json";

pub const DEFAULT_CACHE_KEY_PREFIX: &str = "hikvision:session:";

/// Request engine configuration
#[derive(Debug, Clone)]
pub struct IsapiConfig {
    /// Timeout applied to each HTTP attempt unless the call overrides it
    pub default_timeout: Duration,
    /// Devices ship self-signed certificates; accept them for HTTPS targets
    pub accept_invalid_certs: bool,
    pub user_agent: String,
}

impl Default for IsapiConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(
                env_parse("ISAPI_REQUEST_TIMEOUT_MS").unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            ),
            accept_invalid_certs: env_parse("ISAPI_ACCEPT_INVALID_CERTS").unwrap_or(true),
            user_agent: std::env::var("ISAPI_USER_AGENT")
                .unwrap_or_else(|_| format!("hikvision-isapi/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

/// Session coordinator configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long an acquired session is served from cache
    pub ttl: Duration,
    /// Endpoint returning `{ "security": .., "identityKey": .. }`
    pub security_key_path: String,
    /// Prefix of the cache key; the device id is appended
    pub cache_key_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(
                env_parse("ISAPI_SESSION_TTL_SECS").unwrap_or(DEFAULT_SESSION_TTL_SECS),
            ),
            security_key_path: std::env::var("ISAPI_SECURITY_KEY_PATH")
                .unwrap_or_else(|_| DEFAULT_SECURITY_KEY_PATH.to_string()),
            cache_key_prefix: std::env::var("ISAPI_SESSION_CACHE_PREFIX")
                .unwrap_or_else(|_| DEFAULT_CACHE_KEY_PREFIX.to_string()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key = %key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_defaults_are_sane() {
        let config = SessionConfig::default();
        assert!(config.ttl > Duration::ZERO);
        assert!(config.security_key_path.starts_with('/'));
        assert!(!config.cache_key_prefix.is_empty());
    }

    #[test]
    fn env_parse_ignores_garbage() {
        assert_eq!(env_parse::<u64>("ISAPI_TEST_UNSET_VARIABLE_FOR_PARSE"), None);
    }
}
