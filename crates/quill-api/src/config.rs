use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub jwt_secret: String,
    /// Required `iss` claim, when set
    pub jwt_issuer: Option<String>,
    pub auth_clock_skew: Duration,
    /// Lifetime of tokens issued by `mint-token`
    pub token_ttl: Duration,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("token_ttl", &self.token_ttl)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "QUILL_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = PathBuf::from(value_or_default(
            &lookup,
            "QUILL_API_DATABASE_PATH",
            "quill-authority.db",
        ));

        let jwt_secret = required_trimmed(&lookup, "QUILL_JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid(
                "QUILL_JWT_SECRET must be at least 32 bytes".to_string(),
            ));
        }
        let jwt_issuer = optional_trimmed(&lookup, "QUILL_JWT_ISSUER");

        let auth_clock_skew_secs = value_or_default(&lookup, "QUILL_AUTH_CLOCK_SKEW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "QUILL_AUTH_CLOCK_SKEW_SECS must be an integer in [0, 300]".to_string(),
                )
            })?;
        if auth_clock_skew_secs > 300 {
            return Err(ConfigError::Invalid(
                "QUILL_AUTH_CLOCK_SKEW_SECS must be in [0, 300]".to_string(),
            ));
        }

        let token_ttl_secs = value_or_default(&lookup, "QUILL_TOKEN_TTL_SECS", "86400")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "QUILL_TOKEN_TTL_SECS must be an integer in [60, 2592000]".to_string(),
                )
            })?;
        if !(60..=2_592_000).contains(&token_ttl_secs) {
            return Err(ConfigError::Invalid(
                "QUILL_TOKEN_TTL_SECS must be in [60, 2592000]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            jwt_issuer,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            token_ttl: Duration::from_secs(token_ttl_secs),
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn config_from(map: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_jwt_secret() {
        let err = config_from(&HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("QUILL_JWT_SECRET"));
    }

    #[test]
    fn config_rejects_short_secret() {
        let map = HashMap::from([("QUILL_JWT_SECRET", "too-short")]);
        assert!(matches!(config_from(&map), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn config_applies_defaults() {
        let map = HashMap::from([("QUILL_JWT_SECRET", SECRET)]);
        let config = config_from(&map).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.database_path, PathBuf::from("quill-authority.db"));
        assert_eq!(config.jwt_issuer, None);
        assert_eq!(config.auth_clock_skew, Duration::from_secs(60));
    }

    #[test]
    fn config_validates_ranges() {
        let map = HashMap::from([
            ("QUILL_JWT_SECRET", SECRET),
            ("QUILL_AUTH_CLOCK_SKEW_SECS", "900"),
        ]);
        assert!(config_from(&map).is_err());

        let map = HashMap::from([("QUILL_JWT_SECRET", SECRET), ("QUILL_TOKEN_TTL_SECS", "5")]);
        assert!(config_from(&map).is_err());
    }

    #[test]
    fn config_redacts_secret_in_debug() {
        let map = HashMap::from([("QUILL_JWT_SECRET", SECRET)]);
        let debug_output = format!("{:?}", config_from(&map).unwrap());
        assert!(!debug_output.contains(SECRET));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
