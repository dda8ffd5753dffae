//! Authentication configuration from the environment.

use std::fmt;
use std::time::Duration;

use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use thiserror::Error;
use tracing::warn;

use crate::auth::AuthError;
use crate::auth::jwt::{DEFAULT_ACCESS_TTL_SECS, DEFAULT_REFRESH_TTL_SECS, TokenSettings};
use crate::auth::password::{DEFAULT_MAX_RETRIES, MAX_RETRIES_LIMIT};
use crate::auth::policy::{PasswordPolicy, SecurityLevel};
use crate::auth::throttle::{DEFAULT_LOCKOUT, DEFAULT_MAX_ATTEMPTS};

/// Shortest accepted HMAC signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Longest accepted access token lifetime.
pub const MAX_ACCESS_TTL_SECS: i64 = 24 * 60 * 60;

/// Default per-call timeout for directory operations.
pub const DEFAULT_DIRECTORY_TIMEOUT: Duration = Duration::from_millis(2000);

/// Configuration errors. All are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JWT_SECRET is not set (set WARDEN_DEV_MODE=1 to generate an ephemeral one)")]
    MissingSecret,

    #[error("JWT_SECRET must be at least {MIN_SECRET_LEN} bytes, got {0}")]
    SecretTooShort(usize),

    #[error("Invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl From<ConfigError> for AuthError {
    fn from(e: ConfigError) -> Self {
        AuthError::Config(e.to_string())
    }
}

/// Everything the core needs at construction time.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: Vec<u8>,
    pub tokens: TokenSettings,
    /// Preset rules, with `BCRYPT_COST` applied when set.
    pub policy: PasswordPolicy,
    pub hash_max_retries: u32,
    pub directory_timeout: Duration,
    pub login_max_attempts: u32,
    pub login_lockout: Duration,
    /// True when the secret was generated for this process only.
    pub ephemeral_secret: bool,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("tokens", &self.tokens)
            .field("policy", &self.policy)
            .field("hash_max_retries", &self.hash_max_retries)
            .field("directory_timeout", &self.directory_timeout)
            .field("login_max_attempts", &self.login_max_attempts)
            .field("login_lockout", &self.login_lockout)
            .field("ephemeral_secret", &self.ephemeral_secret)
            .finish()
    }
}

impl AuthConfig {
    /// Defaults around a caller-supplied secret. No validation.
    pub fn new(jwt_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            tokens: TokenSettings::default(),
            policy: PasswordPolicy::default(),
            hash_max_retries: DEFAULT_MAX_RETRIES,
            directory_timeout: DEFAULT_DIRECTORY_TIMEOUT,
            login_max_attempts: DEFAULT_MAX_ATTEMPTS,
            login_lockout: DEFAULT_LOCKOUT,
            ephemeral_secret: false,
        }
    }

    /// Reads configuration from environment variables.
    ///
    /// | Variable                 | Default                  |
    /// |--------------------------|--------------------------|
    /// | `JWT_SECRET`             | required                 |
    /// | `WARDEN_DEV_MODE`        | unset                    |
    /// | `JWT_ISSUER`             | `warden`                 |
    /// | `JWT_AUDIENCE`           | `warden-api`             |
    /// | `ACCESS_TOKEN_TTL_SECS`  | `900`                    |
    /// | `REFRESH_TOKEN_TTL_SECS` | `604800`                 |
    /// | `PASSWORD_POLICY`        | `medium`                 |
    /// | `BCRYPT_COST`            | preset cost              |
    /// | `HASH_MAX_RETRIES`       | `3` (at most `10`)       |
    /// | `DIRECTORY_TIMEOUT_MS`   | `2000`                   |
    /// | `LOGIN_MAX_ATTEMPTS`     | `5`                      |
    /// | `LOGIN_LOCKOUT_SECS`     | `900`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary lookup.
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let dev_mode = get("WARDEN_DEV_MODE").is_some_and(|v| matches!(v.trim(), "1" | "true"));
        let (jwt_secret, ephemeral_secret) = match get("JWT_SECRET") {
            Some(secret) if secret.len() < MIN_SECRET_LEN => {
                return Err(ConfigError::SecretTooShort(secret.len()));
            }
            Some(secret) => (secret.into_bytes(), false),
            None if dev_mode => {
                warn!(
                    "JWT_SECRET unset; generated an ephemeral secret, \
                     tokens will not survive a restart"
                );
                (generate_secret().into_bytes(), true)
            }
            None => return Err(ConfigError::MissingSecret),
        };

        let access_ttl_secs = parse(&get, "ACCESS_TOKEN_TTL_SECS", DEFAULT_ACCESS_TTL_SECS)?;
        if !(1..=MAX_ACCESS_TTL_SECS).contains(&access_ttl_secs) {
            return Err(invalid(
                "ACCESS_TOKEN_TTL_SECS",
                access_ttl_secs,
                format!("must be within 1..={MAX_ACCESS_TTL_SECS}"),
            ));
        }
        let refresh_ttl_secs = parse(&get, "REFRESH_TOKEN_TTL_SECS", DEFAULT_REFRESH_TTL_SECS)?;
        if refresh_ttl_secs <= access_ttl_secs {
            return Err(invalid(
                "REFRESH_TOKEN_TTL_SECS",
                refresh_ttl_secs,
                "must exceed ACCESS_TOKEN_TTL_SECS".to_string(),
            ));
        }

        let level = match get("PASSWORD_POLICY") {
            Some(v) => v
                .parse::<SecurityLevel>()
                .map_err(|reason| invalid("PASSWORD_POLICY", v, reason))?,
            None => SecurityLevel::Medium,
        };
        let mut policy = PasswordPolicy::preset(level);
        if let Some(raw) = get("BCRYPT_COST") {
            let cost: u32 = raw
                .trim()
                .parse()
                .map_err(|_| invalid("BCRYPT_COST", &raw, "not a number".to_string()))?;
            if !(4..=31).contains(&cost) {
                return Err(invalid("BCRYPT_COST", cost, "must be within 4..=31".to_string()));
            }
            policy = policy.with_cost(cost);
        }

        let directory_timeout_ms: u64 = parse(
            &get,
            "DIRECTORY_TIMEOUT_MS",
            DEFAULT_DIRECTORY_TIMEOUT.as_millis() as u64,
        )?;
        if directory_timeout_ms == 0 {
            return Err(invalid("DIRECTORY_TIMEOUT_MS", 0, "must be positive".to_string()));
        }
        let hash_max_retries: u32 = parse(&get, "HASH_MAX_RETRIES", DEFAULT_MAX_RETRIES)?;
        if hash_max_retries > MAX_RETRIES_LIMIT {
            return Err(invalid(
                "HASH_MAX_RETRIES",
                hash_max_retries,
                format!("must be within 0..={MAX_RETRIES_LIMIT}"),
            ));
        }
        let login_max_attempts: u32 = parse(&get, "LOGIN_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if login_max_attempts == 0 {
            return Err(invalid("LOGIN_MAX_ATTEMPTS", 0, "must be positive".to_string()));
        }

        Ok(Self {
            jwt_secret,
            tokens: TokenSettings {
                issuer: get("JWT_ISSUER").unwrap_or_else(|| "warden".into()),
                audience: get("JWT_AUDIENCE").unwrap_or_else(|| "warden-api".into()),
                access_ttl_secs,
                refresh_ttl_secs,
            },
            policy,
            hash_max_retries,
            directory_timeout: Duration::from_millis(directory_timeout_ms),
            login_max_attempts,
            login_lockout: Duration::from_secs(parse(
                &get,
                "LOGIN_LOCKOUT_SECS",
                DEFAULT_LOCKOUT.as_secs(),
            )?),
            ephemeral_secret,
        })
    }
}

fn parse<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| invalid(var, &raw, "not a valid number".to_string())),
        None => Ok(default),
    }
}

fn invalid(var: &'static str, value: impl ToString, reason: String) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason,
    }
}

fn generate_secret() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}
