//! Service configuration loaded from the environment
//!
//! Listener, CORS, and IMAP deadline settings. Most keys follow the pattern
//! `MAIL_LATEST_<KEY>`; `PORT` and `CORS_ORIGIN` keep their conventional
//! names so the service drops into common hosting setups unchanged.

use std::env;
use std::env::VarError;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::errors::{AppError, AppResult};

/// Origins always accepted by the CORS layer
const BUILTIN_ORIGINS: [&str; 2] = ["http://localhost:8080", "http://localhost:3000"];

/// Server-wide configuration
///
/// Shared read-only with request handlers via `Arc`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub bind_addr: IpAddr,
    /// Listen port
    pub port: u16,
    /// Origins allowed by CORS (built-ins plus `CORS_ORIGIN`)
    pub allowed_origins: Vec<String>,
    /// Allow any origin without credentials
    pub cors_allow_any: bool,
    /// End-to-end budget for TestConnection in milliseconds
    pub test_deadline_ms: u64,
    /// End-to-end budget for FetchLatest in milliseconds
    pub fetch_deadline_ms: u64,
    /// LOGIN phase timeout in milliseconds
    pub auth_timeout_ms: u64,
    /// Maximum accepted request body in bytes
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3001,
            allowed_origins: BUILTIN_ORIGINS.iter().map(|o| (*o).to_owned()).collect(),
            cors_allow_any: false,
            test_deadline_ms: 30_000,
            fetch_deadline_ms: 60_000,
            auth_timeout_ms: 30_000,
            body_limit_bytes: 64 * 1024,
        }
    }
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// Unset keys fall back to [`ServerConfig::default`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if a variable is set but malformed, or if a
    /// deadline is zero.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// PORT=3001
    /// CORS_ORIGIN=https://app.example.com
    /// MAIL_LATEST_FETCH_DEADLINE_MS=45000
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let defaults = Self::default();

        let bind_addr = match env::var("MAIL_LATEST_BIND") {
            Ok(v) => v.trim().parse::<IpAddr>().map_err(|_| {
                AppError::invalid(format!("invalid address in MAIL_LATEST_BIND: '{v}'"))
            })?,
            Err(VarError::NotPresent) => defaults.bind_addr,
            Err(VarError::NotUnicode(_)) => {
                return Err(AppError::invalid(
                    "environment variable MAIL_LATEST_BIND contains non-unicode data",
                ));
            }
        };

        let mut allowed_origins = defaults.allowed_origins;
        if let Ok(extra) = env::var("CORS_ORIGIN") {
            for origin in parse_origin_list(&extra) {
                if !allowed_origins.contains(&origin) {
                    allowed_origins.push(origin);
                }
            }
        }

        let config = Self {
            bind_addr,
            port: parse_u16_env("PORT", defaults.port)?,
            allowed_origins,
            cors_allow_any: parse_bool_env("MAIL_LATEST_CORS_ALLOW_ANY", defaults.cors_allow_any)?,
            test_deadline_ms: parse_u64_env("MAIL_LATEST_TEST_DEADLINE_MS", defaults.test_deadline_ms)?,
            fetch_deadline_ms: parse_u64_env(
                "MAIL_LATEST_FETCH_DEADLINE_MS",
                defaults.fetch_deadline_ms,
            )?,
            auth_timeout_ms: parse_u64_env("MAIL_LATEST_AUTH_TIMEOUT_MS", defaults.auth_timeout_ms)?,
            body_limit_bytes: parse_usize_env(
                "MAIL_LATEST_BODY_LIMIT_BYTES",
                defaults.body_limit_bytes,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject zero-length budgets, which would fail every request
    pub fn validate(&self) -> AppResult<()> {
        if self.test_deadline_ms == 0 || self.fetch_deadline_ms == 0 || self.auth_timeout_ms == 0 {
            return Err(AppError::invalid("deadlines and timeouts must be non-zero"));
        }
        Ok(())
    }

    pub fn test_deadline(&self) -> Duration {
        Duration::from_millis(self.test_deadline_ms)
    }

    pub fn fetch_deadline(&self) -> Duration {
        Duration::from_millis(self.fetch_deadline_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }
}

/// Split a comma-separated origin list, dropping blanks and trailing slashes
fn parse_origin_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|o| o.trim().trim_end_matches('/'))
        .filter(|o| !o.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parse a boolean environment variable with flexible values
///
/// Accepts: `1`, `true`, `yes`, `y`, `on` (truthy) or `0`, `false`, `no`,
/// `n`, `off` (falsy). Case-insensitive. Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidRequest` if the variable is set to an unrecognized value.
fn parse_bool_env(key: &str, default: bool) -> AppResult<bool> {
    match env::var(key) {
        Ok(v) => parse_bool_value(&v).ok_or_else(|| {
            AppError::invalid(format!("invalid boolean environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::invalid(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u16` environment variable with default fallback
fn parse_u16_env(key: &str, default: u16) -> AppResult<u16> {
    match env::var(key) {
        Ok(v) => v.trim().parse::<u16>().map_err(|_| {
            AppError::invalid(format!("invalid u16 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::invalid(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u64` environment variable with default fallback
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => v.trim().parse::<u64>().map_err(|_| {
            AppError::invalid(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::invalid(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `usize` environment variable with default fallback
fn parse_usize_env(key: &str, default: usize) -> AppResult<usize> {
    match env::var(key) {
        Ok(v) => v.trim().parse::<usize>().map_err(|_| {
            AppError::invalid(format!("invalid usize environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::invalid(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}
