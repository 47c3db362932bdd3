//! Request credential validation
//!
//! Turns the raw JSON payload into [`Credentials`] before any socket is
//! opened. Validation is synchronous and side-effect free.

use std::fmt;
use std::str::FromStr;

use secrecy::SecretString;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{AppError, AppResult};

const MISSING_CREDENTIALS: &str = "Missing required credentials";

/// Encryption mode requested for the IMAP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    /// Implicit TLS from the first byte (typically port 993)
    Ssl,
    /// Plaintext connect upgraded with `STARTTLS` (typically port 143)
    Tls,
    /// No encryption
    None,
}

impl FromStr for SecurityMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssl" => Ok(Self::Ssl),
            "tls" | "starttls" => Ok(Self::Tls),
            "none" | "" => Ok(Self::None),
            other => Err(AppError::invalid(format!(
                "imapSecurity must be one of ssl, tls, none (got '{other}')"
            ))),
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ssl => "ssl",
            Self::Tls => "tls",
            Self::None => "none",
        })
    }
}

/// Untrusted request payload
///
/// Field names follow the mobile client (`email`, `password`, `imapHost`,
/// `imapPort`, `imapSecurity`); the generic names are accepted as aliases.
/// `imapPort` may arrive as a number or a numeric string.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCredentials {
    #[serde(default, alias = "address")]
    pub email: Option<String>,
    #[serde(default, alias = "secret")]
    pub password: Option<String>,
    #[serde(default, alias = "host")]
    pub imap_host: Option<String>,
    #[serde(default, alias = "port")]
    pub imap_port: Option<Value>,
    #[serde(default, alias = "securityMode")]
    pub imap_security: Option<String>,
}

/// Validated account credentials for one request
///
/// Immutable and never persisted. The secret is wrapped so it cannot leak
/// through `Debug` or logs.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub address: String,
    pub secret: SecretString,
    pub host: String,
    pub port: u16,
    pub security: SecurityMode,
}

impl RawCredentials {
    /// Check required fields and normalize the payload
    ///
    /// An absent `imapSecurity` defaults to [`SecurityMode::Ssl`].
    ///
    /// # Errors
    ///
    /// `InvalidRequest` when address, secret, host, or port is missing, the
    /// port is not an integer in `1..=65535`, the host contains whitespace or
    /// control characters, or the security mode is unknown.
    pub fn validate(self) -> AppResult<Credentials> {
        let address = non_empty(self.email).ok_or_else(|| AppError::invalid(MISSING_CREDENTIALS))?;
        let secret = self
            .password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::invalid(MISSING_CREDENTIALS))?;
        let host = non_empty(self.imap_host).ok_or_else(|| AppError::invalid(MISSING_CREDENTIALS))?;
        let port_value = self
            .imap_port
            .filter(|v| !v.is_null())
            .ok_or_else(|| AppError::invalid(MISSING_CREDENTIALS))?;

        let port = parse_port(&port_value)?;
        validate_no_controls(&address, "email")?;
        validate_host(&host)?;

        let security = match self.imap_security.as_deref() {
            Some(mode) => mode.parse()?,
            None => SecurityMode::Ssl,
        };

        Ok(Credentials {
            address,
            secret: SecretString::new(secret.into()),
            host,
            port,
            security,
        })
    }
}

/// Trimmed value, or `None` when absent or blank
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Accept a JSON number or numeric string as a TCP port
fn parse_port(value: &Value) -> AppResult<u16> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) if s.trim().is_empty() => {
            return Err(AppError::invalid(MISSING_CREDENTIALS));
        }
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .filter(|p| (1..=u64::from(u16::MAX)).contains(p))
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| AppError::invalid("imapPort must be an integer in range 1..65535"))
}

fn validate_host(host: &str) -> AppResult<()> {
    if host.len() > 253 || host.chars().any(char::is_whitespace) {
        return Err(AppError::invalid("imapHost is not a valid host name"));
    }
    validate_no_controls(host, "imapHost")
}

/// Reject control characters that could break IMAP command framing
fn validate_no_controls(value: &str, field: &str) -> AppResult<()> {
    if value.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::invalid(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}
