//! Connection descriptors and TLS policy
//!
//! Derives everything the IMAP transport needs from validated credentials
//! and the operation being served. Nothing here touches the network.
//!
//! # Security
//!
//! Certificate chains are NOT validated. Users point the service at
//! arbitrary hosts, including self-signed and legacy mail servers, and the
//! host/port pair they supply is trusted instead. SNI is still sent. Any
//! deployment that needs chain validation must swap [`AcceptAnyServerCert`]
//! for a root-store verifier; doing so will break connectivity to some
//! misconfigured servers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use secrecy::SecretString;

use crate::config::ServerConfig;
use crate::credentials::{Credentials, SecurityMode};
use crate::errors::{AppError, AppResult};

/// The two request/response operations served over one session each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    TestConnection,
    FetchLatest,
}

impl Operation {
    /// End-to-end budget for the whole open+operate sequence
    pub fn deadline(self, config: &ServerConfig) -> Duration {
        match self {
            Self::TestConnection => config.test_deadline(),
            Self::FetchLatest => config.fetch_deadline(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TestConnection => "test_connection",
            Self::FetchLatest => "fetch_latest",
        })
    }
}

/// Read-only view of one request's connection parameters
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub security: SecurityMode,
    /// TLS from the first byte (`ssl`); `tls` upgrades after the greeting
    pub implicit_tls: bool,
    /// SNI name, always the configured host
    pub tls_server_name: ServerName<'static>,
    pub user: String,
    pub secret: SecretString,
    /// Bound on resolve + TCP connect + TLS handshake + greeting
    pub connect_timeout: Duration,
    /// Bound on LOGIN
    pub auth_timeout: Duration,
}

impl ConnectionDescriptor {
    /// Build the descriptor for `operation`
    ///
    /// The connect timeout equals the operation deadline (30s test / 60s
    /// fetch by default); the auth timeout is shared by both operations.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if the host cannot be used as a TLS server name.
    pub fn new(
        credentials: &Credentials,
        operation: Operation,
        config: &ServerConfig,
    ) -> AppResult<Self> {
        let tls_server_name = ServerName::try_from(credentials.host.clone())
            .map_err(|_| AppError::invalid("invalid IMAP host for TLS SNI"))?;

        Ok(Self {
            host: credentials.host.clone(),
            port: credentials.port,
            security: credentials.security,
            implicit_tls: credentials.security == SecurityMode::Ssl,
            tls_server_name,
            user: credentials.address.clone(),
            secret: credentials.secret.clone(),
            connect_timeout: operation.deadline(config),
            auth_timeout: config.auth_timeout(),
        })
    }

    /// Whether the session is encrypted at all
    pub fn encrypted(&self) -> bool {
        self.security != SecurityMode::None
    }
}

/// Build the client TLS configuration used for every IMAP connection
///
/// # Errors
///
/// `Internal` if the crypto provider rejects the default protocol versions.
pub fn permissive_tls_config() -> AppResult<Arc<ClientConfig>> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let verifier = AcceptAnyServerCert::new(&provider);
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| AppError::Internal(format!("TLS configuration failed: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Certificate verifier that trusts any chain
///
/// Handshake signatures are still checked against the presented
/// certificate, so the peer must hold the key for the certificate it sends.
#[derive(Debug)]
pub struct AcceptAnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyServerCert {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        tracing::debug!(server = ?server_name, "accepting server certificate without chain validation");
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;

    use super::{ConnectionDescriptor, Operation, permissive_tls_config};
    use crate::config::ServerConfig;
    use crate::credentials::{Credentials, SecurityMode};

    fn credentials(host: &str, security: SecurityMode) -> Credentials {
        Credentials {
            address: "user@example.com".to_owned(),
            secret: SecretString::new("pw".into()),
            host: host.to_owned(),
            port: 993,
            security,
        }
    }

    #[test]
    fn ssl_is_implicit_tls_and_tls_is_upgrade() {
        let config = ServerConfig::default();
        let ssl = ConnectionDescriptor::new(
            &credentials("imap.example.com", SecurityMode::Ssl),
            Operation::FetchLatest,
            &config,
        )
        .expect("descriptor");
        assert!(ssl.implicit_tls);
        assert!(ssl.encrypted());

        let starttls = ConnectionDescriptor::new(
            &credentials("imap.example.com", SecurityMode::Tls),
            Operation::FetchLatest,
            &config,
        )
        .expect("descriptor");
        assert!(!starttls.implicit_tls);
        assert!(starttls.encrypted());

        let plain = ConnectionDescriptor::new(
            &credentials("imap.example.com", SecurityMode::None),
            Operation::FetchLatest,
            &config,
        )
        .expect("descriptor");
        assert!(!plain.implicit_tls);
        assert!(!plain.encrypted());
    }

    #[test]
    fn timeouts_follow_operation() {
        let config = ServerConfig::default();
        let creds = credentials("imap.example.com", SecurityMode::Ssl);

        let test = ConnectionDescriptor::new(&creds, Operation::TestConnection, &config)
            .expect("descriptor");
        assert_eq!(test.connect_timeout, Duration::from_secs(30));
        assert_eq!(test.auth_timeout, Duration::from_secs(30));

        let fetch =
            ConnectionDescriptor::new(&creds, Operation::FetchLatest, &config).expect("descriptor");
        assert_eq!(fetch.connect_timeout, Duration::from_secs(60));
    }

    #[test]
    fn sni_name_is_configured_host_and_ip_hosts_are_accepted() {
        let config = ServerConfig::default();
        let named = ConnectionDescriptor::new(
            &credentials("imap.example.com", SecurityMode::Ssl),
            Operation::TestConnection,
            &config,
        )
        .expect("descriptor");
        assert_eq!(named.tls_server_name.to_str(), "imap.example.com");

        ConnectionDescriptor::new(
            &credentials("192.0.2.10", SecurityMode::Ssl),
            Operation::TestConnection,
            &config,
        )
        .expect("ip host must be accepted");
    }

    #[test]
    fn permissive_config_builds() {
        permissive_tls_config().expect("TLS config must build");
    }
}
