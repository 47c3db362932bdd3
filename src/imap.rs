//! IMAP capability interface and its `async-imap` implementation
//!
//! [`MailTransport`] is the narrow surface the session lifecycle drives:
//! connect, authenticate, read-only select, search, single-message fetch,
//! and disconnect. [`ImapTransport`] realizes it over tokio sockets with
//! optional TLS (implicit or `STARTTLS`).

use std::fmt::Debug;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_imap::error::Error as ImapError;
use async_imap::types::Fetch;
use async_imap::{Client, Session};
use futures::TryStreamExt;
use rustls::ClientConfig;
use secrecy::ExposeSecret;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::credentials::SecurityMode;
use crate::errors::{AppError, AppResult};
use crate::models::RawMessage;
use crate::transport::{ConnectionDescriptor, permissive_tls_config};

/// Header and body text only; `PEEK` leaves `\Seen` untouched
const FETCH_QUERY: &str = "(UID BODY.PEEK[HEADER] BODY.PEEK[TEXT])";

/// Protocol operations needed by the session lifecycle
///
/// Implementations own the wire protocol; callers own ordering and the
/// overall deadline. Every returned future is `Send` so the operations can
/// run inside axum handlers.
///
/// Dropping a `Connection` or `Session` value must release its socket.
/// Cancelling any returned future must do the same for whatever it holds.
pub trait MailTransport: Send + Sync {
    /// Connected, greeted, not yet authenticated
    type Connection: Send;
    /// Authenticated session
    type Session: Send;

    /// Open the transport
    ///
    /// Resolves the host, opens TCP, applies TLS as the descriptor's
    /// security mode requires, and reads the server greeting.
    ///
    /// # Timeouts
    ///
    /// The whole sequence is bounded by `descriptor.connect_timeout`.
    ///
    /// # Errors
    ///
    /// - `HostNotFound` if the host does not resolve
    /// - `Connect` for refused TCP, failed TLS, or a missing greeting
    /// - `Timeout` if the connect timeout elapses
    fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> impl Future<Output = AppResult<Self::Connection>> + Send;

    /// Log in with the descriptor's credentials
    ///
    /// Consumes the connection; on failure it is dropped and its socket
    /// released.
    ///
    /// # Timeouts
    ///
    /// LOGIN is bounded by `descriptor.auth_timeout`.
    ///
    /// # Errors
    ///
    /// - `Auth` if the server rejects the credentials
    /// - `Connect` if the connection fails during LOGIN
    /// - `Timeout` if the auth timeout elapses
    fn authenticate(
        &self,
        connection: Self::Connection,
        descriptor: &ConnectionDescriptor,
    ) -> impl Future<Output = AppResult<Self::Session>> + Send;

    /// Open `mailbox` read-only; returns the message count
    ///
    /// Must never change flags or mailbox contents.
    ///
    /// # Errors
    ///
    /// `Mailbox` if the server refuses the select.
    fn select_mailbox_readonly(
        &self,
        session: &mut Self::Session,
        mailbox: &str,
    ) -> impl Future<Output = AppResult<u32>> + Send;

    /// Identifiers of every message in the selected mailbox, in server order
    ///
    /// # Errors
    ///
    /// `Search` on protocol failure.
    fn search_all(
        &self,
        session: &mut Self::Session,
    ) -> impl Future<Output = AppResult<Vec<u32>>> + Send;

    /// Header and body text of one message, `None` if the server sent nothing
    ///
    /// Requests only the header block and body text of `identifier`, never
    /// the full raw message.
    ///
    /// # Errors
    ///
    /// `Fetch` on protocol failure.
    fn fetch_one(
        &self,
        session: &mut Self::Session,
        identifier: u32,
    ) -> impl Future<Output = AppResult<Option<RawMessage>>> + Send;

    /// Graceful logout; the session is consumed either way
    ///
    /// # Errors
    ///
    /// `Connect` if LOGOUT fails. The socket is released regardless.
    fn disconnect(&self, session: Self::Session) -> impl Future<Output = AppResult<()>> + Send;
}

/// Byte stream an IMAP client can run over (plain TCP or TLS)
pub trait ImapStream: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<T> ImapStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

pub type BoxedStream = Box<dyn ImapStream>;
pub type ImapClient = Client<BoxedStream>;
pub type ImapSession = Session<BoxedStream>;

/// `async-imap` backed transport
///
/// Stateless apart from the shared TLS configuration; every `connect` opens
/// a new socket. Commands used: `LOGIN`, `EXAMINE`, `UID SEARCH ALL`,
/// `UID FETCH` with `BODY.PEEK`, `LOGOUT`.
#[derive(Clone)]
pub struct ImapTransport {
    tls: Arc<ClientConfig>,
}

impl ImapTransport {
    /// Create a transport using the permissive TLS policy
    ///
    /// See the `transport` module's Security section for what the policy
    /// does and does not verify.
    ///
    /// # Errors
    ///
    /// `Internal` if the TLS client configuration cannot be built.
    pub fn new() -> AppResult<Self> {
        Ok(Self {
            tls: permissive_tls_config()?,
        })
    }

    /// Open the socket, negotiate TLS per security mode, read the greeting
    ///
    /// `tls` upgrades with `STARTTLS` after the plaintext greeting; the
    /// server greets only once, so no second greeting is read afterwards.
    async fn establish(&self, descriptor: &ConnectionDescriptor) -> AppResult<ImapClient> {
        let tcp = open_tcp(descriptor).await?;

        match descriptor.security {
            SecurityMode::Ssl => {
                let tls = self.handshake(descriptor, tcp).await?;
                let mut client = Client::new(Box::new(tls) as BoxedStream);
                read_greeting(&mut client).await?;
                Ok(client)
            }
            SecurityMode::Tls => {
                let mut plain = Client::new(tcp);
                read_greeting(&mut plain).await?;
                plain
                    .run_command_and_check_ok("STARTTLS", None)
                    .await
                    .map_err(|e| AppError::Connect(format!("STARTTLS rejected: {e}")))?;
                let tls = self.handshake(descriptor, plain.into_inner()).await?;
                Ok(Client::new(Box::new(tls) as BoxedStream))
            }
            SecurityMode::None => {
                let mut client = Client::new(Box::new(tcp) as BoxedStream);
                read_greeting(&mut client).await?;
                Ok(client)
            }
        }
    }

    async fn handshake(
        &self,
        descriptor: &ConnectionDescriptor,
        tcp: TcpStream,
    ) -> AppResult<TlsStream<TcpStream>> {
        TlsConnector::from(Arc::clone(&self.tls))
            .connect(descriptor.tls_server_name.clone(), tcp)
            .await
            .map_err(|e| AppError::Connect(format!("TLS handshake failed: {e}")))
    }
}

impl MailTransport for ImapTransport {
    type Connection = ImapClient;
    type Session = ImapSession;

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> AppResult<ImapClient> {
        timeout(descriptor.connect_timeout, self.establish(descriptor))
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "Connection timeout after {}",
                    describe_duration(descriptor.connect_timeout)
                ))
            })?
    }

    async fn authenticate(
        &self,
        connection: ImapClient,
        descriptor: &ConnectionDescriptor,
    ) -> AppResult<ImapSession> {
        let pass = descriptor.secret.expose_secret();
        timeout(
            descriptor.auth_timeout,
            connection.login(descriptor.user.as_str(), pass),
        )
        .await
        .map_err(|_| {
            AppError::Timeout(format!(
                "Authentication timeout after {}",
                describe_duration(descriptor.auth_timeout)
            ))
        })?
        .map_err(|(e, _client)| classify_login_error(e))
    }

    async fn select_mailbox_readonly(
        &self,
        session: &mut ImapSession,
        mailbox: &str,
    ) -> AppResult<u32> {
        let selected = session
            .examine(mailbox)
            .await
            .map_err(|e| AppError::Mailbox(e.to_string()))?;
        Ok(selected.exists)
    }

    async fn search_all(&self, session: &mut ImapSession) -> AppResult<Vec<u32>> {
        let set = session
            .uid_search("ALL")
            .await
            .map_err(|e| AppError::Search(e.to_string()))?;
        Ok(set.into_iter().collect())
    }

    async fn fetch_one(
        &self,
        session: &mut ImapSession,
        identifier: u32,
    ) -> AppResult<Option<RawMessage>> {
        let stream = session
            .uid_fetch(identifier.to_string(), FETCH_QUERY)
            .await
            .map_err(|e| AppError::Fetch(e.to_string()))?;
        let fetches: Vec<Fetch> = stream
            .try_collect()
            .await
            .map_err(|e| AppError::Fetch(e.to_string()))?;

        let Some(fetch) = select_fetch(
            &fetches,
            identifier,
            |f| f.uid,
            |f| f.header().is_some() || f.text().is_some(),
        ) else {
            return Ok(None);
        };

        let header = fetch.header().map(<[u8]>::to_vec);
        let body = fetch.text().map(<[u8]>::to_vec);
        if header.is_none() && body.is_none() {
            return Ok(None);
        }

        Ok(Some(RawMessage::new(
            identifier,
            header.unwrap_or_default(),
            body.unwrap_or_default(),
        )))
    }

    async fn disconnect(&self, mut session: ImapSession) -> AppResult<()> {
        session
            .logout()
            .await
            .map_err(|e| AppError::Connect(format!("LOGOUT failed: {e}")))
    }
}

/// Pick the response for `identifier` out of a `UID FETCH` result
///
/// Servers may interleave unsolicited FETCH responses for other messages.
/// A response naming `identifier` wins; a response without a UID is
/// accepted only if it carries data. A response naming any other UID is
/// never chosen.
fn select_fetch<F>(
    fetches: &[F],
    identifier: u32,
    uid: impl Fn(&F) -> Option<u32>,
    has_data: impl Fn(&F) -> bool,
) -> Option<&F> {
    fetches
        .iter()
        .find(|f| uid(f) == Some(identifier))
        .or_else(|| fetches.iter().find(|f| uid(f).is_none() && has_data(f)))
}

/// Resolve the host, then try each address in turn
///
/// Resolution failure is reported separately from refusal so callers can
/// tell a typo'd host from a down server.
async fn open_tcp(descriptor: &ConnectionDescriptor) -> AppResult<TcpStream> {
    let addrs: Vec<SocketAddr> = lookup_host((descriptor.host.as_str(), descriptor.port))
        .await
        .map_err(|e| AppError::HostNotFound(format!("{}: {e}", descriptor.host)))?
        .collect();
    if addrs.is_empty() {
        return Err(AppError::HostNotFound(descriptor.host.clone()));
    }

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tracing::debug!(%addr, "tcp connected");
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "tcp connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(AppError::Connect(match last_error {
        Some(e) => format!("{}:{}: {e}", descriptor.host, descriptor.port),
        None => format!("{}:{}: no usable address", descriptor.host, descriptor.port),
    }))
}

/// Read the untagged greeting the server sends on connect
///
/// # Errors
///
/// `Connect` if reading fails or the server closes the stream first.
async fn read_greeting<T>(client: &mut Client<T>) -> AppResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug,
{
    let greeting = client
        .read_response()
        .await
        .map_err(|e| AppError::Connect(format!("IMAP greeting failed: {e}")))?;
    if greeting.is_none() {
        return Err(AppError::Connect(
            "IMAP server closed connection before greeting".to_owned(),
        ));
    }
    Ok(())
}

/// `NO`/`BAD` answers to LOGIN are credential rejections; anything else
/// is a transport failure.
fn classify_login_error(error: ImapError) -> AppError {
    match error {
        ImapError::No(msg) | ImapError::Bad(msg) => AppError::Auth(msg),
        other => AppError::Connect(format!("login failed: {other}")),
    }
}

/// Render a timeout for user-facing messages
///
/// Whole seconds render as "30 seconds"; anything else, including
/// sub-second values, renders in milliseconds ("1500 ms").
pub fn describe_duration(duration: Duration) -> String {
    if duration.as_millis() % 1000 == 0 && duration.as_secs() > 0 {
        format!("{} seconds", duration.as_secs())
    } else {
        format!("{} ms", duration.as_millis())
    }
}
