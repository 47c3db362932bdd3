//! Deadline-bounded IMAP session lifecycle
//!
//! One request owns one [`Session`]. The lifecycle runs
//! `Idle -> Connecting -> Authenticating -> MailboxOpen -> (Searching ->
//! Fetching)? -> Closing -> Closed` under a single wall-clock budget that is
//! never reset between phases. Any failure before `MailboxOpen` ends in
//! `Failed`; exceeding the budget ends in `TimedOut`. Both drop the
//! connection without a LOGOUT exchange. INBOX is only ever opened with
//! `EXAMINE`, so no path through here can alter mailbox state.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{Instant, timeout_at};

use crate::errors::{AppError, AppResult};
use crate::imap::{MailTransport, describe_duration};
use crate::mailbox;
use crate::transport::ConnectionDescriptor;

/// Lifecycle states of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Authenticating,
    MailboxOpen,
    Searching,
    Fetching,
    Closing,
    Closed,
    Failed,
    TimedOut,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Single budget for the whole open+operate sequence
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start the clock now
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Error reported when the budget is exhausted
    pub fn exceeded(&self) -> AppError {
        AppError::Timeout(format!(
            "Connection timeout after {}",
            describe_duration(self.budget)
        ))
    }
}

/// One authenticated connection with INBOX open read-only
///
/// Dropping a session that has not reached a terminal state force-closes
/// its connection.
pub struct Session<'t, T: MailTransport> {
    transport: &'t T,
    inner: Option<T::Session>,
    state: SessionState,
    total_messages: u32,
}

impl<'t, T: MailTransport> Session<'t, T> {
    fn idle(transport: &'t T) -> Self {
        Self {
            transport,
            inner: None,
            state: SessionState::Idle,
            total_messages: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Message count reported when INBOX was opened
    pub fn total_messages(&self) -> u32 {
        self.total_messages
    }

    pub(crate) fn record_total_messages(&mut self, total: u32) {
        self.total_messages = total;
    }

    pub(crate) fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = %self.state, to = %next, "session state");
        self.state = next;
    }

    /// Transport and live protocol session, for the mailbox reader
    pub(crate) fn parts(&mut self) -> AppResult<(&'t T, &mut T::Session)> {
        let transport = self.transport;
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| AppError::Internal(format!("no live connection in state {}", self.state)))?;
        Ok((transport, inner))
    }

    /// Release the connection without a LOGOUT exchange
    fn abort(mut self, state: SessionState) {
        self.transition(state);
        if self.inner.take().is_some() {
            tracing::warn!(state = %state, "IMAP connection force-closed");
        }
    }

    /// LOGOUT and release, bounded by the remaining budget
    ///
    /// A failed or late LOGOUT still releases the connection; the
    /// operation's outcome is already decided at this point.
    async fn close(mut self, deadline: Deadline) {
        self.transition(SessionState::Closing);
        if let Some(inner) = self.inner.take() {
            match timeout_at(deadline.instant(), self.transport.disconnect(inner)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "logout failed; connection dropped"),
                Err(_) => tracing::warn!("logout exceeded deadline; connection dropped"),
            }
        }
        self.transition(SessionState::Closed);
    }
}

impl<T: MailTransport> Drop for Session<'_, T> {
    fn drop(&mut self) {
        if self.inner.is_some() && !self.state.is_terminal() {
            tracing::warn!(state = %self.state, "IMAP session dropped mid-flight; connection force-closed");
        }
    }
}

/// Connect, authenticate, and open INBOX read-only before `deadline`
///
/// # Errors
///
/// `HostNotFound`/`Connect`, `Auth`, `Mailbox`, or `Timeout`. On every error
/// the connection, if one was allocated, is released before returning.
pub async fn open<'t, T: MailTransport>(
    transport: &'t T,
    descriptor: &ConnectionDescriptor,
    deadline: Deadline,
) -> AppResult<Session<'t, T>> {
    let mut session = Session::idle(transport);

    let opened = timeout_at(deadline.instant(), async {
        session.transition(SessionState::Connecting);
        let connection = transport.connect(descriptor).await?;

        session.transition(SessionState::Authenticating);
        let inner = transport.authenticate(connection, descriptor).await?;
        session.inner = Some(inner);

        mailbox::open_inbox(&mut session).await
    })
    .await;

    match opened {
        Ok(Ok(total)) => {
            session.transition(SessionState::MailboxOpen);
            tracing::debug!(total, "INBOX opened read-only");
            Ok(session)
        }
        Ok(Err(e)) => {
            tracing::warn!(state = %session.state(), error = %e, "session open failed");
            session.abort(SessionState::Failed);
            Err(e)
        }
        Err(_) => {
            tracing::warn!(state = %session.state(), "session open exceeded deadline");
            session.abort(SessionState::TimedOut);
            Err(deadline.exceeded())
        }
    }
}

/// Run `op` inside a freshly opened session, then always release it
///
/// `budget` covers connect, login, select, and `op` together. When `op`
/// finishes, successfully or not, the session is closed with LOGOUT. If the
/// budget runs out first, `op` is cancelled, the connection is dropped
/// immediately, and the call fails with `Timeout`.
pub async fn run_in_session<'t, T, R, F>(
    transport: &'t T,
    descriptor: &ConnectionDescriptor,
    budget: Duration,
    op: F,
) -> AppResult<R>
where
    T: MailTransport,
    R: Send,
    F: for<'s> FnOnce(&'s mut Session<'t, T>) -> BoxFuture<'s, AppResult<R>> + Send,
{
    let deadline = Deadline::after(budget);
    let mut session = open(transport, descriptor, deadline).await?;

    let outcome = timeout_at(deadline.instant(), op(&mut session)).await;
    match outcome {
        Ok(result) => {
            if let Err(e) = &result {
                tracing::warn!(state = %session.state(), error = %e, "session operation failed");
            }
            session.close(deadline).await;
            result
        }
        Err(_) => {
            tracing::warn!(state = %session.state(), "session operation exceeded deadline");
            session.abort(SessionState::TimedOut);
            Err(deadline.exceeded())
        }
    }
}
