//! In-memory [`MailTransport`] for lifecycle, reader, and handler tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use secrecy::SecretString;

use crate::config::ServerConfig;
use crate::credentials::{Credentials, SecurityMode};
use crate::errors::{AppError, AppResult};
use crate::imap::MailTransport;
use crate::models::RawMessage;
use crate::transport::{ConnectionDescriptor, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Connect,
    Authenticate,
    Select,
    Search,
    Fetch,
}

/// Decrements the live-connection counter when dropped
#[derive(Debug)]
pub struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct FakeConnection {
    guard: LiveGuard,
}

#[derive(Debug)]
pub struct FakeSession {
    _guard: LiveGuard,
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicUsize,
    logouts: AtomicUsize,
    searches: AtomicUsize,
    live: Arc<AtomicUsize>,
    fetched: Mutex<Vec<u32>>,
    examined: Mutex<Vec<String>>,
    last_login: Mutex<Option<String>>,
}

/// Scripted server: messages in listed order, optional failures and delays
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    messages: Vec<RawMessage>,
    reported_total: Option<u32>,
    fail_at: Option<Step>,
    delays: HashMap<Step, Duration>,
    no_fetch_data: bool,
    counters: Arc<Counters>,
}

impl FakeTransport {
    pub fn with_messages(messages: impl IntoIterator<Item = RawMessage>) -> Self {
        Self {
            messages: messages.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Count reported by EXAMINE, independent of the stored messages
    pub fn with_reported_total(mut self, total: u32) -> Self {
        self.reported_total = Some(total);
        self
    }

    pub fn failing_at(mut self, step: Step) -> Self {
        self.fail_at = Some(step);
        self
    }

    pub fn delayed_at(mut self, step: Step, delay: Duration) -> Self {
        self.delays.insert(step, delay);
        self
    }

    pub fn returning_no_fetch_data(mut self) -> Self {
        self.no_fetch_data = true;
        self
    }

    pub fn connect_attempts(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.counters.logouts.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> usize {
        self.counters.searches.load(Ordering::SeqCst)
    }

    pub fn live_connections(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub fn fetched(&self) -> Vec<u32> {
        self.counters.fetched.lock().expect("lock").clone()
    }

    pub fn examined(&self) -> Vec<String> {
        self.counters.examined.lock().expect("lock").clone()
    }

    pub fn last_login(&self) -> Option<String> {
        self.counters.last_login.lock().expect("lock").clone()
    }

    async fn step(&self, step: Step) -> AppResult<()> {
        if let Some(delay) = self.delays.get(&step) {
            tokio::time::sleep(*delay).await;
        }
        if self.fail_at == Some(step) {
            return Err(match step {
                Step::Connect => AppError::Connect("connection refused".to_owned()),
                Step::Authenticate => AppError::Auth("[AUTHENTICATIONFAILED] invalid".to_owned()),
                Step::Select => AppError::Mailbox("no such mailbox".to_owned()),
                Step::Search => AppError::Search("SEARCH failed".to_owned()),
                Step::Fetch => AppError::Fetch("FETCH failed".to_owned()),
            });
        }
        Ok(())
    }
}

impl MailTransport for FakeTransport {
    type Connection = FakeConnection;
    type Session = FakeSession;

    async fn connect(&self, _descriptor: &ConnectionDescriptor) -> AppResult<FakeConnection> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        // Counted as live from the first byte, so a cancelled connect must release it
        let guard = LiveGuard::acquire(&self.counters.live);
        self.step(Step::Connect).await?;
        Ok(FakeConnection { guard })
    }

    async fn authenticate(
        &self,
        connection: FakeConnection,
        descriptor: &ConnectionDescriptor,
    ) -> AppResult<FakeSession> {
        *self.counters.last_login.lock().expect("lock") = Some(descriptor.user.clone());
        self.step(Step::Authenticate).await?;
        Ok(FakeSession {
            _guard: connection.guard,
        })
    }

    async fn select_mailbox_readonly(
        &self,
        _session: &mut FakeSession,
        mailbox: &str,
    ) -> AppResult<u32> {
        self.counters
            .examined
            .lock()
            .expect("lock")
            .push(mailbox.to_owned());
        self.step(Step::Select).await?;
        Ok(self
            .reported_total
            .unwrap_or(u32::try_from(self.messages.len()).expect("small test mailbox")))
    }

    async fn search_all(&self, _session: &mut FakeSession) -> AppResult<Vec<u32>> {
        self.counters.searches.fetch_add(1, Ordering::SeqCst);
        self.step(Step::Search).await?;
        Ok(self.messages.iter().map(|m| m.identifier).collect())
    }

    async fn fetch_one(
        &self,
        _session: &mut FakeSession,
        identifier: u32,
    ) -> AppResult<Option<RawMessage>> {
        self.counters
            .fetched
            .lock()
            .expect("lock")
            .push(identifier);
        self.step(Step::Fetch).await?;
        if self.no_fetch_data {
            return Ok(None);
        }
        Ok(self
            .messages
            .iter()
            .find(|m| m.identifier == identifier)
            .cloned())
    }

    async fn disconnect(&self, session: FakeSession) -> AppResult<()> {
        self.counters.logouts.fetch_add(1, Ordering::SeqCst);
        drop(session);
        Ok(())
    }
}

/// Plain-text message with a fixed sender and date
pub fn message(identifier: u32, subject: &str, body: &str) -> RawMessage {
    let header = format!(
        "From: Sender <sender@example.com>\r\nSubject: {subject}\r\nDate: Wed, 1 Jan 2025 10:00:00 +0000\r\n\r\n"
    );
    RawMessage::new(identifier, header.into_bytes(), body.as_bytes().to_vec())
}

pub fn credentials() -> Credentials {
    Credentials {
        address: "user@example.com".to_owned(),
        secret: SecretString::new("app-password".into()),
        host: "imap.example.com".to_owned(),
        port: 993,
        security: SecurityMode::Ssl,
    }
}

pub fn descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor::new(
        &credentials(),
        Operation::TestConnection,
        &ServerConfig::default(),
    )
    .expect("descriptor")
}
