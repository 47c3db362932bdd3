//! Read-only INBOX reader
//!
//! Finds and fetches the single most recent message. "Most recent" is the
//! greatest UID the server reports, never the last element of the search
//! response, since servers are free to return results in any order.

use std::collections::BTreeSet;

use crate::errors::{AppError, AppResult};
use crate::imap::MailTransport;
use crate::models::RawMessage;
use crate::session::{Session, SessionState};

pub const INBOX: &str = "INBOX";

/// Identifiers present in INBOX at search time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxSnapshot {
    pub total_messages: u32,
    pub ids: BTreeSet<u32>,
}

impl MailboxSnapshot {
    pub fn new(total_messages: u32, ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            total_messages,
            ids: ids.into_iter().collect(),
        }
    }

    /// Greatest identifier, if any
    pub fn latest(&self) -> Option<u32> {
        self.ids.last().copied()
    }
}

/// Open INBOX with `EXAMINE` and record its message count
///
/// # Errors
///
/// `Mailbox` if the server refuses the select.
pub async fn open_inbox<T: MailTransport>(session: &mut Session<'_, T>) -> AppResult<u32> {
    let (transport, inner) = session.parts()?;
    let total = transport.select_mailbox_readonly(inner, INBOX).await?;
    session.record_total_messages(total);
    Ok(total)
}

/// Fetch the latest message in the already-open INBOX
///
/// Returns `Ok(None)` for an empty mailbox. An empty mailbox is decided from
/// the count reported at select time; no search is issued in that case.
///
/// # Errors
///
/// `Search` or `Fetch` on protocol failures, and `Fetch` when the server
/// answers the fetch of a searched identifier with no data.
pub async fn latest_message<T: MailTransport>(
    session: &mut Session<'_, T>,
) -> AppResult<Option<RawMessage>> {
    let total = session.total_messages();
    if total == 0 {
        tracing::debug!("INBOX is empty");
        return Ok(None);
    }

    session.transition(SessionState::Searching);
    let (transport, inner) = session.parts()?;
    let snapshot = MailboxSnapshot::new(total, transport.search_all(inner).await?);
    let Some(latest) = snapshot.latest() else {
        tracing::warn!(total, "INBOX reported messages but search returned none");
        return Ok(None);
    };
    tracing::debug!(
        total = snapshot.total_messages,
        found = snapshot.ids.len(),
        latest,
        "INBOX searched"
    );

    session.transition(SessionState::Fetching);
    let (transport, inner) = session.parts()?;
    match transport.fetch_one(inner, latest).await? {
        Some(message) => Ok(Some(message)),
        None => Err(AppError::Fetch(format!("no data returned for message {latest}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{MailboxSnapshot, latest_message};
    use crate::errors::AppError;
    use crate::session::{Deadline, open, run_in_session};
    use crate::testing::{FakeTransport, Step, descriptor, message};

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(60))
    }

    #[test]
    fn snapshot_latest_is_greatest_identifier() {
        assert_eq!(MailboxSnapshot::new(3, [3, 7, 5]).latest(), Some(7));
        assert_eq!(MailboxSnapshot::new(0, []).latest(), None);
    }

    #[tokio::test]
    async fn fetches_greatest_identifier_not_last_listed() {
        let transport = FakeTransport::with_messages([
            message(3, "third", "c"),
            message(7, "seventh", "g"),
            message(5, "fifth", "e"),
        ]);
        let mut session = open(&transport, &descriptor(), deadline())
            .await
            .expect("open");

        let raw = latest_message(&mut session)
            .await
            .expect("fetch")
            .expect("message present");

        assert_eq!(raw.identifier, 7);
        assert_eq!(transport.fetched(), vec![7]);
    }

    #[tokio::test]
    async fn empty_inbox_skips_search() {
        let transport = FakeTransport::default();
        let mut session = open(&transport, &descriptor(), deadline())
            .await
            .expect("open");

        assert!(latest_message(&mut session).await.expect("fetch").is_none());
        assert_eq!(transport.searches(), 0);
        assert!(transport.fetched().is_empty());
    }

    #[tokio::test]
    async fn empty_search_result_is_empty_inbox() {
        let transport = FakeTransport::default().with_reported_total(4);
        let mut session = open(&transport, &descriptor(), deadline())
            .await
            .expect("open");

        assert!(latest_message(&mut session).await.expect("fetch").is_none());
        assert_eq!(transport.searches(), 1);
        assert!(transport.fetched().is_empty());
    }

    #[tokio::test]
    async fn fetch_without_data_is_fetch_error() {
        let transport =
            FakeTransport::with_messages([message(9, "s", "b")]).returning_no_fetch_data();
        let mut session = open(&transport, &descriptor(), deadline())
            .await
            .expect("open");

        let err = latest_message(&mut session).await.expect_err("must fail");
        assert!(matches!(err, AppError::Fetch(_)));
    }

    #[tokio::test]
    async fn search_failure_is_search_error() {
        let transport = FakeTransport::with_messages([message(1, "s", "b")]).failing_at(Step::Search);
        let mut session = open(&transport, &descriptor(), deadline())
            .await
            .expect("open");

        let err = latest_message(&mut session).await.expect_err("must fail");
        assert!(matches!(err, AppError::Search(_)));
    }

    #[tokio::test]
    async fn fetch_failure_is_fetch_error_and_session_still_logs_out() {
        let transport = FakeTransport::with_messages([message(2, "a", "x"), message(4, "b", "y")])
            .failing_at(Step::Fetch);

        let err = run_in_session(&transport, &descriptor(), Duration::from_secs(60), |session| {
            Box::pin(async move { latest_message(session).await })
        })
        .await
        .expect_err("fetch must fail");

        assert!(matches!(err, AppError::Fetch(_)));
        assert_eq!(transport.fetched(), vec![4]);
        assert_eq!(transport.logouts(), 1);
        assert_eq!(transport.live_connections(), 0);
    }
}
