//! Message and response types
//!
//! [`RawMessage`] is what the mailbox reader fetches; [`EmailResult`] is the
//! only message value handed back to callers. The response structs define
//! the JSON bodies of the HTTP surface.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::mime;

pub const DEFAULT_SUBJECT: &str = "No Subject";
pub const DEFAULT_SENDER: &str = "Unknown Sender";
pub const EMPTY_INBOX_MESSAGE: &str = "No emails found in inbox";
pub const CONNECTION_OK_MESSAGE: &str = "Email connection successful";

/// Header and body-text sections of one fetched message
///
/// Lives only inside the mailbox reader's scope and the mapping step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// UID of the message in INBOX
    pub identifier: u32,
    /// `BODY[HEADER]` bytes
    pub header: Vec<u8>,
    /// `BODY[TEXT]` bytes
    pub body: Vec<u8>,
    /// Content-Transfer-Encoding taken from the header block
    pub transfer_encoding: Option<String>,
}

impl RawMessage {
    pub fn new(identifier: u32, header: Vec<u8>, body: Vec<u8>) -> Self {
        let transfer_encoding = mime::parse_header_fields(&header).transfer_encoding;
        Self {
            identifier,
            header,
            body,
            transfer_encoding,
        }
    }
}

/// Latest-message record returned to the caller
///
/// Serialized with the wire names the mobile client reads (`uid`, `from`,
/// `snippet`); `date` is ISO-8601 UTC with milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailResult {
    #[serde(rename = "uid")]
    pub identifier: u32,
    pub subject: String,
    #[serde(rename = "from")]
    pub sender: String,
    #[serde(serialize_with = "serialize_iso8601")]
    pub date: DateTime<Utc>,
    #[serde(rename = "snippet")]
    pub preview: String,
}

impl EmailResult {
    /// Map a fetched message to the caller-facing record
    ///
    /// Total: absent subject/sender use fixed defaults, an absent or
    /// unparseable date becomes the current time, and an empty body gets
    /// the fixed "no preview" text.
    pub fn from_message(raw: &RawMessage) -> Self {
        let fields = mime::parse_header_fields(&raw.header);
        let body = (!raw.body.is_empty())
            .then(|| mime::decode_body(&raw.body, raw.transfer_encoding.as_deref()));

        Self {
            identifier: raw.identifier,
            subject: fields.subject.unwrap_or_else(|| DEFAULT_SUBJECT.to_owned()),
            sender: fields.from.unwrap_or_else(|| DEFAULT_SENDER.to_owned()),
            date: fields
                .date
                .as_deref()
                .and_then(mime::parse_date)
                .unwrap_or_else(Utc::now),
            preview: mime::make_preview(body.as_deref()),
        }
    }
}

fn serialize_iso8601<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&date.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Body of a successful TestConnection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTestResponse {
    pub success: bool,
    pub message: String,
}

impl ConnectionTestResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: CONNECTION_OK_MESSAGE.to_owned(),
        }
    }
}

/// Body of a successful FetchLatest
///
/// `email` is always present and is `null` for an empty inbox, in which
/// case `message` explains why.
#[derive(Debug, Clone, Serialize)]
pub struct FetchLatestResponse {
    pub success: bool,
    pub email: Option<EmailResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FetchLatestResponse {
    pub fn found(email: EmailResult) -> Self {
        Self {
            success: true,
            email: Some(email),
            message: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            success: true,
            email: None,
            message: Some(EMPTY_INBOX_MESSAGE.to_owned()),
        }
    }
}

/// Liveness body
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

impl HealthResponse {
    pub fn now() -> Self {
        Self {
            status: "OK",
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}
