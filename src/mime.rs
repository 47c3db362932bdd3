//! Header parsing and body decoding
//!
//! Parses the fetched header block with `mailparse`, decodes the body text
//! according to its transfer encoding, and builds the bounded preview.
//! Everything here is best-effort: malformed input degrades to raw text or
//! absent fields, never to an error.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use mailparse::MailHeaderMap;
use quoted_printable::ParseMode;

/// Preview used when the body is empty or absent
pub const NO_PREVIEW: &str = "No preview available";
/// Maximum preview length in characters, before the ellipsis
pub const PREVIEW_MAX_CHARS: usize = 150;
const ELLIPSIS: &str = "...";

/// Header fields the result mapper needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    /// Decoded Subject header
    pub subject: Option<String>,
    /// Decoded From header
    pub from: Option<String>,
    /// Raw Date header
    pub date: Option<String>,
    /// Lowercased Content-Transfer-Encoding
    pub transfer_encoding: Option<String>,
}

/// Parse a header block into the fields of interest
///
/// RFC 2047 encoded words are decoded by `mailparse`. Blank values are
/// treated as absent. Unparseable input yields all-`None` fields.
pub fn parse_header_fields(header_bytes: &[u8]) -> HeaderFields {
    let headers = match mailparse::parse_headers(header_bytes) {
        Ok((headers, _)) => headers,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse message headers");
            return HeaderFields::default();
        }
    };

    let value = |key: &str| {
        headers
            .get_first_value(key)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    };

    HeaderFields {
        subject: value("Subject"),
        from: value("From"),
        date: value("Date"),
        transfer_encoding: value("Content-Transfer-Encoding").map(|v| v.to_ascii_lowercase()),
    }
}

/// Parse an RFC 2822 date header into UTC
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let timestamp = mailparse::dateparse(value).ok()?;
    DateTime::from_timestamp(timestamp, 0)
}

/// Decode body bytes according to a transfer-encoding hint
///
/// `quoted-printable` and `base64` are decoded and read as UTF-8. Any other
/// hint, or none, means the bytes are already text. If decoding or UTF-8
/// validation fails the raw bytes are returned as (lossy) text.
pub fn decode_body(bytes: &[u8], encoding: Option<&str>) -> String {
    let hint = encoding.map(|e| e.trim().to_ascii_lowercase());
    let decoded = match hint.as_deref() {
        Some("quoted-printable") => {
            quoted_printable::decode(bytes, ParseMode::Robust).map_err(|e| e.to_string())
        }
        Some("base64") => {
            let compact: Vec<u8> = bytes
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            STANDARD.decode(compact).map_err(|e| e.to_string())
        }
        _ => return String::from_utf8_lossy(bytes).into_owned(),
    };

    match decoded.and_then(|d| String::from_utf8(d).map_err(|e| e.to_string())) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(error = %e, encoding = ?hint, "body decode failed; using raw text");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Build the one-line preview shown for a message
///
/// Whitespace runs collapse to one space and the ends are trimmed. Text
/// longer than [`PREVIEW_MAX_CHARS`] is cut there and gets `...` appended.
/// Empty or absent text yields [`NO_PREVIEW`].
pub fn make_preview(text: Option<&str>) -> String {
    let normalized = text
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();
    if normalized.is_empty() {
        return NO_PREVIEW.to_owned();
    }
    if normalized.chars().count() > PREVIEW_MAX_CHARS {
        let mut preview = truncate_chars(normalized, PREVIEW_MAX_CHARS);
        preview.push_str(ELLIPSIS);
        preview
    } else {
        normalized
    }
}

/// Truncate string to maximum characters (Unicode-aware)
///
/// Preserves complete characters, never splitting multi-byte sequences.
pub fn truncate_chars(input: String, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}
