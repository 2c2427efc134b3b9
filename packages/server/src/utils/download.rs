use std::time::SystemTime;

use axum::http::{HeaderMap, header};
use chrono::{DateTime, Utc};

use crate::domain::BinaryRecord;

/// Per-request download metadata derived from a `BinaryRecord`: cache
/// validators plus the content headers, after applying the `type` and
/// `output` query overrides.
#[derive(Debug)]
pub struct DownloadDescriptor {
    /// Opaque validator, quoted; changes iff length or last-modified changes.
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub content_type: String,
    pub content_disposition: String,
    /// Scopes conversion-derived sibling files when a sub type is in play.
    pub sub_resource_path: Option<String>,
}

impl DownloadDescriptor {
    pub fn new(
        record: &BinaryRecord,
        file_name: &str,
        sub_type: Option<&str>,
        type_override: Option<&str>,
        output: Option<&str>,
    ) -> Self {
        let etag = format!("\"{}-{}\"", record.length, record.modified.timestamp_millis());

        let content_type = match type_override.filter(|t| !t.is_empty()) {
            // A full MIME type is used verbatim, anything else is treated as
            // a file extension.
            Some(t) if t.contains('/') => t.to_string(),
            Some(ext) => mime_guess::from_ext(ext)
                .first_or_octet_stream()
                .to_string(),
            None => mime_guess::from_path(file_name)
                .first_or_octet_stream()
                .to_string(),
        };

        let disposition = if output == Some("inline") {
            "inline"
        } else {
            "attachment"
        };

        Self {
            etag,
            last_modified: record.modified,
            content_type,
            content_disposition: content_disposition_value(disposition, file_name),
            sub_resource_path: sub_type
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
        }
    }

    /// `Last-Modified` header value (IMF-fixdate).
    pub fn last_modified_http(&self) -> String {
        httpdate::fmt_http_date(SystemTime::from(self.last_modified))
    }
}

/// Outcome of evaluating the request's cache validators, decided before any
/// byte is read from storage.
#[derive(Debug, PartialEq, Eq)]
pub enum Precondition {
    Proceed,
    NotModified,
    Failed,
}

/// Evaluate conditional request headers against a descriptor.
///
/// `If-None-Match` takes precedence over `If-Modified-Since`: exact-byte
/// validator semantics trump timestamp granularity.
pub fn evaluate_preconditions(headers: &HeaderMap, descriptor: &DownloadDescriptor) -> Precondition {
    // Second granularity, as HTTP dates carry no fraction.
    let modified_secs = descriptor.last_modified.timestamp();

    if let Some(if_match) = header_str(headers, header::IF_MATCH)
        && if_match != "*"
        && !etag_listed(if_match, &descriptor.etag)
    {
        return Precondition::Failed;
    }

    if let Some(value) = header_str(headers, header::IF_UNMODIFIED_SINCE)
        && let Ok(since) = httpdate::parse_http_date(value)
        && modified_secs > unix_secs(since)
    {
        return Precondition::Failed;
    }

    if let Some(if_none_match) = header_str(headers, header::IF_NONE_MATCH) {
        if if_none_match == "*" || etag_listed(if_none_match, &descriptor.etag) {
            return Precondition::NotModified;
        }
        return Precondition::Proceed;
    }

    if let Some(value) = header_str(headers, header::IF_MODIFIED_SINCE)
        && let Ok(since) = httpdate::parse_http_date(value)
        && modified_secs <= unix_secs(since)
    {
        return Precondition::NotModified;
    }

    Precondition::Proceed
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn unix_secs(time: SystemTime) -> i64 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// True when `etag` appears in a comma-separated validator list. Weak
/// comparison: a `W/` prefix on a listed validator is ignored.
fn etag_listed(list: &str, etag: &str) -> bool {
    list.split(',')
        .map(|candidate| candidate.trim())
        .any(|candidate| candidate.strip_prefix("W/").unwrap_or(candidate) == etag)
}

/// Build a safe `Content-Disposition` header value.
fn content_disposition_value(disposition: &str, filename: &str) -> String {
    let ascii_safe: String = filename
        .chars()
        .filter(|c| c.is_ascii_graphic() && !matches!(c, '"' | ';' | '\\'))
        .collect();
    let ascii_name = if ascii_safe.is_empty() {
        "download".to_string()
    } else {
        ascii_safe
    };

    // RFC 5987 percent-encoding for filename*.
    let encoded: String = filename
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => String::from(b as char),
            _ => format!("%{b:02X}"),
        })
        .collect();

    format!("{disposition}; filename=\"{ascii_name}\"; filename*=UTF-8''{encoded}")
}
