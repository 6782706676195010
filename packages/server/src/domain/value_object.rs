//! Value objects of the chat domain.

use std::fmt;

use charla_shared::time::timestamp_to_rfc3339;

use super::error::{ChatError, UsernameIssue};

/// Process-unique connection identity.
///
/// Allocated from a monotonically increasing counter, so ids are never reused
/// and ordering by id is ordering by accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unix timestamp in UTC milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn new(millis: i64) -> Self {
        Self(millis)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// RFC 3339 rendering used on the wire.
    pub fn to_rfc3339(&self) -> String {
        timestamp_to_rfc3339(self.0)
    }
}

/// A validated, sanitized display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(String);

impl Username {
    pub const MIN_CHARS: usize = 2;
    pub const MAX_CHARS: usize = 30;

    /// Trim and validate a requested display name.
    ///
    /// Accepts letters (accented included), digits, whitespace, `_` and `-`.
    /// Length is counted in characters after trimming.
    pub fn new(raw: &str) -> Result<Self, ChatError> {
        let trimmed = raw.trim();
        let len = trimmed.chars().count();
        if !(Self::MIN_CHARS..=Self::MAX_CHARS).contains(&len) {
            return Err(ChatError::UsernameInvalid(UsernameIssue::Length {
                min: Self::MIN_CHARS,
                max: Self::MAX_CHARS,
            }));
        }
        if !trimmed.chars().all(is_username_char) {
            return Err(ChatError::UsernameInvalid(UsernameIssue::Characters));
        }
        Ok(Self(sanitize_html(trimmed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_username_char(c: char) -> bool {
    c.is_alphabetic() || c.is_ascii_digit() || c.is_whitespace() || c == '_' || c == '-'
}

/// A validated, sanitized chat message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent(String);

impl MessageContent {
    pub const MIN_CHARS: usize = 1;
    pub const MAX_CHARS: usize = 500;

    /// Trim, length-check and HTML-escape a chat message body.
    pub fn new(raw: &str) -> Result<Self, ChatError> {
        let trimmed = raw.trim();
        let len = trimmed.chars().count();
        if len < Self::MIN_CHARS {
            return Err(ChatError::ContentTooShort);
        }
        if len > Self::MAX_CHARS {
            return Err(ChatError::ContentTooLong {
                max: Self::MAX_CHARS,
            });
        }
        Ok(Self(sanitize_html(trimmed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Escape `& < > " ' /` to HTML entities.
pub fn sanitize_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            other => out.push(other),
        }
    }
    out
}
