//! Parsed HTTP message types.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Which side of the connection produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Request direction.
    Client,
    /// Response direction.
    Server,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

/// A single header line. Order and duplicates are preserved by keeping these
/// in a `Vec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StartLine {
    Request {
        method: String,
        target: String,
        version: String,
    },
    Response {
        version: String,
        status: u16,
        reason: String,
    },
}

/// One fully delineated HTTP request or response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpMessage {
    pub role: Role,
    pub start_line: StartLine,
    pub headers: Vec<Header>,
    #[serde(serialize_with = "serialize_body")]
    pub body: Bytes,
    /// Bytes consumed from the stream, head and framing included.
    pub byte_size: usize,
    /// When the first byte of the message was observed.
    pub started_at: DateTime<Utc>,
    /// When the last byte of the message was observed.
    pub completed_at: DateTime<Utc>,
}

impl HttpMessage {
    /// First value of the named header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Every value of the named header, in arrival order.
    pub fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn method(&self) -> Option<&str> {
        match &self.start_line {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match &self.start_line {
            StartLine::Request { target, .. } => Some(target),
            StartLine::Response { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match &self.start_line {
            StartLine::Response { status, .. } => Some(*status),
            StartLine::Request { .. } => None,
        }
    }

    /// `1xx` responses precede the final response and are never paired.
    pub fn is_interim(&self) -> bool {
        matches!(self.status(), Some(code) if (100..200).contains(&code))
    }

    /// Media type of the body without parameters, lowercased.
    pub fn media_type(&self) -> Option<String> {
        self.header("content-type").map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }
}

/// Bodies are emitted as text when they are valid UTF-8 and hex otherwise.
fn serialize_body<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    match std::str::from_utf8(body) {
        Ok(text) => serializer.serialize_str(text),
        Err(_) => serializer.serialize_str(&hex::encode(body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(headers: Vec<Header>, body: &'static [u8]) -> HttpMessage {
        HttpMessage {
            role: Role::Server,
            start_line: StartLine::Response {
                version: "HTTP/1.1".into(),
                status: 200,
                reason: "OK".into(),
            },
            headers,
            body: Bytes::from_static(body),
            byte_size: 0,
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let msg = response(
            vec![
                Header::new("Set-Cookie", "a=1"),
                Header::new("content-type", "text/plain; charset=utf-8"),
                Header::new("set-cookie", "b=2"),
            ],
            b"",
        );
        assert_eq!(msg.header("SET-COOKIE"), Some("a=1"));
        assert_eq!(
            msg.headers_named("set-cookie").collect::<Vec<_>>(),
            vec!["a=1", "b=2"]
        );
        assert_eq!(msg.media_type().as_deref(), Some("text/plain"));
        assert_eq!(msg.status(), Some(200));
        assert!(msg.method().is_none());
    }

    #[test]
    fn header_value_outlives_the_lookup_name() {
        let msg = response(vec![Header::new("Content-Type", "text/html")], b"");
        let value = {
            let name = String::from("content-type");
            msg.header(&name)
        };
        assert_eq!(value, Some("text/html"));
    }

    #[test]
    fn binary_body_serializes_as_hex() {
        let msg = response(vec![], &[0xff, 0x00]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["body"], "ff00");
        assert_eq!(json["start_line"]["kind"], "response");
    }
}
