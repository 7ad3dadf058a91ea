//! Redaction of sensitive values in plain-text bodies.

use bytes::Bytes;
use regex::bytes::Regex;
use tapwire_protocols::HttpMessage;

use crate::entry::Entry;

pub const REDACTED: &[u8] = b"[REDACTED]";

/// Replaces every pattern match in `text/plain` bodies with `[REDACTED]`.
#[derive(Debug, Clone, Default)]
pub struct BodyMasker {
    patterns: Vec<Regex>,
}

impl BodyMasker {
    pub fn new(patterns: Vec<Regex>) -> Self {
        Self { patterns }
    }

    /// Compiles each pattern, failing on the first invalid one.
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn mask_entry(&self, entry: &mut Entry) {
        self.mask_message(&mut entry.request);
        self.mask_message(&mut entry.response);
    }

    pub fn mask_message(&self, message: &mut HttpMessage) {
        if self.is_empty() || message.media_type().as_deref() != Some("text/plain") {
            return;
        }
        let mut body = message.body.to_vec();
        for pattern in &self.patterns {
            body = pattern.replace_all(&body, REDACTED).into_owned();
        }
        message.body = Bytes::from(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tapwire_protocols::{Header, Role, StartLine};

    fn message(content_type: &str, body: &'static str) -> HttpMessage {
        HttpMessage {
            role: Role::Client,
            start_line: StartLine::Request {
                method: "POST".into(),
                target: "/login".into(),
                version: "HTTP/1.1".into(),
            },
            headers: vec![Header::new("Content-Type", content_type)],
            body: Bytes::from_static(body.as_bytes()),
            byte_size: 0,
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn masks_plain_text_matches() {
        let masker = BodyMasker::from_patterns(&[r"password=\w+", r"\d{4}-\d{4}"]).unwrap();
        let mut msg = message("text/plain; charset=utf-8", "user=a password=hunter2 card 1234-5678");
        masker.mask_message(&mut msg);
        assert_eq!(&msg.body[..], b"user=a [REDACTED] card [REDACTED]");
    }

    #[test]
    fn leaves_other_media_types_alone() {
        let masker = BodyMasker::from_patterns(&["secret"]).unwrap();
        let mut msg = message("application/json", r#"{"k":"secret"}"#);
        masker.mask_message(&mut msg);
        assert_eq!(&msg.body[..], br#"{"k":"secret"}"#);
    }

    #[test]
    fn rejects_invalid_pattern() {
        assert!(BodyMasker::from_patterns(&["(unclosed"]).is_err());
    }
}
