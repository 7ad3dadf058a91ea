//! Incremental HTTP/1.x parser for one direction of a connection.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::chunked::ChunkedDecoder;
use super::message::{Header, HttpMessage, Role, StartLine};

/// Maximum number of header lines accepted in one message.
const MAX_HEADERS: usize = 128;

/// Default cap on bytes buffered for a single incomplete message.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Errors that abort parsing for the remainder of a direction.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum HttpParseError {
    #[error("Invalid start line: {0}")]
    InvalidStartLine(String),
    #[error("Invalid header line: {0}")]
    InvalidHeader(String),
    #[error("Invalid Content-Length value {0:?}")]
    InvalidContentLength(String),
    #[error("Invalid chunk size")]
    InvalidChunkSize,
    #[error("Chunk data not followed by CRLF")]
    MalformedChunk,
    #[error("Message exceeds {limit} buffered bytes")]
    MessageTooLarge { limit: usize },
}

impl From<httparse::Error> for HttpParseError {
    fn from(err: httparse::Error) -> Self {
        match err {
            httparse::Error::HeaderName
            | httparse::Error::HeaderValue
            | httparse::Error::TooManyHeaders => HttpParseError::InvalidHeader(err.to_string()),
            _ => HttpParseError::InvalidStartLine(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length(usize),
    Chunked,
    UntilClose,
}

#[derive(Debug)]
struct Head {
    start_line: StartLine,
    headers: Vec<Header>,
    len: usize,
    framing: Framing,
}

/// Accumulates the bytes of one direction and delineates messages.
///
/// Feed chunks with [`feed`](Self::feed), then drain complete messages with
/// [`next_message`](Self::next_message) until it yields `None`. When the
/// direction closes, [`finish`](Self::finish) emits a close-delimited
/// response if one is pending.
#[derive(Debug)]
pub struct HttpStreamParser {
    role: Role,
    buf: BytesMut,
    head: Option<Head>,
    chunked: ChunkedDecoder,
    started_at: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    max_message_bytes: usize,
}

impl HttpStreamParser {
    pub fn new(role: Role) -> Self {
        Self::with_limit(role, DEFAULT_MAX_MESSAGE_BYTES)
    }

    pub fn with_limit(role: Role, max_message_bytes: usize) -> Self {
        Self {
            role,
            buf: BytesMut::new(),
            head: None,
            chunked: ChunkedDecoder::with_limit(max_message_bytes),
            started_at: None,
            last_seen: None,
            max_message_bytes,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Bytes buffered for the message currently being delineated.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Appends bytes observed at `observed_at`.
    pub fn feed(&mut self, data: &[u8], observed_at: DateTime<Utc>) {
        if data.is_empty() {
            return;
        }
        if self.buf.is_empty() {
            self.started_at = Some(observed_at);
        }
        self.last_seen = Some(observed_at);
        self.buf.extend_from_slice(data);
    }

    /// Attempts to delineate the next message from the buffered bytes.
    ///
    /// `Ok(None)` means more bytes are needed.
    pub fn next_message(&mut self) -> Result<Option<HttpMessage>, HttpParseError> {
        if self.head.is_none() {
            self.skip_empty_lines();
            if self.buf.is_empty() {
                return Ok(None);
            }
            match self.parse_head()? {
                Some(head) => self.head = Some(head),
                None => {
                    self.check_limit(self.buf.len())?;
                    return Ok(None);
                }
            }
        }

        let Some(head) = self.head.as_ref() else {
            return Ok(None);
        };
        let head_len = head.len;

        let (body, consumed) = match head.framing {
            Framing::Length(len) => {
                let total = head_len.saturating_add(len);
                self.check_limit(total)?;
                if self.buf.len() < total {
                    return Ok(None);
                }
                (Bytes::copy_from_slice(&self.buf[head_len..total]), total)
            }
            Framing::Chunked => match self.chunked.decode(&self.buf[head_len..])? {
                Some((body, used)) => (body, head_len + used),
                None => {
                    self.check_limit(self.buf.len())?;
                    return Ok(None);
                }
            },
            Framing::UntilClose => {
                self.check_limit(self.buf.len())?;
                return Ok(None);
            }
        };

        Ok(self.complete(body, consumed))
    }

    /// Called once the direction is closed. Emits a response whose body is
    /// delimited by connection close; any other incomplete message is
    /// discarded.
    pub fn finish(&mut self) -> Option<HttpMessage> {
        let head = self.head.as_ref()?;
        if head.framing != Framing::UntilClose {
            return None;
        }
        let head_len = head.len;
        let consumed = self.buf.len();
        let body = Bytes::copy_from_slice(&self.buf[head_len..]);
        self.complete(body, consumed)
    }

    fn complete(&mut self, body: Bytes, consumed: usize) -> Option<HttpMessage> {
        let head = self.head.take()?;
        self.chunked = ChunkedDecoder::with_limit(self.max_message_bytes);
        let _raw = self.buf.split_to(consumed);

        let completed_at = self.last_seen.unwrap_or_else(Utc::now);
        let started_at = self.started_at.unwrap_or(completed_at);
        // Whatever remains arrived together with the tail of this message.
        self.started_at = if self.buf.is_empty() {
            None
        } else {
            Some(completed_at)
        };

        Some(HttpMessage {
            role: self.role,
            start_line: head.start_line,
            headers: head.headers,
            body,
            byte_size: consumed,
            started_at,
            completed_at,
        })
    }

    fn check_limit(&self, needed: usize) -> Result<(), HttpParseError> {
        if needed > self.max_message_bytes {
            return Err(HttpParseError::MessageTooLarge {
                limit: self.max_message_bytes,
            });
        }
        Ok(())
    }

    /// Stray CRLFs between pipelined messages are ignored.
    fn skip_empty_lines(&mut self) {
        let skip = self
            .buf
            .iter()
            .take_while(|&&b| b == b'\r' || b == b'\n')
            .count();
        if skip > 0 {
            let _ = self.buf.split_to(skip);
            if self.buf.is_empty() {
                self.started_at = None;
            }
        }
    }

    fn parse_head(&self) -> Result<Option<Head>, HttpParseError> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        match self.role {
            Role::Client => {
                let mut req = httparse::Request::new(&mut slots);
                let len = match req.parse(&self.buf)? {
                    httparse::Status::Complete(len) => len,
                    httparse::Status::Partial => return Ok(None),
                };
                let headers = collect_headers(req.headers);
                let framing = framing(None, &headers)?;
                Ok(Some(Head {
                    start_line: StartLine::Request {
                        method: req.method.unwrap_or_default().to_string(),
                        target: req.path.unwrap_or_default().to_string(),
                        version: format!("HTTP/1.{}", req.version.unwrap_or(1)),
                    },
                    headers,
                    len,
                    framing,
                }))
            }
            Role::Server => {
                let mut res = httparse::Response::new(&mut slots);
                let len = match res.parse(&self.buf)? {
                    httparse::Status::Complete(len) => len,
                    httparse::Status::Partial => return Ok(None),
                };
                let status = res.code.unwrap_or_default();
                let headers = collect_headers(res.headers);
                let framing = framing(Some(status), &headers)?;
                Ok(Some(Head {
                    start_line: StartLine::Response {
                        version: format!("HTTP/1.{}", res.version.unwrap_or(1)),
                        status,
                        reason: res.reason.unwrap_or_default().to_string(),
                    },
                    headers,
                    len,
                    framing,
                }))
            }
        }
    }
}

fn collect_headers(parsed: &[httparse::Header<'_>]) -> Vec<Header> {
    parsed
        .iter()
        .map(|h| Header::new(h.name, String::from_utf8_lossy(h.value)))
        .collect()
}

/// Declared length wins over chunked; without either, requests carry no body
/// and responses run until the connection closes.
fn framing(status: Option<u16>, headers: &[Header]) -> Result<Framing, HttpParseError> {
    if let Some(value) = headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
        .map(|h| h.value.trim())
    {
        let len = value
            .parse::<usize>()
            .map_err(|_| HttpParseError::InvalidContentLength(value.to_string()))?;
        return Ok(Framing::Length(len));
    }

    let chunked = headers.iter().any(|h| {
        h.name.eq_ignore_ascii_case("transfer-encoding")
            && h.value.to_ascii_lowercase().contains("chunked")
    });
    if chunked {
        return Ok(Framing::Chunked);
    }

    match status {
        None => Ok(Framing::Length(0)),
        Some(code) if (100..200).contains(&code) || code == 204 || code == 304 => {
            Ok(Framing::Length(0))
        }
        Some(_) => Ok(Framing::UntilClose),
    }
}
