//! Incremental HTTP/1.x response parser for backend connections.
//!
//! # Responsibilities
//! - Parse the status line and headers once they are complete
//! - Decide how the body is delimited (RFC 9112 section 6.3)
//! - Stream body fragments to a [`ResponseSink`]
//! - Skip interim 1xx responses

use hyper::Version;

use crate::http::body::{self, ChunkedDecoder};
use crate::http::headers::Headers;
use crate::http::ParseError;

/// Largest response head accepted from a backend.
pub const MAX_RESPONSE_HEAD: usize = 64 * 1024;

const MAX_RESPONSE_HEADERS: usize = 128;

/// How the backend delimits the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// No body follows the head.
    Empty,
    /// Exactly this many bytes follow.
    Length(u64),
    /// Chunked transfer coding.
    Chunked,
    /// The body runs until the backend closes the connection.
    UntilEof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub version: Version,
    pub headers: Headers,
    pub body: BodyKind,
}

/// Receiver of parsed response events.
pub trait ResponseSink {
    fn on_headers_complete(&mut self, head: ResponseHead);
    fn on_body(&mut self, data: &[u8]);
    fn on_message_complete(&mut self);
}

#[derive(Debug, Clone, Default)]
enum State {
    #[default]
    Head,
    Length(u64),
    Chunked(ChunkedDecoder),
    UntilEof,
    Done,
}

enum Step {
    Blocked(usize),
    Next(usize, State),
}

/// Parser for a single response. Bytes after the message are ignored.
#[derive(Debug, Clone, Default)]
pub struct ResponseParser {
    state: State,
    head_request: bool,
}

impl ResponseParser {
    /// `head_request` marks a response to HEAD, which never carries a body.
    pub fn new(head_request: bool) -> Self {
        Self {
            state: State::Head,
            head_request,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Feed backend bytes; returns the number consumed.
    pub fn feed(&mut self, buf: &[u8], sink: &mut dyn ResponseSink) -> Result<usize, ParseError> {
        let head_request = self.head_request;
        let mut pos = 0;
        loop {
            let rest = &buf[pos..];
            let step = match &mut self.state {
                State::Head => parse_head(rest, head_request, sink)?,
                State::Length(remaining) => {
                    let n = (*remaining).min(rest.len() as u64) as usize;
                    if n > 0 {
                        sink.on_body(&rest[..n]);
                    }
                    let left = *remaining - n as u64;
                    if left == 0 {
                        sink.on_message_complete();
                        Step::Next(n, State::Done)
                    } else {
                        *remaining = left;
                        Step::Blocked(n)
                    }
                }
                State::Chunked(decoder) => {
                    let decoded = decoder.decode(rest, |data| sink.on_body(data))?;
                    if decoded.done {
                        sink.on_message_complete();
                        Step::Next(decoded.consumed, State::Done)
                    } else {
                        Step::Blocked(decoded.consumed)
                    }
                }
                State::UntilEof => {
                    if !rest.is_empty() {
                        sink.on_body(rest);
                    }
                    Step::Blocked(rest.len())
                }
                State::Done => Step::Blocked(0),
            };
            match step {
                Step::Blocked(n) => return Ok(pos + n),
                Step::Next(n, next) => {
                    pos += n;
                    self.state = next;
                }
            }
        }
    }
}

fn parse_head(
    buf: &[u8],
    head_request: bool,
    sink: &mut dyn ResponseSink,
) -> Result<Step, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut res = httparse::Response::new(&mut headers);

    let head_len = match res.parse(buf).map_err(ParseError::Head)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => {
            if buf.len() > MAX_RESPONSE_HEAD {
                return Err(ParseError::HeadTooLarge {
                    limit: MAX_RESPONSE_HEAD,
                });
            }
            return Ok(Step::Blocked(0));
        }
    };

    let status = res.code.unwrap_or(502);
    if status == 101 {
        return Err(ParseError::UpgradeUnsupported);
    }
    if (100..200).contains(&status) {
        // Interim response; the final one follows.
        return Ok(Step::Next(head_len, State::Head));
    }

    let kind = body_kind(status, head_request, res.headers)?;
    let head = ResponseHead {
        status,
        version: match res.version {
            Some(0) => Version::HTTP_10,
            _ => Version::HTTP_11,
        },
        headers: res
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).into_owned(),
                )
            })
            .collect(),
        body: kind,
    };
    sink.on_headers_complete(head);

    let next = match kind {
        BodyKind::Empty => {
            sink.on_message_complete();
            State::Done
        }
        BodyKind::Length(n) => State::Length(n),
        BodyKind::Chunked => State::Chunked(ChunkedDecoder::new()),
        BodyKind::UntilEof => State::UntilEof,
    };
    Ok(Step::Next(head_len, next))
}

fn body_kind(
    status: u16,
    head_request: bool,
    headers: &[httparse::Header<'_>],
) -> Result<BodyKind, ParseError> {
    if head_request || status == 204 || status == 304 {
        return Ok(BodyKind::Empty);
    }

    let mut transfer_encoding: Option<&[u8]> = None;
    let mut length: Option<u64> = None;
    for header in headers {
        if header.name.eq_ignore_ascii_case("transfer-encoding") {
            transfer_encoding = Some(header.value);
        } else if header.name.eq_ignore_ascii_case("content-length") {
            let n = body::parse_content_length(header.value)?;
            if length.is_some_and(|prev| prev != n) {
                return Err(ParseError::InvalidContentLength);
            }
            length = Some(n);
        }
    }

    if let Some(value) = transfer_encoding {
        return Ok(if body::final_coding_is_chunked(value) {
            BodyKind::Chunked
        } else {
            BodyKind::UntilEof
        });
    }
    Ok(match length {
        Some(0) => BodyKind::Empty,
        Some(n) => BodyKind::Length(n),
        None => BodyKind::UntilEof,
    })
}
