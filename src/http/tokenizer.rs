//! Incremental HTTP/1.x request tokenizer.
//!
//! # Responsibilities
//! - Consume client bytes as they arrive, never blocking
//! - Report request structure through [`RequestSink`] callbacks
//! - Frame request bodies (Content-Length or chunked)
//! - Stop at a message boundary when the sink asks for it
//!
//! # Design Decisions
//! - The head is parsed with `httparse` once it is complete; a partial head
//!   consumes nothing, so the caller keeps it buffered
//! - Body bytes are handed to the sink as they arrive, never accumulated
//! - After a syntax error the tokenizer is poisoned and keeps reporting it

use hyper::Version;

use crate::http::body::{self, ChunkedDecoder};
use crate::http::ParseError;

/// Upper bound for the number of request headers, whatever the config says.
pub const MAX_HEADERS: usize = 128;

/// Returned from [`RequestSink::on_message_complete`] to continue with the
/// next pipelined message or pause at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Receiver of structural request events.
///
/// Token callbacks may in principle deliver a token in several fragments;
/// implementations concatenate them.
pub trait RequestSink {
    fn on_message_begin(&mut self);
    fn on_method(&mut self, data: &[u8]);
    fn on_uri(&mut self, data: &[u8]);
    fn on_headers_begin(&mut self, version: Version);
    fn on_header_name(&mut self, data: &[u8]);
    fn on_header_value(&mut self, data: &[u8]);
    fn on_headers_complete(&mut self);
    fn on_body(&mut self, data: &[u8]);
    fn on_message_complete(&mut self) -> Flow;
}

/// How a [`RequestTokenizer::feed`] call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Everything usable was consumed; more bytes are needed.
    NeedMore,
    /// A message completed and the sink asked to pause.
    Stop,
    /// The input is not valid HTTP.
    Error(ParseError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub consumed: usize,
    pub outcome: Outcome,
}

/// Size limits applied to request heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenizerLimits {
    pub max_header_bytes: usize,
    pub max_headers: usize,
}

impl Default for TokenizerLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            max_headers: 100,
        }
    }
}

#[derive(Debug, Clone)]
enum BodyFraming {
    Length(u64),
    Chunked(ChunkedDecoder),
}

#[derive(Debug, Clone)]
enum State {
    Head,
    Body(BodyFraming),
}

enum Step {
    /// Consumed this many bytes and cannot go further with the input at hand.
    Blocked(usize),
    /// Head consumed; a body follows.
    Body(usize, BodyFraming),
    /// Consumed this many bytes and the message is complete.
    Complete(usize),
}

/// Connection-scoped request tokenizer. Its state persists across reads.
#[derive(Debug, Clone)]
pub struct RequestTokenizer {
    state: State,
    limits: TokenizerLimits,
    error: Option<ParseError>,
}

impl RequestTokenizer {
    pub fn new(limits: TokenizerLimits) -> Self {
        Self {
            state: State::Head,
            limits,
            error: None,
        }
    }

    /// True when no message is partially consumed.
    pub fn at_message_boundary(&self) -> bool {
        matches!(self.state, State::Head)
    }

    /// The error that poisoned this tokenizer, if any.
    pub fn error(&self) -> Option<&ParseError> {
        self.error.as_ref()
    }

    /// Feed buffered bytes. Returns how many were consumed and why it stopped.
    pub fn feed(&mut self, buf: &[u8], sink: &mut dyn RequestSink) -> Feed {
        if let Some(err) = &self.error {
            return Feed {
                consumed: 0,
                outcome: Outcome::Error(err.clone()),
            };
        }

        let mut pos = 0;
        loop {
            let step = match &mut self.state {
                State::Head => parse_head(&buf[pos..], &self.limits, sink),
                State::Body(framing) => framing.advance(&buf[pos..], sink),
            };
            match step {
                Ok(Step::Blocked(n)) => {
                    return Feed {
                        consumed: pos + n,
                        outcome: Outcome::NeedMore,
                    };
                }
                Ok(Step::Body(n, framing)) => {
                    pos += n;
                    self.state = State::Body(framing);
                }
                Ok(Step::Complete(n)) => {
                    pos += n;
                    self.state = State::Head;
                    if sink.on_message_complete() == Flow::Stop {
                        return Feed {
                            consumed: pos,
                            outcome: Outcome::Stop,
                        };
                    }
                }
                Err(err) => {
                    self.error = Some(err.clone());
                    return Feed {
                        consumed: pos,
                        outcome: Outcome::Error(err),
                    };
                }
            }
        }
    }
}

impl BodyFraming {
    fn advance(&mut self, buf: &[u8], sink: &mut dyn RequestSink) -> Result<Step, ParseError> {
        match self {
            BodyFraming::Length(remaining) => {
                let n = (*remaining).min(buf.len() as u64) as usize;
                if n > 0 {
                    sink.on_body(&buf[..n]);
                }
                *remaining -= n as u64;
                Ok(if *remaining == 0 {
                    Step::Complete(n)
                } else {
                    Step::Blocked(n)
                })
            }
            BodyFraming::Chunked(decoder) => {
                let decoded = decoder.decode(buf, |data| sink.on_body(data))?;
                Ok(if decoded.done {
                    Step::Complete(decoded.consumed)
                } else {
                    Step::Blocked(decoded.consumed)
                })
            }
        }
    }
}

fn parse_head(
    buf: &[u8],
    limits: &TokenizerLimits,
    sink: &mut dyn RequestSink,
) -> Result<Step, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let max_headers = limits.max_headers.clamp(1, MAX_HEADERS);
    let mut req = httparse::Request::new(&mut headers[..max_headers]);

    let head_len = match req.parse(buf).map_err(ParseError::Head)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => {
            if buf.len() > limits.max_header_bytes {
                return Err(ParseError::HeadTooLarge {
                    limit: limits.max_header_bytes,
                });
            }
            return Ok(Step::Blocked(0));
        }
    };
    if head_len > limits.max_header_bytes {
        return Err(ParseError::HeadTooLarge {
            limit: limits.max_header_bytes,
        });
    }

    let framing = request_framing(req.headers)?;
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    sink.on_message_begin();
    sink.on_method(req.method.unwrap_or_default().as_bytes());
    sink.on_uri(req.path.unwrap_or_default().as_bytes());
    sink.on_headers_begin(version);
    for header in req.headers.iter() {
        sink.on_header_name(header.name.as_bytes());
        sink.on_header_value(header.value);
    }
    sink.on_headers_complete();

    Ok(match framing {
        Some(framing) => Step::Body(head_len, framing),
        None => Step::Complete(head_len),
    })
}

/// Request body length rules: chunked wins, then Content-Length, else empty.
fn request_framing(headers: &[httparse::Header<'_>]) -> Result<Option<BodyFraming>, ParseError> {
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
        if body::final_coding_is_chunked(value) {
            return Ok(Some(BodyFraming::Chunked(ChunkedDecoder::new())));
        }
        return Err(ParseError::UnsupportedTransferEncoding(
            String::from_utf8_lossy(value).into_owned(),
        ));
    }

    Ok(match length {
        Some(n) if n > 0 => Some(BodyFraming::Length(n)),
        _ => None,
    })
}
