//! One client request paired with one backend response.
//!
//! # Responsibilities
//! - Accumulate the request head from tokenizer fragments
//! - Forward the request head and body to the backend link
//! - Parse backend bytes and hand the response to a [`ResponseHandler`]
//! - Keep request and response progress monotonic

use std::fmt::Write as _;
use std::mem;
use std::time::Instant;

use bytes::{Buf, Bytes, BytesMut};
use hyper::Version;
use uuid::Uuid;

use crate::downstream::link::{BackendConnector, BackendEvent, BackendLink, ExchangeId};
use crate::http::body::{self, LAST_CHUNK};
use crate::http::headers::{self, Headers, X_REQUEST_ID};
use crate::http::response::{BodyKind, ResponseHead, ResponseParser, ResponseSink};
use crate::http::ParseError;

/// Progress of one side of an exchange. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageState {
    Initial,
    HeaderComplete,
    MsgComplete,
}

impl std::fmt::Display for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageState::Initial => "initial",
            MessageState::HeaderComplete => "header_complete",
            MessageState::MsgComplete => "msg_complete",
        };
        f.write_str(name)
    }
}

/// Receives the backend response as the exchange parses it.
pub trait ResponseHandler {
    fn on_downstream_header_complete(&mut self, exchange: &mut Exchange);
    fn on_downstream_body(&mut self, exchange: &mut Exchange, data: &[u8]);
    fn on_downstream_body_complete(&mut self, exchange: &mut Exchange);
}

#[derive(Debug)]
struct RequestSide {
    method: String,
    path: String,
    version: Version,
    headers: Headers,
    state: MessageState,
    connection_close: bool,
    chunked: bool,
    /// The previous header callback delivered a name fragment.
    in_header_name: bool,
}

#[derive(Debug)]
struct ResponseSide {
    status: u16,
    headers: Headers,
    state: MessageState,
    chunked: bool,
    body: Option<BodyKind>,
}

pub struct Exchange {
    id: ExchangeId,
    request_id: String,
    started: Instant,
    request: RequestSide,
    response: ResponseSide,
    response_parser: ResponseParser,
    link: Option<Box<dyn BackendLink>>,
    backend_in: BytesMut,
    backend_paused: bool,
    deferred: Option<BackendEvent>,
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.id)
            .field("request_id", &self.request_id)
            .field("request", &self.request)
            .field("response", &self.response)
            .field("linked", &self.link.is_some())
            .field("buffered", &self.backend_in.len())
            .field("backend_paused", &self.backend_paused)
            .field("deferred", &self.deferred)
            .finish()
    }
}

impl Exchange {
    pub fn new(id: ExchangeId) -> Self {
        tracing::debug!(exchange_id = %id, "Exchange created");
        Self {
            id,
            request_id: Uuid::new_v4().to_string(),
            started: Instant::now(),
            request: RequestSide {
                method: String::new(),
                path: String::new(),
                version: Version::HTTP_11,
                headers: Headers::new(),
                state: MessageState::Initial,
                connection_close: false,
                chunked: false,
                in_header_name: false,
            },
            response: ResponseSide {
                status: 0,
                headers: Headers::new(),
                state: MessageState::Initial,
                chunked: false,
                body: None,
            },
            response_parser: ResponseParser::default(),
            link: None,
            backend_in: BytesMut::new(),
            backend_paused: false,
            deferred: None,
        }
    }

    pub fn id(&self) -> ExchangeId {
        self.id
    }

    /// Correlation id: the client's `X-Request-ID` or a generated UUID.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    // ----- request side -----

    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn path(&self) -> &str {
        &self.request.path
    }

    pub fn request_version(&self) -> Version {
        self.request.version
    }

    pub fn request_headers(&self) -> &Headers {
        &self.request.headers
    }

    pub fn request_state(&self) -> MessageState {
        self.request.state
    }

    pub fn set_request_state(&mut self, state: MessageState) {
        advance(&mut self.request.state, state, self.id, "request");
    }

    /// The client asked for the connection to close after this response.
    pub fn request_connection_close(&self) -> bool {
        self.request.connection_close
    }

    pub fn append_method(&mut self, data: &[u8]) {
        self.request.method.push_str(&String::from_utf8_lossy(data));
    }

    pub fn append_path(&mut self, data: &[u8]) {
        self.request.path.push_str(&String::from_utf8_lossy(data));
    }

    pub fn set_request_version(&mut self, version: Version) {
        self.request.version = version;
        if version < Version::HTTP_11 {
            self.request.connection_close = true;
        }
    }

    pub fn append_header_name(&mut self, data: &[u8]) {
        let fragment = String::from_utf8_lossy(data);
        if self.request.in_header_name {
            if let Some((name, _)) = self.request.headers.last_mut() {
                name.push_str(&fragment);
                return;
            }
        }
        self.request
            .headers
            .push((fragment.into_owned(), String::new()));
        self.request.in_header_name = true;
    }

    pub fn append_header_value(&mut self, data: &[u8]) {
        if let Some((_, value)) = self.request.headers.last_mut() {
            value.push_str(&String::from_utf8_lossy(data));
        }
        self.request.in_header_name = false;
    }

    /// Derive connection and framing flags once the head is complete.
    pub fn finish_request_headers(&mut self) {
        self.request.in_header_name = false;

        if headers::values(&self.request.headers, "connection")
            .any(|value| headers::has_token(value, "close"))
        {
            self.request.connection_close = true;
        }
        self.request.chunked = headers::values(&self.request.headers, "transfer-encoding")
            .last()
            .is_some_and(|value| body::final_coding_is_chunked(value.as_bytes()));
        if let Some(id) = headers::values(&self.request.headers, X_REQUEST_ID).next() {
            self.request_id = id.to_string();
        }

        let head_request = self.request.method.eq_ignore_ascii_case("HEAD");
        self.response_parser = ResponseParser::new(head_request);
        self.set_request_state(MessageState::HeaderComplete);
    }

    /// Open the backend connection and send the request head.
    pub fn start_connection(&mut self, connector: &mut dyn BackendConnector) {
        let mut head = BytesMut::with_capacity(256);
        // Writing into a BytesMut cannot fail.
        let _ = write!(head, "{} {} HTTP/1.1\r\n", self.request.method, self.request.path);

        let mut has_host = false;
        let mut has_request_id = false;
        for (name, value) in &self.request.headers {
            if headers::is_request_hop_by_hop(name) {
                continue;
            }
            has_host |= name.eq_ignore_ascii_case("host");
            has_request_id |= name.eq_ignore_ascii_case(X_REQUEST_ID);
            let _ = write!(head, "{}: {}\r\n", name, value);
        }
        if !has_host {
            let _ = write!(head, "Host: {}\r\n", connector.authority());
        }
        if !has_request_id {
            let _ = write!(head, "X-Request-ID: {}\r\n", self.request_id);
        }
        head.extend_from_slice(b"Connection: close\r\n\r\n");

        tracing::debug!(
            exchange_id = %self.id,
            request_id = %self.request_id,
            method = %self.request.method,
            path = %self.request.path,
            "Forwarding request"
        );

        let mut link = connector.connect(self.id);
        link.send(head.freeze());
        self.link = Some(link);
    }

    /// Forward a request body fragment, re-chunked if the client sent chunks.
    pub fn push_upload_data(&mut self, data: &[u8]) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if self.request.chunked {
            let mut chunk = BytesMut::with_capacity(data.len() + 16);
            body::encode_chunk(&mut chunk, data);
            if !chunk.is_empty() {
                link.send(chunk.freeze());
            }
        } else if !data.is_empty() {
            link.send(Bytes::copy_from_slice(data));
        }
    }

    /// Signal the end of the request body.
    pub fn end_upload_data(&mut self) {
        if self.request.chunked {
            if let Some(link) = self.link.as_mut() {
                link.send(Bytes::from_static(LAST_CHUNK));
            }
        }
    }

    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    // ----- response side -----

    pub fn response_status(&self) -> u16 {
        self.response.status
    }

    /// Record the status of a reply the proxy generated itself.
    pub fn set_response_status(&mut self, status: u16) {
        self.response.status = status;
    }

    pub fn response_headers(&self) -> &Headers {
        &self.response.headers
    }

    pub fn response_state(&self) -> MessageState {
        self.response.state
    }

    pub fn set_response_state(&mut self, state: MessageState) {
        advance(&mut self.response.state, state, self.id, "response");
    }

    /// The body is written to the client as chunks.
    pub fn response_chunked(&self) -> bool {
        self.response.chunked
    }

    pub fn set_response_chunked(&mut self, chunked: bool) {
        self.response.chunked = chunked;
    }

    /// How the backend delimits its body, once the head is parsed.
    pub fn response_body_kind(&self) -> Option<BodyKind> {
        self.response.body
    }

    /// Queue backend bytes until this exchange is processed.
    pub fn buffer_backend_data(&mut self, data: &[u8]) {
        self.backend_in.extend_from_slice(data);
    }

    pub fn has_buffered_backend_data(&self) -> bool {
        !self.backend_in.is_empty()
    }

    pub fn buffered_backend_len(&self) -> usize {
        self.backend_in.len()
    }

    /// Stop reading the backend while its bytes cannot be forwarded.
    pub fn pause_backend(&mut self) {
        if self.backend_paused {
            return;
        }
        if let Some(link) = self.link.as_mut() {
            tracing::debug!(
                exchange_id = %self.id,
                buffered = self.backend_in.len(),
                "Pausing backend reads"
            );
            link.pause_reading();
            self.backend_paused = true;
        }
    }

    pub fn resume_backend(&mut self) {
        if !self.backend_paused {
            return;
        }
        if let Some(link) = self.link.as_mut() {
            link.resume_reading();
        }
        self.backend_paused = false;
    }

    /// Hold a terminal backend event until this exchange reaches the front.
    pub fn defer_event(&mut self, event: BackendEvent) {
        if self.deferred.is_none() {
            self.deferred = Some(event);
        }
    }

    pub fn take_deferred_event(&mut self) -> Option<BackendEvent> {
        self.deferred.take()
    }

    /// Run buffered backend bytes through the response parser.
    pub fn parse_response(&mut self, handler: &mut dyn ResponseHandler) -> Result<(), ParseError> {
        if self.backend_in.is_empty() {
            return Ok(());
        }
        let mut parser = mem::take(&mut self.response_parser);
        let mut input = mem::take(&mut self.backend_in);

        let result = parser.feed(
            &input,
            &mut DownstreamSink {
                exchange: &mut *self,
                handler,
            },
        );

        self.response_parser = parser;
        if self.response_parser.is_complete() {
            // Anything after the response is not ours to forward.
            input.clear();
        }
        self.backend_in = input;

        let consumed = result?;
        if !self.backend_in.is_empty() {
            self.backend_in.advance(consumed);
        }
        Ok(())
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        tracing::trace!(exchange_id = %self.id, "Exchange dropped");
    }
}

fn advance(current: &mut MessageState, next: MessageState, id: ExchangeId, side: &str) {
    if next < *current {
        tracing::warn!(
            exchange_id = %id,
            side,
            current = %current,
            attempted = %next,
            "Ignoring state regression"
        );
        return;
    }
    *current = next;
}

struct DownstreamSink<'a> {
    exchange: &'a mut Exchange,
    handler: &'a mut dyn ResponseHandler,
}

impl ResponseSink for DownstreamSink<'_> {
    fn on_headers_complete(&mut self, head: ResponseHead) {
        let response = &mut self.exchange.response;
        response.status = head.status;
        response.headers = head.headers;
        response.chunked = head.body == BodyKind::Chunked;
        response.body = Some(head.body);
        self.exchange.set_response_state(MessageState::HeaderComplete);
        self.handler.on_downstream_header_complete(self.exchange);
    }

    fn on_body(&mut self, data: &[u8]) {
        self.handler.on_downstream_body(self.exchange, data);
    }

    fn on_message_complete(&mut self) {
        self.handler.on_downstream_body_complete(self.exchange);
        self.exchange.set_response_state(MessageState::MsgComplete);
    }
}
