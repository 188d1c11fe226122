//! Byte-stream request parser: tokenizer callbacks turned into exchanges.

use hyper::Version;

use crate::downstream::{BackendConnector, Exchange, ExchangeId, MessageState};
use crate::http::tokenizer::{Feed, Flow, RequestSink, RequestTokenizer, TokenizerLimits};
use crate::upstream::queue::PipelineQueue;

#[derive(Debug)]
struct Cursor {
    /// Exchange receiving the message being parsed.
    current: Option<ExchangeId>,
    next_id: ExchangeId,
    /// The last request whose head completed asked to close the connection.
    close_requested: bool,
}

/// Per-connection request parser. The tokenizer state survives across reads.
#[derive(Debug)]
pub struct RequestParser {
    tokenizer: RequestTokenizer,
    cursor: Cursor,
}

impl RequestParser {
    pub fn new(limits: TokenizerLimits) -> Self {
        Self {
            tokenizer: RequestTokenizer::new(limits),
            cursor: Cursor {
                current: None,
                next_id: ExchangeId::new(1),
                close_requested: false,
            },
        }
    }

    /// Feed client bytes. New exchanges are pushed onto `queue` and their
    /// backend connections opened through `connector`.
    pub fn feed(
        &mut self,
        buf: &[u8],
        queue: &mut PipelineQueue,
        connector: &mut dyn BackendConnector,
    ) -> Feed {
        let mut sink = ExchangeSink {
            cursor: &mut self.cursor,
            queue,
            connector,
        };
        self.tokenizer.feed(buf, &mut sink)
    }

    pub fn at_message_boundary(&self) -> bool {
        self.tokenizer.at_message_boundary()
    }

    /// A parsed request demanded that the connection close after it.
    pub fn close_requested(&self) -> bool {
        self.cursor.close_requested
    }
}

struct ExchangeSink<'a> {
    cursor: &'a mut Cursor,
    queue: &'a mut PipelineQueue,
    connector: &'a mut dyn BackendConnector,
}

impl ExchangeSink<'_> {
    /// The exchange being parsed, unless it was already retired.
    fn exchange(&mut self) -> Option<&mut Exchange> {
        let id = self.cursor.current?;
        self.queue.get_mut(id)
    }
}

impl RequestSink for ExchangeSink<'_> {
    fn on_message_begin(&mut self) {
        let id = self.cursor.next_id;
        self.cursor.next_id = id.next();
        self.cursor.current = Some(id);
        self.queue.push_back(Exchange::new(id));
    }

    fn on_method(&mut self, data: &[u8]) {
        if let Some(exchange) = self.exchange() {
            exchange.append_method(data);
        }
    }

    fn on_uri(&mut self, data: &[u8]) {
        if let Some(exchange) = self.exchange() {
            exchange.append_path(data);
        }
    }

    fn on_headers_begin(&mut self, version: Version) {
        if let Some(exchange) = self.exchange() {
            exchange.set_request_version(version);
        }
    }

    fn on_header_name(&mut self, data: &[u8]) {
        if let Some(exchange) = self.exchange() {
            exchange.append_header_name(data);
        }
    }

    fn on_header_value(&mut self, data: &[u8]) {
        if let Some(exchange) = self.exchange() {
            exchange.append_header_value(data);
        }
    }

    fn on_headers_complete(&mut self) {
        let Some(id) = self.cursor.current else {
            return;
        };
        let Some(exchange) = self.queue.get_mut(id) else {
            return;
        };
        exchange.finish_request_headers();
        exchange.start_connection(&mut *self.connector);
        if exchange.request_connection_close() {
            self.cursor.close_requested = true;
        }
    }

    fn on_body(&mut self, data: &[u8]) {
        match self.exchange() {
            Some(exchange) => exchange.push_upload_data(data),
            None => tracing::trace!(len = data.len(), "Discarding body for retired exchange"),
        }
    }

    fn on_message_complete(&mut self) -> Flow {
        if let Some(exchange) = self.exchange() {
            exchange.end_upload_data();
            exchange.set_request_state(MessageState::MsgComplete);
        }
        Flow::Stop
    }
}
