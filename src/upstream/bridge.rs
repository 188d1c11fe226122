//! The upstream bridge: one per client connection.
//!
//! Owns the request parser, the pipeline queue and the client buffer, and
//! reacts to backend events for the exchanges it created.

use crate::downstream::{
    BackendConnector, BackendEvent, Exchange, ExchangeId, MessageState, ResponseHandler,
};
use crate::http::tokenizer::Outcome;
use crate::net::connection::ClientBuffer;
use crate::observability::metrics;
use crate::upstream::framer::{self, ResponseFramer};
use crate::upstream::parser::RequestParser;
use crate::upstream::queue::PipelineQueue;
use crate::upstream::{UpstreamError, UpstreamSettings};

pub struct HttpUpstream {
    client: ClientBuffer,
    parser: RequestParser,
    queue: PipelineQueue,
    connector: Box<dyn BackendConnector>,
    settings: UpstreamSettings,
}

impl HttpUpstream {
    pub fn new(connector: Box<dyn BackendConnector>, settings: UpstreamSettings) -> Self {
        Self {
            client: ClientBuffer::new(),
            parser: RequestParser::new(settings.limits),
            queue: PipelineQueue::new(),
            connector,
            settings,
        }
    }

    pub fn client(&self) -> &ClientBuffer {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut ClientBuffer {
        &mut self.client
    }

    pub fn queue(&self) -> &PipelineQueue {
        &self.queue
    }

    /// Exchanges parsed but not yet answered.
    pub fn pending_exchanges(&self) -> usize {
        self.queue.len()
    }

    /// No exchange in flight and no partial request buffered.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.parser.at_message_boundary() && self.client.input().is_empty()
    }

    /// Parse buffered client input.
    ///
    /// Pauses client reads once `max_pipeline_depth` exchanges are queued, and
    /// for good after a request that asked to close the connection.
    pub fn on_read(&mut self) -> Result<(), UpstreamError> {
        if !self.client.read_enabled() {
            return Ok(());
        }
        if self.parser.close_requested() && self.parser.at_message_boundary() {
            // Nothing after a close-requesting request is parsed.
            self.client.disable_read();
            return Ok(());
        }
        loop {
            let feed = self
                .parser
                .feed(self.client.input(), &mut self.queue, self.connector.as_mut());
            self.client.drain_input(feed.consumed);

            match feed.outcome {
                Outcome::NeedMore => return Ok(()),
                Outcome::Stop => {
                    if self.parser.close_requested() {
                        self.client.disable_read();
                        return Ok(());
                    }
                    if self.queue.len() >= self.settings.max_pipeline_depth {
                        self.client.disable_read();
                        return Ok(());
                    }
                    if self.client.input().is_empty() {
                        return Ok(());
                    }
                }
                Outcome::Error(err) => {
                    tracing::warn!(error = %err, "Malformed client request");
                    return Err(UpstreamError::HttpParse(err));
                }
            }
        }
    }

    /// Re-enable client reads and parse whatever is already buffered.
    pub fn resume_read(&mut self) -> Result<(), UpstreamError> {
        self.client.enable_read();
        self.on_read()
    }

    /// Tell the client why its connection is being closed, if no response
    /// is owed to it.
    pub fn on_parse_failure(&mut self) {
        if self.queue.is_empty() {
            framer::write_error_page(&mut self.client, &self.settings, 400, true);
        }
    }

    /// Handle one event from the backend connection of exchange `id`.
    pub fn on_backend_event(
        &mut self,
        id: ExchangeId,
        event: BackendEvent,
    ) -> Result<(), UpstreamError> {
        let Some(front) = self.queue.front().map(Exchange::id) else {
            tracing::trace!(exchange_id = %id, "Event for retired exchange ignored");
            return Ok(());
        };

        if id != front {
            // Not its turn yet: hold the event until it reaches the front.
            match self.queue.get_mut(id) {
                Some(exchange) => match event {
                    BackendEvent::Connected => {
                        tracing::debug!(exchange_id = %id, "Backend connected");
                    }
                    BackendEvent::Data(bytes) => {
                        exchange.buffer_backend_data(&bytes);
                        if exchange.buffered_backend_len() >= self.settings.max_buffered_response_bytes {
                            exchange.pause_backend();
                        }
                    }
                    terminal => exchange.defer_event(terminal),
                },
                None => {
                    tracing::trace!(exchange_id = %id, "Event for retired exchange ignored");
                }
            }
            return Ok(());
        }

        let retired = match event {
            BackendEvent::Connected => {
                tracing::debug!(exchange_id = %id, "Backend connected");
                false
            }
            BackendEvent::Data(bytes) => {
                if let Some(exchange) = self.queue.front_mut() {
                    exchange.buffer_backend_data(&bytes);
                }
                self.process_front_data()?
            }
            terminal => self.process_front_terminal(terminal)?,
        };

        if retired {
            self.after_retirement()?;
        }
        Ok(())
    }

    /// Parse the front exchange's buffered backend bytes.
    /// Returns true if the exchange was retired.
    fn process_front_data(&mut self) -> Result<bool, UpstreamError> {
        let Some(exchange) = self.queue.front_mut() else {
            return Ok(false);
        };
        if !exchange.has_buffered_backend_data() {
            return Ok(false);
        }
        let id = exchange.id();
        let mut framer = ResponseFramer::new(&mut self.client, &self.settings);

        match exchange.parse_response(&mut framer) {
            Ok(()) => {
                if exchange.response_state() != MessageState::MsgComplete {
                    return Ok(false);
                }
            }
            Err(err) => match exchange.response_state() {
                MessageState::HeaderComplete => {
                    tracing::error!(
                        exchange_id = %id,
                        error = %err,
                        "Backend response corrupted after headers were forwarded"
                    );
                    return Err(UpstreamError::ResponseCorrupted { id, source: err });
                }
                MessageState::Initial => {
                    tracing::warn!(exchange_id = %id, error = %err, "Unparsable backend response");
                    framer.error_reply(exchange, 502);
                }
                MessageState::MsgComplete => {}
            },
        }

        self.retire(id);
        Ok(true)
    }

    /// Apply an EOF, error or timeout to the front exchange. Always retires it.
    fn process_front_terminal(&mut self, event: BackendEvent) -> Result<bool, UpstreamError> {
        let Some(exchange) = self.queue.front_mut() else {
            return Ok(false);
        };
        let id = exchange.id();
        let state = exchange.response_state();
        let mut framer = ResponseFramer::new(&mut self.client, &self.settings);

        match event {
            BackendEvent::Eof => match state {
                MessageState::Initial => {
                    tracing::warn!(exchange_id = %id, "Backend closed before responding");
                    framer.error_reply(exchange, 502);
                }
                MessageState::HeaderComplete => {
                    tracing::debug!(exchange_id = %id, "Backend EOF ends response body");
                    framer.on_downstream_body_complete(exchange);
                    exchange.set_response_state(MessageState::MsgComplete);
                }
                MessageState::MsgComplete => {}
            },
            BackendEvent::Error(reason) => {
                tracing::warn!(exchange_id = %id, state = %state, error = %reason, "Backend error");
                if state == MessageState::Initial {
                    framer.error_reply(exchange, 502);
                }
            }
            BackendEvent::Timeout => {
                tracing::warn!(exchange_id = %id, state = %state, "Backend timeout");
                if state == MessageState::Initial {
                    framer.error_reply(exchange, 504);
                }
            }
            BackendEvent::Connected | BackendEvent::Data(_) => return Ok(false),
        }

        self.retire(id);
        Ok(true)
    }

    /// Replay what the new front received while it waited, then resume reads.
    fn after_retirement(&mut self) -> Result<(), UpstreamError> {
        while let Some(front) = self.queue.front_mut() {
            front.resume_backend();
            let deferred = front.take_deferred_event();
            let mut retired = self.process_front_data()?;
            if !retired {
                if let Some(event) = deferred {
                    retired = self.process_front_terminal(event)?;
                }
            }
            if !retired {
                break;
            }
        }
        self.resume_read()
    }

    fn retire(&mut self, id: ExchangeId) {
        let exchange = self.queue.retire(id);
        let elapsed = exchange.started().elapsed();
        metrics::record_exchange(exchange.response_status(), elapsed);
        tracing::info!(
            exchange_id = %id,
            request_id = %exchange.request_id(),
            method = %exchange.method(),
            path = %exchange.path(),
            status = exchange.response_status(),
            duration_ms = elapsed.as_millis() as u64,
            "Exchange completed"
        );
    }
}
