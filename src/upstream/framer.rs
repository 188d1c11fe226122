//! Writes backend responses onto the client connection as HTTP/1.1.
//!
//! # Responsibilities
//! - Status line always `HTTP/1.1`, whatever the backend spoke
//! - Drop connection-scoped headers and rewrite `Server`
//! - Re-frame the body as chunks when the response is chunked or would
//!   otherwise only end at connection close
//! - Propagate the client's `Connection: close`
//! - Generate error replies

use std::fmt::Write as _;

use bytes::BytesMut;

use crate::downstream::{Exchange, MessageState, ResponseHandler};
use crate::http::body::{self, LAST_CHUNK};
use crate::http::headers;
use crate::http::response::BodyKind;
use crate::http::status;
use crate::net::connection::ClientBuffer;
use crate::observability::metrics;
use crate::upstream::UpstreamSettings;

pub struct ResponseFramer<'a> {
    client: &'a mut ClientBuffer,
    settings: &'a UpstreamSettings,
}

impl<'a> ResponseFramer<'a> {
    pub fn new(client: &'a mut ClientBuffer, settings: &'a UpstreamSettings) -> Self {
        Self { client, settings }
    }

    /// Answer `exchange` with a generated error page and complete its response.
    pub fn error_reply(&mut self, exchange: &mut Exchange, status: u16) {
        tracing::warn!(
            exchange_id = %exchange.id(),
            request_id = %exchange.request_id(),
            status,
            "Sending error reply"
        );
        write_error_page(
            self.client,
            self.settings,
            status,
            exchange.request_connection_close(),
        );
        exchange.set_response_status(status);
        exchange.set_response_state(MessageState::MsgComplete);
    }
}

/// Write a complete error response. With `close` the connection is closed
/// after it is flushed.
pub fn write_error_page(
    client: &mut ClientBuffer,
    settings: &UpstreamSettings,
    status: u16,
    close: bool,
) {
    let html = status::error_html(status, &settings.server_name, settings.port);
    let mut out = BytesMut::with_capacity(256 + html.len());
    // Writing into a BytesMut cannot fail.
    let _ = write!(
        out,
        "HTTP/1.1 {}\r\nServer: {}\r\nContent-Length: {}\r\nContent-Type: text/html; charset=UTF-8\r\n",
        status::status_line(status),
        settings.server_name,
        html.len(),
    );
    if close {
        out.extend_from_slice(b"Connection: close\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(html.as_bytes());
    client.write(&out);

    if close {
        client.set_close_after_write();
    }
    metrics::record_error_reply(status);
}

impl ResponseHandler for ResponseFramer<'_> {
    fn on_downstream_header_complete(&mut self, exchange: &mut Exchange) {
        let mut head = BytesMut::with_capacity(512);
        let _ = write!(
            head,
            "HTTP/1.1 {}\r\n",
            status::status_line(exchange.response_status())
        );
        for (name, value) in exchange.response_headers() {
            if headers::is_response_hop_by_hop(name) {
                continue;
            }
            if name.eq_ignore_ascii_case("server") {
                let _ = write!(head, "Server: {}\r\n", self.settings.server_name);
            } else {
                let _ = write!(head, "{}: {}\r\n", name, value);
            }
        }

        let close = exchange.request_connection_close();
        if exchange.response_body_kind() == Some(BodyKind::UntilEof) && !close {
            head.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
            exchange.set_response_chunked(true);
        }
        if close {
            head.extend_from_slice(b"Connection: close\r\n");
        }
        head.extend_from_slice(b"\r\n");

        tracing::debug!(
            exchange_id = %exchange.id(),
            status = exchange.response_status(),
            chunked = exchange.response_chunked(),
            "Response headers forwarded"
        );
        self.client.write(&head);
    }

    fn on_downstream_body(&mut self, exchange: &mut Exchange, data: &[u8]) {
        if exchange.response_chunked() {
            let mut chunk = BytesMut::with_capacity(data.len() + 16);
            body::encode_chunk(&mut chunk, data);
            self.client.write(&chunk);
        } else {
            self.client.write(data);
        }
    }

    fn on_downstream_body_complete(&mut self, exchange: &mut Exchange) {
        if exchange.response_chunked() {
            self.client.write(LAST_CHUNK);
        }
        if exchange.request_connection_close() {
            self.client.set_close_after_write();
        }
    }
}
