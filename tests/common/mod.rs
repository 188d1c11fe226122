//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::http::HeaderMap;
use axum::Router;
use h1_upstream::config::ProxyConfig;
use h1_upstream::http::HttpServer;
use h1_upstream::lifecycle::Shutdown;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start the proxy on an ephemeral port in front of `backend`.
pub async fn start_proxy(backend: SocketAddr, tweak: impl FnOnce(&mut ProxyConfig)) -> TestProxy {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.backend.address = backend.to_string();
    config.observability.metrics_enabled = false;
    tweak(&mut config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(config).with_drain_timeout(Duration::from_secs(5));
    let server_shutdown = shutdown.clone();
    let handle = tokio::spawn(async move {
        server.run(listener, None, server_shutdown).await.unwrap();
    });

    TestProxy {
        addr,
        shutdown,
        handle,
    }
}

/// An axum backend echoing the method, path and request id it received.
/// It announces itself as `Server: backend-under-test`.
pub async fn start_axum_backend() -> SocketAddr {
    async fn echo(method: axum::http::Method, uri: axum::http::Uri, headers: HeaderMap) -> (HeaderMap, String) {
        let request_id = headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let mut out = HeaderMap::new();
        out.insert("server", "backend-under-test".parse().unwrap());
        (out, format!("{} {} rid={}", method, uri.path(), request_id))
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(echo);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// A raw TCP backend. `handler` gets the request head and the socket.
pub async fn start_raw_backend<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(String, TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = std::sync::Arc::new(handler);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let head = read_head(&mut socket).await;
                        handler(head, socket).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// A backend that answers every request with `response` and closes.
pub async fn start_fixed_backend(response: &'static str) -> SocketAddr {
    start_raw_backend(move |_head, mut socket| async move {
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    })
    .await
}

/// A port nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Read up to and including the blank line ending a request head.
pub async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match socket.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => break,
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Send raw bytes to the proxy and read until it closes the connection.
pub async fn raw_exchange(proxy: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut out))
        .await
        .expect("proxy did not close the connection")
        .unwrap();
    String::from_utf8_lossy(&out).into_owned()
}
