//! # Integration Test Infrastructure
//!
//! Real axum servers on ephemeral ports, peer stand-ins and configuration
//! helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use interconnect::broker::{
    BrokerLink, BrokerProvider, InMemoryBroker, LinkChannel, LinkConnection,
};
use interconnect::config::{BrokerConfig, ServiceConfig, ServiceKind};
use interconnect::web::{self, handlers, AppState};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Test server instance that manages a running web server for tests
#[derive(Debug)]
pub struct TestServer {
    pub base_url: String,
    handle: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
}

impl TestServer {
    /// Serve `app` on a free local port
    pub async fn start(app: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("test server failed");
        });

        Self {
            base_url: format!("http://{address}"),
            handle,
            shutdown_tx,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("test server did not stop")
            .expect("test server task panicked");
    }
}

/// The real peer service routes
pub fn peer_app() -> Router {
    Router::new().route("/data", get(handlers::peer::data))
}

/// A peer that answers only after `delay`
pub fn slow_peer_app(delay: Duration) -> Router {
    Router::new().route(
        "/data",
        get(move || async move {
            tokio::time::sleep(delay).await;
            "too late"
        }),
    )
}

/// A peer that answers with `size` bytes, announced or streamed
pub fn oversized_peer_app(size: usize, announce_length: bool) -> Router {
    Router::new().route(
        "/data",
        get(move || async move {
            let body = vec![b'x'; size];
            if announce_length {
                axum::body::Body::from(body)
            } else {
                let chunks = body
                    .chunks(1024)
                    .map(|chunk| Ok::<_, std::io::Error>(chunk.to_vec()))
                    .collect::<Vec<_>>();
                axum::body::Body::from_stream(futures::stream::iter(chunks))
            }
        }),
    )
}

/// A peer that always fails
pub fn failing_peer_app() -> Router {
    Router::new().route(
        "/data",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    )
}

/// URL of a local port nothing listens on
pub async fn unreachable_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{address}")
}

/// Service configuration over the in-memory broker and a given peer
pub fn test_config(kind: ServiceKind, peer_base_url: &str) -> ServiceConfig {
    let mut config = ServiceConfig::defaults_for(kind);
    config.service.environment = "test".to_string();
    config.web.host = "127.0.0.1".to_string();
    config.web.port = 0;
    config.broker = BrokerConfig::in_memory();
    config.peer.base_url = peer_base_url.to_string();
    config.peer.timeout_ms = 500;
    config
}

/// Start the web app of `config` backed by `broker`
pub async fn start_service(config: ServiceConfig, broker: &InMemoryBroker) -> TestServer {
    let state = AppState::new(config, BrokerProvider::InMemory(broker.clone())).unwrap();
    TestServer::start(web::create_app(Arc::new(state))).await
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Consume and acknowledge `count` payloads from `queue_name`
pub async fn take_payloads(broker: &InMemoryBroker, queue_name: &str, count: usize) -> Vec<String> {
    let connection = broker.open("memory://local").await.unwrap();
    let channel = connection.channel().await.unwrap();
    let mut stream = channel.consume(queue_name, "test-reader").await.unwrap();

    let mut payloads = Vec::with_capacity(count);
    while payloads.len() < count {
        let delivery = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("no delivery in time")
            .expect("stream ended")
            .unwrap();
        payloads.push(String::from_utf8(delivery.payload.clone()).unwrap());
        delivery.ack().await.unwrap();
    }

    drop(stream);
    connection.close().await.unwrap();
    payloads
}
