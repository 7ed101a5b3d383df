//! HTTP surface of the four web services over real sockets

mod common;

use std::time::Duration;

use common::{
    failing_peer_app, http_client, peer_app, slow_peer_app, start_service, take_payloads,
    test_config, unreachable_base_url, TestServer,
};
use interconnect::broker::InMemoryBroker;
use interconnect::config::ServiceKind;
use reqwest::StatusCode;
use validator::Validate;

async fn get(url: String) -> (StatusCode, String) {
    let response = http_client().get(url).send().await.unwrap();
    let status = response.status();
    (status, response.text().await.unwrap())
}

#[tokio::test]
async fn test_every_http_service_reports_health() {
    let broker = InMemoryBroker::new();
    for kind in [
        ServiceKind::Sync,
        ServiceKind::Peer,
        ServiceKind::Async,
        ServiceKind::Hybrid,
    ] {
        let service = start_service(test_config(kind, "http://127.0.0.1:9"), &broker).await;
        let (status, body) = get(service.url("/health")).await;
        assert_eq!(status, StatusCode::OK, "{kind}");
        assert_eq!(body, "ok");
        service.shutdown().await;
    }
}

#[tokio::test]
async fn test_peer_service_serves_greeting() {
    let broker = InMemoryBroker::new();
    let config = test_config(ServiceKind::Peer, "http://127.0.0.1:9");
    let service = start_service(config, &broker).await;

    let (status, body) = get(service.url("/data")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Hello from Service B (Sync)");

    service.shutdown().await;
}

#[tokio::test]
async fn test_routes_belong_to_their_service() {
    let broker = InMemoryBroker::new();
    let config = test_config(ServiceKind::Hybrid, "http://127.0.0.1:9");
    let service = start_service(config, &broker).await;

    let (status, _) = get(service.url("/sync")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get(service.url("/async")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    service.shutdown().await;
}

#[tokio::test]
async fn test_sync_relays_peer_body() {
    let broker = InMemoryBroker::new();
    let peer = TestServer::start(peer_app()).await;
    let service = start_service(test_config(ServiceKind::Sync, &peer.base_url), &broker).await;

    let (status, body) = get(service.url("/sync")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Service A (Sync) received: Hello from Service B (Sync)");

    service.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test]
async fn test_sync_reports_unreachable_peer() {
    let broker = InMemoryBroker::new();
    let base_url = unreachable_base_url().await;
    let service = start_service(test_config(ServiceKind::Sync, &base_url), &broker).await;

    let (status, body) = get(service.url("/sync")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Error communicating with Service B");

    service.shutdown().await;
}

#[tokio::test]
async fn test_sync_reports_failing_peer() {
    let broker = InMemoryBroker::new();
    let peer = TestServer::start(failing_peer_app()).await;
    let service = start_service(test_config(ServiceKind::Sync, &peer.base_url), &broker).await;

    let (status, body) = get(service.url("/sync")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Error communicating with Service B");

    service.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test]
async fn test_async_publishes_default_message() {
    let broker = InMemoryBroker::new();
    let config = test_config(ServiceKind::Async, "http://127.0.0.1:9");
    let service = start_service(config, &broker).await;

    let (status, body) = get(service.url("/async")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Message sent to Service B (Async)");

    assert_eq!(broker.ready_count("messages"), 1);
    assert_eq!(broker.queue_durability("messages"), Some(false));
    assert_eq!(
        take_payloads(&broker, "messages", 1).await,
        vec!["Hello from Service A (Async)".to_string()]
    );

    service.shutdown().await;
}

#[tokio::test]
async fn test_async_reports_broker_outage() {
    let broker = InMemoryBroker::new();
    broker.set_available(false);
    let config = test_config(ServiceKind::Async, "http://127.0.0.1:9");
    let service = start_service(config, &broker).await;

    let (status, body) = get(service.url("/async")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Error sending message");

    broker.set_available(true);
    let (status, _) = get(service.url("/async")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(broker.ready_count("messages"), 1);

    service.shutdown().await;
}

#[tokio::test]
async fn test_hybrid_success_calls_peer_and_publishes() {
    let broker = InMemoryBroker::new();
    let peer = TestServer::start(peer_app()).await;
    let service = start_service(test_config(ServiceKind::Hybrid, &peer.base_url), &broker).await;

    let (status, body) = get(service.url("/hybrid")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        "Hybrid service received: Hello from Service B (Sync) and sent async message"
    );
    assert_eq!(
        take_payloads(&broker, "messages", 1).await,
        vec!["Hello from Service C (Hybrid)".to_string()]
    );

    service.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test]
async fn test_hybrid_publishes_supplied_message() {
    let broker = InMemoryBroker::new();
    let peer = TestServer::start(peer_app()).await;
    let service = start_service(test_config(ServiceKind::Hybrid, &peer.base_url), &broker).await;

    let (status, _) = get(service.url("/hybrid?message=order%2042")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        take_payloads(&broker, "messages", 1).await,
        vec!["order 42".to_string()]
    );

    service.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test]
async fn test_hybrid_peer_failure_still_publishes() {
    let broker = InMemoryBroker::new();
    let base_url = unreachable_base_url().await;
    let service = start_service(test_config(ServiceKind::Hybrid, &base_url), &broker).await;

    let (status, body) = get(service.url("/hybrid")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Error in hybrid service: synchronous call failed");
    assert_eq!(broker.ready_count("messages"), 1);

    service.shutdown().await;
}

#[tokio::test]
async fn test_hybrid_publish_failure_is_reported() {
    let broker = InMemoryBroker::new();
    broker.set_available(false);
    let peer = TestServer::start(peer_app()).await;
    let service = start_service(test_config(ServiceKind::Hybrid, &peer.base_url), &broker).await;

    let (status, body) = get(service.url("/hybrid")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Error in hybrid service: message publish failed");

    service.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test]
async fn test_hybrid_both_legs_failing() {
    let broker = InMemoryBroker::new();
    broker.set_available(false);
    let base_url = unreachable_base_url().await;
    let service = start_service(test_config(ServiceKind::Hybrid, &base_url), &broker).await;

    let (status, body) = get(service.url("/hybrid")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        "Error in hybrid service: synchronous call and message publish failed"
    );

    service.shutdown().await;
}

#[tokio::test]
async fn test_hybrid_rejects_blank_message() {
    let broker = InMemoryBroker::new();
    let peer = TestServer::start(peer_app()).await;
    let service = start_service(test_config(ServiceKind::Hybrid, &peer.base_url), &broker).await;

    let (status, body) = get(service.url("/hybrid?message=%20%20")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.starts_with("Invalid request"));
    assert_eq!(broker.published_count("messages"), 0);

    service.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test]
async fn test_request_timeout_is_a_server_error() {
    let broker = InMemoryBroker::new();
    let peer = TestServer::start(slow_peer_app(Duration::from_secs(3))).await;
    let mut config = test_config(ServiceKind::Sync, &peer.base_url);
    config.peer.timeout_ms = 10_000;
    config.web.request_timeout_ms = 200;
    assert!(config.validate().is_err(), "loaded configs never allow this");
    let service = start_service(config, &broker).await;

    let (status, _) = get(service.url("/sync")).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert!(status.is_server_error());

    service.shutdown().await;
    peer.shutdown().await;
}
