//! HTTP server end-to-end tests
//!
//! Start a real server on an OS-assigned port and talk to it with reqwest.

mod common;

use azure_upload_relay::config::ServerConfig;
use azure_upload_relay::storage::{MemoryBackend, StorageBackend};
use bytes::Bytes;
use common::{random_payload, FakeBackend, TestServer, CONTAINER};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

async fn memory_server() -> (TestServer, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new("https://store"));
    let shared: Arc<dyn StorageBackend> = backend.clone();
    (TestServer::start(shared).await, backend)
}

#[tokio::test]
async fn test_upload_returns_blob_url() {
    let (server, backend) = memory_server().await;

    let response = server
        .upload("a.txt", Bytes::from_static(b"0123456789"))
        .await;

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.text().await.unwrap(),
        "https://store/maana-azure-storage-wrapper/a.txt"
    );
    assert_eq!(
        backend.get(CONTAINER, "a.txt").unwrap(),
        Bytes::from_static(b"0123456789")
    );
}

#[tokio::test]
async fn test_large_upload_is_stored_intact() {
    let (server, backend) = memory_server().await;
    let payload = random_payload(3 * 1024 * 1024 + 17);

    let response = server.upload("large.bin", payload.clone()).await;

    assert_eq!(response.status(), 200);
    assert_eq!(backend.get(CONTAINER, "large.bin").unwrap(), payload);
}

#[tokio::test]
async fn test_first_file_part_wins() {
    let (server, backend) = memory_server().await;

    let form = reqwest::multipart::Form::new()
        .text("description", "quarterly numbers")
        .part(
            "file",
            reqwest::multipart::Part::bytes(b"first".to_vec()).file_name("first.csv"),
        )
        .part(
            "other",
            reqwest::multipart::Part::bytes(b"second".to_vec()).file_name("second.csv"),
        );

    let response = server
        .client
        .post(server.url("/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().ends_with("/first.csv"));
    assert_eq!(backend.len(), 1);
    assert!(backend.get(CONTAINER, "second.csv").is_none());
}

#[tokio::test]
async fn test_non_multipart_upload_rejected() {
    let (server, backend) = memory_server().await;

    let response = server
        .client
        .post(server.url("/upload"))
        .header("Content-Type", "application/octet-stream")
        .body("raw bytes")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert!(backend.is_empty());
}

#[tokio::test]
async fn test_sink_failure_is_server_error() {
    let backend = Arc::new(FakeBackend::new().failing_on_write(1));
    let shared: Arc<dyn StorageBackend> = backend.clone();
    let server = TestServer::start(shared).await;

    let response = server
        .upload("a.txt", Bytes::from_static(b"0123456789"))
        .await;

    assert_eq!(response.status(), 500);
    assert!(response.text().await.unwrap().contains("quota exceeded"));
    assert_eq!(backend.fetch_count(), 0);
}

#[tokio::test]
async fn test_missing_blob_is_server_error() {
    let backend = Arc::new(FakeBackend::new().hiding_blobs());
    let shared: Arc<dyn StorageBackend> = backend.clone();
    let server = TestServer::start(shared).await;

    let response = server
        .upload("a.txt", Bytes::from_static(b"0123456789"))
        .await;

    assert_eq!(response.status(), 500);
    assert!(response.text().await.unwrap().contains("Blob not found"));
}

#[tokio::test]
async fn test_index_reports_service_id() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::default());
    let server = TestServer::start_with(
        backend,
        ServerConfig {
            address: "127.0.0.1:0".into(),
            service_id: "relay-under-test".into(),
            ..Default::default()
        },
    )
    .await;

    let response = server.client.get(server.url("/")).send().await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "relay-under-test\n");
}

#[tokio::test]
async fn test_info_and_health() {
    let (server, _backend) = memory_server().await;

    let info: serde_json::Value = server
        .client
        .get(server.url("/info"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["id"], "maana-azure-storage");
    assert_eq!(info["name"], "maana-azure-storage");

    let health = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_unknown_route_and_wrong_method() {
    let (server, _backend) = memory_server().await;

    let response = server
        .client
        .get(server.url("/graphql"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = server
        .client
        .get(server.url("/upload"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);
    assert_eq!(response.headers()["allow"], "POST");
}

#[tokio::test]
async fn test_concurrent_http_uploads() {
    let (server, backend) = memory_server().await;

    let (x, y) = tokio::join!(
        server.upload("x.png", random_payload(50_000)),
        server.upload("y.png", random_payload(20_000)),
    );

    assert_eq!(
        x.text().await.unwrap(),
        "https://store/maana-azure-storage-wrapper/x.png"
    );
    assert_eq!(
        y.text().await.unwrap(),
        "https://store/maana-azure-storage-wrapper/y.png"
    );
    assert_eq!(backend.len(), 2);
}

#[tokio::test]
async fn test_idle_connection_closed_after_timeout() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::default());
    let server = TestServer::start_with(
        backend,
        ServerConfig {
            address: "127.0.0.1:0".into(),
            timeout_secs: 1,
            ..Default::default()
        },
    )
    .await;

    let mut stream = tokio::net::TcpStream::connect(server.addr).await.unwrap();
    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("server should close the idle connection");

    match read {
        Ok(0) | Err(_) => {}
        Ok(n) => panic!("Unexpected {} bytes on idle connection", n),
    }
}
