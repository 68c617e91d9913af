//! Wayback client tests against a local one-shot HTTP server

mod helpers;

use helpers::cid;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tza_archiver::archive::{Credentials, SaveOptions};
use tza_archiver::{ArchiveSubmitter, ArchiveTarget, GatewayResolver, SubmitOutcome, WaybackClient};

fn target() -> ArchiveTarget {
    GatewayResolver::new(helpers::fixtures::TEST_GATEWAY)
        .unwrap()
        .resolve(&cid(1))
        .unwrap()
}

fn client(base: &str, timeout: Duration) -> WaybackClient {
    WaybackClient::new(
        Credentials::new("access", "secret"),
        SaveOptions::default(),
        timeout,
    )
    .unwrap()
    .with_endpoints(format!("{}/save", base), format!("{}/wayback/available", base))
}

fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = header_end(&buf) {
            let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
            let body_len = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= pos + 4 + body_len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Serve one canned response; the handle yields the raw request
async fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        request
    });

    (format!("http://{}", addr), handle)
}

#[tokio::test]
async fn test_submit_sends_authorized_form() {
    let (base, server) = serve_once("200 OK", r#"{"url": "x", "job_id": "spn2-42"}"#).await;

    let outcome = client(&base, Duration::from_secs(5)).submit(&target()).await;
    assert_eq!(
        outcome,
        SubmitOutcome::Accepted {
            job_id: Some("spn2-42".to_string())
        }
    );

    let request = server.await.unwrap();
    let lowered = request.to_lowercase();
    assert!(request.starts_with("POST /save HTTP/1.1"));
    assert!(lowered.contains("authorization: low access:secret"));
    assert!(lowered.contains("accept: application/json"));
    assert!(lowered.contains("content-type: application/x-www-form-urlencoded"));
    assert!(request.contains("url=https%3A%2F%2Fipfs.fileship.xyz%2FQm"));
    assert!(request.contains("js_behavior_timeout=7"));
    assert!(request.contains("if_not_archived_within=31536000"));
    assert!(!request.contains("delay_wb_availability"));
}

#[tokio::test]
async fn test_submit_maps_429_to_rate_limited() {
    let (base, server) = serve_once("429 Too Many Requests", "").await;

    let outcome = client(&base, Duration::from_secs(5)).submit(&target()).await;
    assert!(matches!(outcome, SubmitOutcome::RateLimited { .. }));
    server.await.unwrap();
}

#[tokio::test]
async fn test_submit_reports_service_error() {
    let (base, server) = serve_once(
        "200 OK",
        r#"{"status": "error", "status_ext": "error:invalid-url-syntax", "message": "bad url"}"#,
    )
    .await;

    let outcome = client(&base, Duration::from_secs(5)).submit(&target()).await;
    assert!(matches!(outcome, SubmitOutcome::Failed { .. }));
    server.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_service_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let outcome = client(&format!("http://{}", addr), Duration::from_secs(5))
        .submit(&target())
        .await;
    assert!(matches!(outcome, SubmitOutcome::Failed { .. }));
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_request(&mut socket).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let outcome = client(&format!("http://{}", addr), Duration::from_millis(300))
        .submit(&target())
        .await;
    match outcome {
        SubmitOutcome::Failed { reason } => assert!(reason.contains("timed out")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    server.abort();
}

#[tokio::test]
async fn test_availability_hit() {
    let (base, server) = serve_once(
        "200 OK",
        r#"{"url": "x", "archived_snapshots": {"closest": {"available": true, "status": "200",
            "url": "http://web.archive.org/web/20240101000000/x", "timestamp": "20240101000000"}}}"#,
    )
    .await;

    let indexed = client(&base, Duration::from_secs(5))
        .is_indexed(&target())
        .await
        .unwrap();
    assert!(indexed);

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /wayback/available?url=https%3A%2F%2Fipfs.fileship.xyz%2FQm"));
}

#[tokio::test]
async fn test_availability_miss() {
    let (base, server) = serve_once("200 OK", r#"{"url": "x", "archived_snapshots": {}}"#).await;

    let indexed = client(&base, Duration::from_secs(5))
        .is_indexed(&target())
        .await
        .unwrap();
    assert!(!indexed);
    server.await.unwrap();
}

#[tokio::test]
async fn test_availability_error_status() {
    let (base, server) = serve_once("502 Bad Gateway", "upstream down").await;

    let result = client(&base, Duration::from_secs(5)).is_indexed(&target()).await;
    assert!(result.is_err());
    server.await.unwrap();
}
