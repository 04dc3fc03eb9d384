use cam_scan_rs::probe::{HttpProber, ProbeError, Prober, MAX_RESPONSE_BYTES};
use cam_scan_rs::types::{CameraKind, Classification, WorkItem};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Instant;

/// Serve one canned response on a loopback port, returning the port.
async fn serve_once(response: &'static [u8]) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut req = [0u8; 512];
        let _ = sock.read(&mut req).await;
        let _ = sock.write_all(response).await;
        let _ = sock.shutdown().await;
    });
    port
}

fn local(port: u16) -> WorkItem {
    WorkItem::new(Ipv4Addr::LOCALHOST, port)
}

#[tokio::test]
async fn dahua_page_is_detected() {
    let port = serve_once(
        b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<html><head><title>WEB SERVICE</title></head></html>",
    )
    .await;
    let prober = HttpProber::new(Duration::from_millis(500));
    let res = prober.probe(local(port)).await.unwrap();
    assert_eq!(res, Classification::Camera(CameraKind::Dahua));
}

#[tokio::test]
async fn hikvision_redirect_is_detected() {
    let port = serve_once(b"HTTP/1.1 302 Found\r\nLocation: /doc/page/login.asp?_1\r\n\r\n").await;
    let prober = HttpProber::new(Duration::from_millis(500));
    let res = prober.probe(local(port)).await.unwrap();
    assert_eq!(res, Classification::Camera(CameraKind::Hikvision));
}

#[tokio::test]
async fn other_server_is_no_match() {
    let port = serve_once(b"HTTP/1.1 200 OK\r\n\r\n<title>nginx</title>").await;
    let prober = HttpProber::new(Duration::from_millis(500));
    assert_eq!(prober.probe(local(port)).await.unwrap(), Classification::NoMatch);
}

#[tokio::test]
async fn binary_response_is_decode_error() {
    let port = serve_once(b"HTTP/1.1 200 OK\r\n\r\n\xff\xfe\xfd").await;
    let prober = HttpProber::new(Duration::from_millis(500));
    let err = prober.probe(local(port)).await.unwrap_err();
    assert!(matches!(err, ProbeError::Decode(_)));
}

#[tokio::test]
async fn closed_port_is_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let prober = HttpProber::new(Duration::from_millis(500));
    let err = prober.probe(local(port)).await.unwrap_err();
    assert!(matches!(err, ProbeError::Connect(..) | ProbeError::Timeout(_)));
}

#[tokio::test]
async fn silent_peer_times_out_within_budget() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(sock);
    });

    let prober = HttpProber::new(Duration::from_millis(150));
    let started = Instant::now();
    let err = prober.probe(local(port)).await.unwrap_err();
    assert!(matches!(err, ProbeError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_millis(600));
}

#[tokio::test]
async fn partial_response_before_stall_is_classified() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut req = [0u8; 512];
        let _ = sock.read(&mut req).await;
        let _ = sock
            .write_all(b"HTTP/1.1 200 OK\r\n\r\n<title>WEB SERVICE</title>")
            .await;
        // Keep the connection open without sending more.
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let prober = HttpProber::new(Duration::from_millis(200));
    let res = prober.probe(local(port)).await.unwrap();
    assert_eq!(res, Classification::Camera(CameraKind::Dahua));
}

#[tokio::test]
async fn char_split_by_read_limit_still_classifies() {
    let mut body = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<title>WEB SERVICE</title>".to_vec();
    body.resize(MAX_RESPONSE_BYTES - 1, b' ');
    // The first 3-byte character straddles the read limit.
    body.extend_from_slice("中文".as_bytes());
    let body: &'static [u8] = Box::leak(body.into_boxed_slice());

    let port = serve_once(body).await;
    let prober = HttpProber::new(Duration::from_millis(500));
    let res = prober.probe(local(port)).await.unwrap();
    assert_eq!(res, Classification::Camera(CameraKind::Dahua));
}
