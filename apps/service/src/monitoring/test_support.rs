//! Throwaway local HTTP endpoints for probe tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve `HTTP/1.1 <status_line>` to every request. Returns the URL.
pub async fn serve_status(status_line: &'static str) -> String {
    let (url, _) = serve_switchable(status_line).await;
    url
}

/// Like [`serve_status`], but the status code can be changed while serving
pub async fn serve_switchable(status_line: &'static str) -> (String, Arc<AtomicU16>) {
    let code: u16 = status_line
        .split_whitespace()
        .next()
        .and_then(|c| c.parse().ok())
        .unwrap_or(200);
    let status = Arc::new(AtomicU16::new(code));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shared = status.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let code = shared.load(Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {code} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    reason(code)
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{addr}/health"), status)
}

/// URL of a local port nothing listens on
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/health")
}

fn reason(code: u16) -> &'static str {
    reqwest::StatusCode::from_u16(code).ok().and_then(|s| s.canonical_reason()).unwrap_or("Unknown")
}
