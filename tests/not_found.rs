mod support;

use std::sync::Arc;

use proxycore::{NoopHooks, Server, Settings};

#[tokio::test]
async fn unmatched_request_gets_a_bare_404() {
    let settings = Settings {
        http_port: 18801,
        https_port: 0,
        ..Settings::default()
    };
    let server = Server::new(settings, Arc::new(NoopHooks));
    server.start().await.unwrap();
    let addr = server.http_addr().await.unwrap();

    let raw = support::send_raw(
        addr,
        "GET /notFound HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (status_line, _headers, body) = support::split_response(&raw);

    assert!(status_line.starts_with("HTTP/1.1 404"), "{status_line}");
    assert!(body.is_empty());

    server.reset().await;
}
