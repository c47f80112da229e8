mod support;

use std::sync::Arc;

use proxycore::{NoopHooks, RoutingEntry, Server, Settings};

#[tokio::test]
async fn preflight_gets_a_204_with_cors_headers() {
    let (upstream_addr, _upstream) = support::spawn_echo_upstream().await;
    let settings = Settings {
        http_port: 18831,
        https_port: 0,
        proxies: vec![RoutingEntry::builder("example.com")
            .target(url::Url::parse(&format!("http://{upstream_addr}/")).unwrap())
            .cors(true)
            .build()],
        ..Settings::default()
    };
    let server = Server::new(settings, Arc::new(NoopHooks));
    server.start().await.unwrap();
    let addr = server.http_addr().await.unwrap();

    // Scenario 7's literal Origin carries a trailing slash; the allowed
    // origin on the wire must be scheme+host only, with the slash dropped.
    let raw = support::send_raw(
        addr,
        "OPTIONS / HTTP/1.1\r\nHost: example.com\r\nOrigin: http://example.com/\r\nAccess-Control-Request-Method: POST\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (status_line, headers, body) = support::split_response(&raw);

    assert!(status_line.starts_with("HTTP/1.1 204"), "{status_line}");
    assert_eq!(support::header_value(&headers, "Content-Length"), Some("0"));
    assert_eq!(
        support::header_value(&headers, "Access-Control-Allow-Origin"),
        Some("http://example.com")
    );
    assert_eq!(
        support::header_value(&headers, "Access-Control-Allow-Methods"),
        Some("POST")
    );
    assert_eq!(support::header_value(&headers, "Vary"), Some("Origin"));
    assert!(body.is_empty());

    server.reset().await;
}

#[tokio::test]
async fn simple_cross_origin_response_echoes_the_origin() {
    let (upstream_addr, _upstream) = support::spawn_echo_upstream().await;
    let settings = Settings {
        http_port: 18832,
        https_port: 0,
        proxies: vec![RoutingEntry::builder("example.com")
            .target(url::Url::parse(&format!("http://{upstream_addr}/")).unwrap())
            .cors(true)
            .build()],
        ..Settings::default()
    };
    let server = Server::new(settings, Arc::new(NoopHooks));
    server.start().await.unwrap();
    let addr = server.http_addr().await.unwrap();

    let raw = support::send_raw(
        addr,
        "GET / HTTP/1.1\r\nHost: example.com\r\nOrigin: https://app.example.com\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (status_line, headers, _body) = support::split_response(&raw);

    assert!(status_line.starts_with("HTTP/1.1 200"), "{status_line}");
    assert_eq!(
        support::header_value(&headers, "Access-Control-Allow-Origin"),
        Some("https://app.example.com")
    );

    server.reset().await;
}
