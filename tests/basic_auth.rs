mod support;

use std::sync::Arc;

use proxycore::{NoopHooks, RoutingEntry, Server, Settings};

#[tokio::test]
async fn missing_credentials_get_a_401_challenge() {
    let (upstream_addr, _upstream) = support::spawn_echo_upstream().await;
    let settings = Settings {
        http_port: 18821,
        https_port: 0,
        proxies: vec![RoutingEntry::builder("example.com")
            .target(url::Url::parse(&format!("http://{upstream_addr}/")).unwrap())
            .authorization("dGVzdDp0ZXN0")
            .build()],
        ..Settings::default()
    };
    let server = Server::new(settings, Arc::new(NoopHooks));
    server.start().await.unwrap();
    let addr = server.http_addr().await.unwrap();

    let raw = support::send_raw(
        addr,
        "GET / HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (status_line, headers, _body) = support::split_response(&raw);

    assert!(status_line.starts_with("HTTP/1.1 401"), "{status_line}");
    assert!(support::header_value(&headers, "WWW-Authenticate").is_some());

    server.reset().await;
}

#[tokio::test]
async fn wrong_credentials_also_get_a_401() {
    let (upstream_addr, _upstream) = support::spawn_echo_upstream().await;
    let settings = Settings {
        http_port: 18822,
        https_port: 0,
        proxies: vec![RoutingEntry::builder("example.com")
            .target(url::Url::parse(&format!("http://{upstream_addr}/")).unwrap())
            .authorization("dGVzdDp0ZXN0")
            .build()],
        ..Settings::default()
    };
    let server = Server::new(settings, Arc::new(NoopHooks));
    server.start().await.unwrap();
    let addr = server.http_addr().await.unwrap();

    let raw = support::send_raw(
        addr,
        "GET / HTTP/1.1\r\nHost: example.com\r\nAuthorization: Basic d3Jvbmc6d3Jvbmc=\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (status_line, _headers, _body) = support::split_response(&raw);

    assert!(status_line.starts_with("HTTP/1.1 401"), "{status_line}");

    server.reset().await;
}

#[tokio::test]
async fn correct_credentials_reach_the_upstream() {
    let (upstream_addr, _upstream) = support::spawn_echo_upstream().await;
    let settings = Settings {
        http_port: 18823,
        https_port: 0,
        proxies: vec![RoutingEntry::builder("example.com")
            .target(url::Url::parse(&format!("http://{upstream_addr}/")).unwrap())
            .authorization("dGVzdDp0ZXN0")
            .build()],
        ..Settings::default()
    };
    let server = Server::new(settings, Arc::new(NoopHooks));
    server.start().await.unwrap();
    let addr = server.http_addr().await.unwrap();

    let raw = support::send_raw(
        addr,
        "GET / HTTP/1.1\r\nHost: example.com\r\nAuthorization: Basic dGVzdDp0ZXN0\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (status_line, _headers, body) = support::split_response(&raw);

    assert!(status_line.starts_with("HTTP/1.1 200"), "{status_line}");
    assert!(body.contains("GET / HTTP/1.1"), "{body}");

    server.reset().await;
}
