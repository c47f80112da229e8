//! Shared helpers for the integration tests: a hand-rolled HTTP/1.1 upstream
//! (no mock-HTTP dependency, matching the teacher's dependency-light test
//! style) plus raw request/response plumbing over a `TcpStream`.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Starts a background upstream that replies `200 OK` to every request with
/// a body that echoes the raw bytes it received, so a test can assert on
/// exactly what the proxy forwarded (method, path, headers).
pub async fn spawn_echo_upstream() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { continue };
            tokio::spawn(handle_echo_connection(stream));
        }
    });
    (addr, handle)
}

async fn handle_echo_connection(mut stream: TcpStream) {
    let Some(request_text) = read_head(&mut stream).await else { return };
    let body = request_text;
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Reads until the end of the header block (`\r\n\r\n`). Good enough for the
/// bodyless GET requests these tests send upstream.
async fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return if buf.is_empty() { None } else { Some(String::from_utf8_lossy(&buf).into_owned()) };
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            return Some(String::from_utf8_lossy(&buf).into_owned());
        }
    }
}

/// Sends `raw` over a fresh connection to `addr` and reads the response back
/// to EOF. Callers must include `Connection: close` in `raw` so the server
/// side actually closes the socket once it's done responding.
pub async fn send_raw(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

/// Splits a raw HTTP/1.1 response into `(status_line, headers, body)`.
pub fn split_response(raw: &str) -> (&str, Vec<&str>, &str) {
    let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or("");
    (status_line, lines.collect(), body)
}

pub fn header_value<'a>(headers: &[&'a str], name: &str) -> Option<&'a str> {
    headers.iter().find_map(|h| {
        let (k, v) = h.split_once(':')?;
        if k.trim().eq_ignore_ascii_case(name) {
            Some(v.trim())
        } else {
            None
        }
    })
}
