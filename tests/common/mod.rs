//! Shared helpers for the integration tests: a tiny HTTP client over plain
//! sockets, with timeouts so a broken engine fails tests instead of hanging
//! them.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestResponse {
    pub status: u16,
    /// Header names lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).expect("utf8 body")
    }
}

/// Send raw request bytes on a fresh connection and read the reply to EOF.
/// The request should carry `Connection: close`.
pub fn raw_request(addr: SocketAddr, raw: &str) -> TestResponse {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(CLIENT_TIMEOUT))
        .expect("set timeout");
    stream.write_all(raw.as_bytes()).expect("write request");
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).expect("read response");
    parse_response(&buf)
}

/// One-shot GET with `Connection: close`.
pub fn get(addr: SocketAddr, path: &str) -> TestResponse {
    raw_request(
        addr,
        &format!("GET {path} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n"),
    )
}

/// Open a connection intended for several sequential requests.
pub fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(CLIENT_TIMEOUT))
        .expect("set timeout");
    stream
}

/// Send one keep-alive GET on an existing connection.
pub fn send_get(stream: &mut TcpStream, path: &str) {
    stream
        .write_all(format!("GET {path} HTTP/1.1\r\nHost: test\r\n\r\n").as_bytes())
        .expect("write request");
}

/// Read exactly one response (head plus `Content-Length` bytes of body) from
/// an existing connection, leaving it open.
pub fn read_one_response(stream: &mut TcpStream) -> TestResponse {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).expect("read head");
        assert!(n > 0, "connection closed before the response head arrived");
        buf.extend_from_slice(&chunk[..n]);
    };

    let mut response = parse_head(&buf[..head_end]);
    let content_length: usize = response
        .header("content-length")
        .expect("content-length header")
        .parse()
        .expect("content-length value");

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).expect("read body");
        assert!(n > 0, "connection closed before the full body arrived");
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);
    response.body = body;
    response
}

fn parse_response(buf: &[u8]) -> TestResponse {
    let head_end = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response head terminator");
    let mut response = parse_head(&buf[..head_end]);
    response.body = buf[head_end + 4..].to_vec();
    response
}

fn parse_head(head: &[u8]) -> TestResponse {
    let text = std::str::from_utf8(head).expect("utf8 head");
    let mut lines = text.split("\r\n");
    let status_line = lines.next().expect("status line");
    let status = status_line
        .split_whitespace()
        .nth(1)
        .expect("status code")
        .parse()
        .expect("numeric status");
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    TestResponse {
        status,
        headers,
        body: Vec::new(),
    }
}
