//! HTTP/1.x protocol front-end: request-head parsing and response
//! serialization.
//!
//! This is deliberately minimal plumbing. The parser handles the request
//! line plus headers and knows just enough about `Content-Length` to skip a
//! request body; bodies are not exposed to handlers. The serializer always
//! emits `Content-Length`, a `Connection` header reflecting the keep-alive
//! decision, and a default `Server` header when the handler did not set one.

use http::Method;

use crate::dispatcher::HandlerResponse;

/// Upper bound on the request head (request line + headers).
pub(crate) const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Upper bound on a request body. Bodies are consumed and discarded, so this
/// only caps how much a client can make the engine buffer.
pub(crate) const MAX_BODY_BYTES: usize = 1024 * 1024;

const SERVER_NAME: &str = "shoal";

/// A fully parsed request head.
#[derive(Debug)]
pub(crate) struct RequestHead {
    pub method: Method,
    pub uri: String,
    /// Header names lowercased, values trimmed, in wire order.
    pub headers: Vec<(String, String)>,
    pub content_length: usize,
    pub keep_alive: bool,
    /// Bytes consumed by the head, including the terminating blank line.
    pub head_len: usize,
}

#[derive(Debug)]
pub(crate) enum ParseOutcome {
    /// More bytes are needed before the head is complete.
    Partial,
    Complete(RequestHead),
    /// The head is malformed or oversized; answer 400 and close.
    Invalid,
}

/// Incrementally parse the request head from the connection's read buffer.
pub(crate) fn parse_request_head(buf: &[u8]) -> ParseOutcome {
    let Some(head_end) = find_blank_line(buf) else {
        if buf.len() > MAX_HEAD_BYTES {
            return ParseOutcome::Invalid;
        }
        return ParseOutcome::Partial;
    };
    if head_end > MAX_HEAD_BYTES {
        return ParseOutcome::Invalid;
    }

    let Ok(text) = std::str::from_utf8(&buf[..head_end]) else {
        return ParseOutcome::Invalid;
    };

    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(uri)) = (parts.next(), parts.next()) else {
        return ParseOutcome::Invalid;
    };
    let version = parts.next().unwrap_or("HTTP/1.0");

    let Ok(method) = Method::from_bytes(method.as_bytes()) else {
        return ParseOutcome::Invalid;
    };
    if !uri.starts_with('/') {
        return ParseOutcome::Invalid;
    }

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return ParseOutcome::Invalid;
        };
        headers.push((
            name.trim().to_ascii_lowercase(),
            value.trim().to_string(),
        ));
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return ParseOutcome::Invalid;
    }

    let http_11 = version == "HTTP/1.1";
    let keep_alive = match headers
        .iter()
        .find(|(name, _)| name == "connection")
        .map(|(_, value)| value.as_str())
    {
        Some(value) if value.eq_ignore_ascii_case("close") => false,
        Some(value) if value.eq_ignore_ascii_case("keep-alive") => true,
        Some(_) | None => http_11,
    };

    ParseOutcome::Complete(RequestHead {
        method,
        uri: uri.to_string(),
        headers,
        content_length,
        keep_alive,
        head_len: head_end + 4,
    })
}

/// Serialize a handler response into wire bytes.
///
/// `Content-Length` and `Connection` are owned by the front-end; values a
/// handler put in the response under those names are ignored.
pub(crate) fn serialize_response(res: &HandlerResponse, keep_alive: bool) -> Vec<u8> {
    let body = res.body();
    let mut out = Vec::with_capacity(body.len() + 256);

    out.extend_from_slice(
        format!("HTTP/1.1 {} {}\r\n", res.status(), status_reason(res.status())).as_bytes(),
    );
    for (name, value) in res.headers() {
        if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("connection") {
            continue;
        }
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    if res.header("Server").is_none() {
        out.extend_from_slice(format!("Server: {SERVER_NAME}\r\n").as_bytes());
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    out.extend_from_slice(if keep_alive {
        b"Connection: keep-alive\r\n".as_slice()
    } else {
        b"Connection: close\r\n".as_slice()
    });
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

pub(crate) fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
