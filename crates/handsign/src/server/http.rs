//! Minimal HTTP/1.1 request parsing and response writing.
//!
//! Only what the JSON API needs is supported: one request per connection, bodies delimited by
//! `Content-Length`, no chunked transfer encoding.

use std::fmt;
use std::io::prelude::*;

use serde::Serialize;

const MAX_HEADER_LINE: usize = 8 * 1024;
const MAX_HEADERS: usize = 64;

/// An error that is reported to the client with a specific status code.
#[derive(Debug)]
pub struct HttpError {
    pub status: u16,
    pub message: String,
}

impl HttpError {
    pub fn new<M: Into<String>>(status: u16, message: M) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request<M: Into<String>>(message: M) -> Self {
        Self::new(400, message)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Options,
    Other,
}

#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Reads one request from `stream`.
    ///
    /// Malformed requests result in an [`HttpError`] with status 400, bodies larger than
    /// `max_body` in one with status 413.
    pub fn read<R: BufRead>(stream: &mut R, max_body: usize) -> anyhow::Result<Self> {
        let line = read_line(stream)?;
        log::trace!("request: {}", line.trim());
        let mut parts = line.split_whitespace();
        let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(HttpError::bad_request("malformed request line").into());
        };
        if !version.starts_with("HTTP/1.") {
            return Err(HttpError::new(505, format!("unsupported version {version}")).into());
        }
        let method = match method {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "OPTIONS" => Method::Options,
            _ => Method::Other,
        };
        // Query strings are not used by any endpoint.
        let path = target.split('?').next().unwrap_or(target).to_string();

        let mut headers = Vec::new();
        loop {
            let line = read_line(stream)?;
            if line == "\r\n" || line == "\n" {
                break;
            }
            if headers.len() == MAX_HEADERS {
                return Err(HttpError::new(431, "too many headers").into());
            }
            log::trace!("request header: {}", line.trim());
            let Some((name, value)) = line.split_once(':') else {
                return Err(HttpError::bad_request("malformed header").into());
            };
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        let mut request = Self {
            method,
            path,
            headers,
            body: Vec::new(),
        };

        if request
            .header("Transfer-Encoding")
            .is_some_and(|te| !te.eq_ignore_ascii_case("identity"))
        {
            return Err(HttpError::new(501, "chunked request bodies are not supported").into());
        }
        let length = match request.header("Content-Length") {
            Some(value) => value
                .parse::<usize>()
                .map_err(|_| HttpError::bad_request("invalid Content-Length header"))?,
            None => 0,
        };
        if length > max_body {
            return Err(HttpError::new(
                413,
                format!("request body of {length} bytes exceeds the limit of {max_body} bytes"),
            )
            .into());
        }
        // Grows with the bytes actually received.
        stream
            .by_ref()
            .take(length as u64)
            .read_to_end(&mut request.body)?;
        if request.body.len() != length {
            anyhow::bail!(
                "connection closed after {} of {length} body bytes",
                request.body.len()
            );
        }

        Ok(request)
    }

    /// Returns the value of the first header called `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn read_line<R: BufRead>(stream: &mut R) -> anyhow::Result<String> {
    let mut line = Vec::new();
    let n = stream
        .by_ref()
        .take(MAX_HEADER_LINE as u64)
        .read_until(b'\n', &mut line)?;
    if n == 0 {
        anyhow::bail!("connection closed before the request was complete");
    }
    if !line.ends_with(b"\n") {
        return Err(HttpError::new(431, "header line too long").into());
    }
    let line = String::from_utf8(line)
        .map_err(|_| HttpError::bad_request("request contains invalid UTF-8"))?;
    Ok(line)
}

#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Self {
        let body = match serde_json::to_vec(value) {
            Ok(body) => body,
            Err(e) => {
                log::error!("failed to serialize response: {e}");
                return Self::error(500, "internal error");
            }
        };
        Self { status, body }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message }).to_string().into_bytes(),
        }
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            body: Vec::new(),
        }
    }

    /// Writes status line, headers and body. Every response allows cross-origin requests.
    pub fn write_to<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        write!(w, "HTTP/1.1 {} {}\r\n", self.status, reason(self.status))?;
        if !self.body.is_empty() {
            w.write_all(b"Content-Type: application/json\r\n")?;
        }
        write!(w, "Content-Length: {}\r\n", self.body.len())?;
        w.write_all(b"Access-Control-Allow-Origin: *\r\n")?;
        w.write_all(b"Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n")?;
        w.write_all(b"Access-Control-Allow-Headers: Content-Type, X-Session-Id\r\n")?;
        w.write_all(b"Connection: close\r\n\r\n")?;
        w.write_all(&self.body)?;
        w.flush()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        505 => "HTTP Version Not Supported",
        _ => "",
    }
}
