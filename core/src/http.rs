//! Minimal HTTP/1.1 GET for no_std environments
//!
//! Just enough protocol for one conditional download: build the request,
//! scan the response head line by line inside the caller's transfer buffer,
//! and hand back whatever body bytes arrived with the head. Plain HTTP only.

use core::fmt::Write as FmtWrite;
use core::str;

use embedded_io_async::{Read, Write};
use heapless::String;
use log::debug;

use crate::date::{self, Timestamp};

/// Transport error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Invalid or unsupported URL
    InvalidUrl,
    /// Host name didn't resolve
    Dns,
    /// Failed to connect to server
    Connect,
    /// Failed to write request
    Write,
    /// Failed to read response, or connection closed mid-head
    Read,
    /// Malformed status line
    Parse,
    /// A head line doesn't fit the transfer buffer
    HeadTooLarge,
    /// HTTP error status code
    Status(u16),
    /// Response uses a transfer coding we don't decode
    Unsupported,
    /// Body ended before `Content-Length` bytes arrived
    Incomplete,
}

/// Parsed URL components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Url<'a> {
    pub host: &'a str,
    pub port: u16,
    pub path: &'a str,
}

impl<'a> Url<'a> {
    /// Parse `http://host[:port][/path]`
    pub fn parse(url: &'a str) -> Result<Self, TransportError> {
        let rest = url.strip_prefix("http://").ok_or(TransportError::InvalidUrl)?;

        let (host_port, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        let (host, port) = match host_port.split_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| TransportError::InvalidUrl)?;
                (host, port)
            }
            None => (host_port, 80),
        };

        if host.is_empty() {
            return Err(TransportError::InvalidUrl);
        }

        Ok(Url { host, port, path })
    }
}

/// Status and the headers the fetcher cares about
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_length: Option<usize>,
    /// Parsed `Last-Modified`; `None` if absent or unparseable
    pub last_modified: Option<Timestamp>,
    /// `Transfer-Encoding: chunked`
    pub chunked: bool,
}

impl ResponseHead {
    fn apply_header(&mut self, line: &str) {
        let Some((name, value)) = line.split_once(':') else {
            return;
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("last-modified") {
            debug!("Last-Modified: {}", value);
            self.last_modified = date::parse_http_date(value);
        } else if name.eq_ignore_ascii_case("content-length") {
            self.content_length = value.parse().ok();
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            self.chunked = value
                .split(',')
                .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        }
    }
}

/// Send a `GET` for `url`, asking the server to close when done
pub async fn send_get<C: Write>(conn: &mut C, url: &Url<'_>) -> Result<(), TransportError> {
    let mut request: String<512> = String::new();
    write!(&mut request, "GET {} HTTP/1.1\r\nHost: {}", url.path, url.host)
        .map_err(|_| TransportError::InvalidUrl)?;
    if url.port != 80 {
        write!(&mut request, ":{}", url.port).map_err(|_| TransportError::InvalidUrl)?;
    }
    request
        .push_str("\r\nConnection: close\r\nUser-Agent: inkwake\r\n\r\n")
        .map_err(|_| TransportError::InvalidUrl)?;

    conn.write_all(request.as_bytes())
        .await
        .map_err(|_| TransportError::Write)?;
    conn.flush().await.map_err(|_| TransportError::Write)
}

/// Read the response head into `buf`.
///
/// Lines are consumed as they complete, so only the longest single line has
/// to fit. Returns the head plus the range `start..end` of body bytes already
/// sitting in `buf`.
pub async fn read_head<C: Read>(
    conn: &mut C,
    buf: &mut [u8],
) -> Result<(ResponseHead, usize, usize), TransportError> {
    let mut head = ResponseHead::default();
    let mut status_seen = false;
    let mut start = 0;
    let mut filled = 0;

    loop {
        while let Some(pos) = find_line_end(&buf[start..filled]) {
            let next = start + pos + 1;
            let line = trim_cr(&buf[start..start + pos]);

            if line.is_empty() {
                if !status_seen {
                    return Err(TransportError::Parse);
                }
                return Ok((head, next, filled));
            }

            if status_seen {
                // Headers we can't read as text are not ones we need
                if let Ok(line) = str::from_utf8(line) {
                    head.apply_header(line);
                }
            } else {
                let line = str::from_utf8(line).map_err(|_| TransportError::Parse)?;
                head.status = parse_status(line)?;
                status_seen = true;
            }
            start = next;
        }

        // Keep the partial line, make room behind it
        buf.copy_within(start..filled, 0);
        filled -= start;
        start = 0;
        if filled == buf.len() {
            return Err(TransportError::HeadTooLarge);
        }

        let n = conn
            .read(&mut buf[filled..])
            .await
            .map_err(|_| TransportError::Read)?;
        if n == 0 {
            return Err(TransportError::Read);
        }
        filled += n;
    }
}

/// Position of the next `\n`
fn find_line_end(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Parse HTTP status code from status line
pub fn parse_status(line: &str) -> Result<u16, TransportError> {
    // HTTP/1.1 200 OK
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().ok_or(TransportError::Parse)?;
    if !version.starts_with("HTTP/") {
        return Err(TransportError::Parse);
    }
    parts
        .next()
        .ok_or(TransportError::Parse)?
        .parse()
        .map_err(|_| TransportError::Parse)
}
