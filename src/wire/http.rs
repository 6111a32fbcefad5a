//! Minimal HTTP/1.1 request writer and response reader
//!
//! Only what a single `Connection: close` POST needs: one request line, a
//! handful of headers, a status line and a short body.

use core::fmt::Write;

use heapless::Vec;

use super::Reply;
use crate::error::WireError;

const HEADER_END: &[u8] = b"\r\n\r\n";

/// Serialize a POST request into `out`
pub fn write_request<const N: usize>(
    host: &str,
    path: &str,
    content_type: &str,
    body: &[u8],
    out: &mut Vec<u8, N>,
) -> Result<(), WireError> {
    out.clear();
    let mut writer = VecWriter(out);
    write!(
        writer,
        "POST {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         User-Agent: telemetry-node/{}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n",
        env!("CARGO_PKG_VERSION"),
        body.len()
    )
    .map_err(|_| WireError::Overflow)?;
    out.extend_from_slice(body).map_err(|_| WireError::Overflow)
}

/// How the body of a response is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    Length(usize),
    Chunked,
    /// Neither header present: the body runs until the server closes
    UntilClose,
}

/// True once `bytes` hold a whole reply: the header block plus
/// `Content-Length` body bytes, or the header block plus the first chunk.
///
/// Replies framed by connection close are never complete here; the reader
/// stops on EOF instead.
pub fn response_complete(bytes: &[u8]) -> bool {
    let Some(header_end) = find(bytes, HEADER_END) else {
        return false;
    };
    let body = &bytes[header_end + HEADER_END.len()..];
    match parse_head(&bytes[..header_end]) {
        Ok((_, BodyFraming::Length(len))) => body.len() >= len,
        Ok((_, BodyFraming::Chunked)) => first_chunk(body).is_ok(),
        Ok((_, BodyFraming::UntilClose)) => false,
        // nothing more to wait for; the parser reports it
        Err(_) => true,
    }
}

/// Parse a buffered response. Bodies longer than the reply capacity are
/// truncated; only their first bytes matter for classification.
pub fn parse_response(bytes: &[u8]) -> Result<Reply, WireError> {
    let header_end = find(bytes, HEADER_END).ok_or(WireError::Malformed)?;
    let (status, framing) = parse_head(&bytes[..header_end])?;

    let raw_body = &bytes[header_end + HEADER_END.len()..];
    let body = match framing {
        BodyFraming::Length(len) => &raw_body[..len.min(raw_body.len())],
        BodyFraming::Chunked => first_chunk(raw_body)?,
        BodyFraming::UntilClose => raw_body,
    };

    Ok(Reply::http(status, body))
}

fn parse_head(head: &[u8]) -> Result<(u16, BodyFraming), WireError> {
    let head = core::str::from_utf8(head).map_err(|_| WireError::Malformed)?;
    let mut lines = head.split("\r\n");
    let status = parse_status_line(lines.next().ok_or(WireError::Malformed)?)?;

    // 1xx, 204 and 304 never carry a body
    if status < 200 || status == 204 || status == 304 {
        return Ok((status, BodyFraming::Length(0)));
    }

    let mut framing = BodyFraming::UntilClose;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("transfer-encoding") && value.eq_ignore_ascii_case("chunked")
        {
            // chunked wins over any Content-Length
            return Ok((status, BodyFraming::Chunked));
        }
        if name.eq_ignore_ascii_case("content-length") {
            let len = value.parse::<usize>().map_err(|_| WireError::Malformed)?;
            framing = BodyFraming::Length(len);
        }
    }
    Ok((status, framing))
}

fn parse_status_line(line: &str) -> Result<u16, WireError> {
    let mut parts = line.split_ascii_whitespace();
    let version = parts.next().ok_or(WireError::Malformed)?;
    if !version.starts_with("HTTP/1.") {
        return Err(WireError::Malformed);
    }
    let code = parts.next().ok_or(WireError::Malformed)?;
    if code.len() != 3 {
        return Err(WireError::Malformed);
    }
    code.parse::<u16>().map_err(|_| WireError::Malformed)
}

// Only the first chunk is kept; ThingSpeak replies fit in one.
fn first_chunk(body: &[u8]) -> Result<&[u8], WireError> {
    let line_end = find(body, b"\r\n").ok_or(WireError::Malformed)?;
    let size_field = core::str::from_utf8(&body[..line_end]).map_err(|_| WireError::Malformed)?;
    let size_hex = size_field.split(';').next().unwrap_or("").trim();
    let size = usize::from_str_radix(size_hex, 16).map_err(|_| WireError::Malformed)?;
    let start = line_end + 2;
    let end = start.checked_add(size).ok_or(WireError::Malformed)?;
    body.get(start..end).ok_or(WireError::Malformed)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

struct VecWriter<'a, const N: usize>(&'a mut Vec<u8, N>);

impl<const N: usize> Write for VecWriter<'_, N> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0
            .extend_from_slice(s.as_bytes())
            .map_err(|_| core::fmt::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_has_length_and_close() {
        let mut out: Vec<u8, 512> = Vec::new();
        write_request(
            "api.thingspeak.com",
            "/update",
            "application/x-www-form-urlencoded",
            b"field1=1.00",
            &mut out,
        )
        .unwrap();

        let text = core::str::from_utf8(&out).unwrap();
        assert!(text.starts_with("POST /update HTTP/1.1\r\nHost: api.thingspeak.com\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.contains("Connection: close\r\n\r\n"));
        assert!(text.ends_with("\r\n\r\nfield1=1.00"));
    }

    #[test]
    fn request_overflow_is_reported() {
        let mut out: Vec<u8, 32> = Vec::new();
        let result = write_request("host", "/update", "text/plain", b"x", &mut out);
        assert_eq!(result, Err(WireError::Overflow));
    }

    #[test]
    fn parses_plain_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 3\r\n\r\n417";
        assert_eq!(parse_response(raw), Ok(Reply::http(200, b"417")));
        assert!(response_complete(raw));
    }

    #[test]
    fn parses_chunked_response() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n1\r\n0\r\n0\r\n\r\n";
        assert_eq!(parse_response(raw), Ok(Reply::http(200, b"0")));
    }

    #[test]
    fn error_status_without_body() {
        let raw = b"HTTP/1.0 503 Service Unavailable\r\n\r\n";
        assert_eq!(parse_response(raw), Ok(Reply::http(503, b"")));
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(parse_response(b"SSH-2.0-OpenSSH\r\n\r\n"), Err(WireError::Malformed));
        assert_eq!(parse_response(b"HTTP/1.1 200 OK\r\n"), Err(WireError::Malformed));
        assert!(!response_complete(b"HTTP/1.1 200 OK\r\n"));
        assert_eq!(parse_response(b"HTTP/1.1 2x0 OK\r\n\r\n"), Err(WireError::Malformed));
    }

    #[test]
    fn content_length_marks_the_end_on_a_kept_alive_socket() {
        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: keep-alive\r\n\r\n";
        assert!(!response_complete(head));

        let mut raw: Vec<u8, 128> = Vec::new();
        raw.extend_from_slice(head).unwrap();
        raw.extend_from_slice(b"17").unwrap();
        assert!(!response_complete(&raw));
        raw.extend_from_slice(b"42").unwrap();
        assert!(response_complete(&raw));
        assert_eq!(parse_response(&raw), Ok(Reply::http(200, b"1742")));
    }

    #[test]
    fn bytes_past_content_length_are_ignored() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\n0HTTP/1.1";
        assert_eq!(parse_response(raw), Ok(Reply::http(200, b"0")));
    }

    #[test]
    fn first_chunk_completes_a_chunked_reply() {
        let head = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        assert!(!response_complete(head));

        let mut raw: Vec<u8, 128> = Vec::new();
        raw.extend_from_slice(head).unwrap();
        raw.extend_from_slice(b"4\r\n17").unwrap();
        assert!(!response_complete(&raw));
        raw.extend_from_slice(b"42\r\n").unwrap();
        assert!(response_complete(&raw));
    }

    #[test]
    fn replies_without_length_wait_for_close() {
        let raw = b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\n1742";
        assert!(!response_complete(raw));
        assert_eq!(parse_response(raw), Ok(Reply::http(200, b"1742")));
    }

    #[test]
    fn no_content_is_complete_after_headers() {
        assert!(response_complete(b"HTTP/1.1 204 No Content\r\n\r\n"));
        assert!(response_complete(b"HTTP/1.1 2x0 OK\r\n\r\n"));
    }

    #[test]
    fn long_body_is_truncated() {
        let mut raw: Vec<u8, 128> = Vec::new();
        raw.extend_from_slice(b"HTTP/1.1 400 Bad Request\r\n\r\n").unwrap();
        raw.extend_from_slice(&[b'x'; 64]).unwrap();
        match parse_response(&raw).unwrap() {
            Reply::Http { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body.len(), super::super::REPLY_BODY_CAPACITY);
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }
}
