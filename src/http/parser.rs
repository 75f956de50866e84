use crate::http::headers::Headers;
use crate::http::request::Request;
use crate::http::response::ResponseHead;

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidStatus,
    Incomplete,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ParseError::InvalidRequest => "invalid request line",
            ParseError::InvalidMethod => "invalid method",
            ParseError::InvalidHeader => "invalid header line",
            ParseError::InvalidStatus => "invalid status line",
            ParseError::Incomplete => "incomplete message head",
        };
        f.write_str(msg)
    }
}

/// Parses a request head (request line and headers) from the start of `buf`.
///
/// Returns the request and the number of bytes consumed, including the
/// terminating blank line. The body, if any, is left in the buffer.
pub fn parse_request_head(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    let headers_end = find_headers_end(buf).ok_or(ParseError::Incomplete)?;
    let head = std::str::from_utf8(&buf[..headers_end]).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = head.split("\r\n");

    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split(' ');

    let method = parts.next().ok_or(ParseError::InvalidRequest)?;
    let target = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;
    if parts.next().is_some()
        || target.is_empty()
        || !target.bytes().all(is_target_byte)
        || !is_http1_version(version)
    {
        return Err(ParseError::InvalidRequest);
    }
    if method.is_empty() || !method.bytes().all(is_token_byte) {
        return Err(ParseError::InvalidMethod);
    }

    let headers = parse_header_lines(lines)?;

    let request = Request {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        headers,
        remote_addr: None,
    };

    Ok((request, headers_end + 4))
}

/// Parses a response head (status line and headers) from the start of `buf`.
pub fn parse_response_head(buf: &[u8]) -> Result<(ResponseHead, usize), ParseError> {
    let headers_end = find_headers_end(buf).ok_or(ParseError::Incomplete)?;
    let head = std::str::from_utf8(&buf[..headers_end]).map_err(|_| ParseError::InvalidStatus)?;

    let mut lines = head.split("\r\n");

    // "HTTP/1.1 200 OK"; the reason phrase may contain spaces or be absent.
    let status_line = lines.next().ok_or(ParseError::InvalidStatus)?;
    let mut parts = status_line.splitn(3, ' ');

    let version = parts.next().ok_or(ParseError::InvalidStatus)?;
    if !is_http1_version(version) {
        return Err(ParseError::InvalidStatus);
    }
    let code = parts.next().ok_or(ParseError::InvalidStatus)?;
    if code.len() != 3 {
        return Err(ParseError::InvalidStatus);
    }
    let status: u16 = code.parse().map_err(|_| ParseError::InvalidStatus)?;
    let reason = parts.next().unwrap_or("");
    if !reason.bytes().all(is_field_value_byte) {
        return Err(ParseError::InvalidStatus);
    }

    let headers = parse_header_lines(lines)?;

    let head = ResponseHead {
        version: version.to_string(),
        status,
        reason: reason.to_string(),
        headers,
    };

    Ok((head, headers_end + 4))
}

fn parse_header_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        if key.is_empty() || !key.bytes().all(is_token_byte) {
            return Err(ParseError::InvalidHeader);
        }
        // A bare CR or LF here would end the line for a lenient peer.
        if !value.bytes().all(is_field_value_byte) {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    Ok(headers)
}

pub fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn is_http1_version(version: &str) -> bool {
    matches!(version.as_bytes(), [b'H', b'T', b'T', b'P', b'/', b'1', b'.', d] if d.is_ascii_digit())
}

/// Visible characters, space, tab and obs-text.
fn is_field_value_byte(b: u8) -> bool {
    b == b'\t' || (b >= 0x20 && b != 0x7f)
}

fn is_target_byte(b: u8) -> bool {
    b > 0x20 && b != 0x7f
}
