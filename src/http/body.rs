//! Message body framing and streaming relay.
//!
//! Bodies are never buffered whole. A relay copies bytes from one stream to
//! the other as they arrive, using the framing to know where the body ends so
//! that both connections can be reused afterwards.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::http::headers::Headers;
use crate::http::parser::ParseError;
use crate::http::response::ResponseHead;

/// Longest chunk-size or trailer line accepted in a chunked body.
const MAX_CHUNK_LINE: u64 = 4096;

/// How the end of a message body is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body follows the head.
    Empty,
    /// Exactly this many bytes follow.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// The body runs until the sender closes the connection (responses only).
    UntilClose,
}

impl BodyFraming {
    /// Framing of a request body as announced by its headers.
    pub fn for_request(headers: &Headers) -> Result<Self, ParseError> {
        if headers.contains("Transfer-Encoding") {
            return if is_chunked(headers) {
                Ok(BodyFraming::Chunked)
            } else {
                Err(ParseError::InvalidHeader)
            };
        }

        match content_length(headers)? {
            Some(0) | None => Ok(BodyFraming::Empty),
            Some(n) => Ok(BodyFraming::Length(n)),
        }
    }

    /// Framing of a response body, which also depends on the request method.
    pub fn for_response(request_method: &str, head: &ResponseHead) -> Self {
        if request_method == "HEAD"
            || (100..200).contains(&head.status)
            || head.status == 204
            || head.status == 304
        {
            return BodyFraming::Empty;
        }

        if head.headers.contains("Transfer-Encoding") {
            return if is_chunked(&head.headers) {
                BodyFraming::Chunked
            } else {
                BodyFraming::UntilClose
            };
        }

        match content_length(&head.headers) {
            Ok(Some(0)) => BodyFraming::Empty,
            Ok(Some(n)) => BodyFraming::Length(n),
            _ => BodyFraming::UntilClose,
        }
    }

    /// Rewrites the framing headers of an outgoing message to match `self`.
    ///
    /// Expects hop-by-hop headers to have been stripped already.
    pub fn apply(&self, headers: &mut Headers) {
        match self {
            BodyFraming::Chunked => {
                headers.remove("Content-Length");
                headers.set("Transfer-Encoding", "chunked");
            }
            BodyFraming::Length(n) => headers.set("Content-Length", n.to_string()),
            BodyFraming::Empty | BodyFraming::UntilClose => {}
        }
    }
}

fn is_chunked(headers: &Headers) -> bool {
    headers
        .get_all("Transfer-Encoding")
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .last()
        .is_some_and(|t| t.eq_ignore_ascii_case("chunked"))
}

/// Parses Content-Length, rejecting conflicting duplicates.
fn content_length(headers: &Headers) -> Result<Option<u64>, ParseError> {
    let mut found = None;
    for value in headers.get_all("Content-Length").flat_map(|v| v.split(',')) {
        let n: u64 = value
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidHeader)?;
        match found {
            Some(prev) if prev != n => return Err(ParseError::InvalidHeader),
            _ => found = Some(n),
        }
    }
    Ok(found)
}

/// Copies one body, framed as `framing`, from `src` to `dst`.
///
/// Returns the number of bytes read from `src`. Chunked bodies are relayed
/// with their chunk boundaries and trailers intact.
pub async fn relay<R, W>(framing: BodyFraming, src: &mut R, dst: &mut W) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let copied = match framing {
        BodyFraming::Empty => 0,
        BodyFraming::Length(n) => {
            let copied = tokio::io::copy_buf(&mut (&mut *src).take(n), dst).await?;
            if copied < n {
                return Err(unexpected_eof("body shorter than Content-Length"));
            }
            copied
        }
        BodyFraming::UntilClose => tokio::io::copy_buf(src, dst).await?,
        BodyFraming::Chunked => relay_chunked(src, dst, false).await?,
    };

    dst.flush().await?;
    Ok(copied)
}

/// Copies a chunked body from `src` to `dst` as plain bytes.
///
/// Chunk framing and trailers are consumed and dropped, so the receiver sees
/// only the payload. Returns the number of payload bytes written.
pub async fn relay_dechunked<R, W>(src: &mut R, dst: &mut W) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let copied = relay_chunked(src, dst, true).await?;
    dst.flush().await?;
    Ok(copied)
}

async fn relay_chunked<R, W>(src: &mut R, dst: &mut W, decode: bool) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut total = 0u64;
    let mut line = Vec::with_capacity(32);

    loop {
        read_line(src, &mut line).await?;
        if !decode {
            dst.write_all(&line).await?;
            total += line.len() as u64;
        }

        let size = parse_chunk_size(&line)?;
        if size == 0 {
            break;
        }

        let copied = tokio::io::copy_buf(&mut (&mut *src).take(size), dst).await?;
        if copied < size {
            return Err(unexpected_eof("chunk shorter than announced"));
        }
        total += copied;

        let mut crlf = [0u8; 2];
        src.read_exact(&mut crlf).await?;
        if &crlf != b"\r\n" {
            return Err(invalid_data("missing CRLF after chunk data"));
        }
        if !decode {
            dst.write_all(&crlf).await?;
            total += 2;
        }
    }

    // Trailer section ends with an empty line.
    loop {
        read_line(src, &mut line).await?;
        if !decode {
            dst.write_all(&line).await?;
            total += line.len() as u64;
        }
        if line == b"\r\n" || line == b"\n" {
            return Ok(total);
        }
    }
}

async fn read_line<R>(src: &mut R, line: &mut Vec<u8>) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    line.clear();
    let n = (&mut *src).take(MAX_CHUNK_LINE).read_until(b'\n', line).await?;
    if n == 0 {
        return Err(unexpected_eof("connection closed inside chunked body"));
    }
    if line.last() != Some(&b'\n') {
        return Err(invalid_data("chunk line too long"));
    }
    Ok(())
}

fn parse_chunk_size(line: &[u8]) -> std::io::Result<u64> {
    let text = std::str::from_utf8(line).map_err(|_| invalid_data("chunk size is not UTF-8"))?;
    let size = text.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(size, 16).map_err(|_| invalid_data("invalid chunk size"))
}

fn unexpected_eof(msg: &'static str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, msg)
}

fn invalid_data(msg: &'static str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}
