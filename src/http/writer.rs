use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::headers::Headers;
use crate::http::response::{Response, ResponseHead};

const HTTP_VERSION: &str = "HTTP/1.1";

fn write_headers(buf: &mut Vec<u8>, headers: &Headers) {
    for (k, v) in headers.iter() {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");
}

fn serialize_response(resp: &Response) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128 + resp.body.len());

    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());
    write_headers(&mut buf, &resp.headers);
    buf.extend_from_slice(&resp.body);

    buf
}

/// Serializes a request line and headers for the backend.
pub fn serialize_request_head(method: &str, target: &str, headers: &Headers) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(format!("{} {} {}\r\n", method, target, HTTP_VERSION).as_bytes());
    write_headers(&mut buf, headers);
    buf
}

/// Serializes a relayed status line and headers for the client.
pub fn serialize_response_head(head: &ResponseHead) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    let status_line = if head.reason.is_empty() {
        format!("{} {}\r\n", HTTP_VERSION, head.status)
    } else {
        format!("{} {} {}\r\n", HTTP_VERSION, head.status, head.reason)
    };
    buf.extend_from_slice(status_line.as_bytes());
    write_headers(&mut buf, &head.headers);
    buf
}

pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self {
            buffer: serialize_response(response),
            written: 0,
        }
    }

    pub async fn write_to_stream<W>(&mut self, stream: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        while self.written < self.buffer.len() {
            let n = stream.write(&self.buffer[self.written..]).await?;

            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "connection closed while writing",
                ));
            }

            self.written += n;
        }

        stream.flush().await
    }
}
