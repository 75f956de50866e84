use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::error::{ProxyError, Result};
use crate::http::handler::{Disposition, Handler, respond};
use crate::http::parser::parse_request_head;
use crate::http::request::Request;
use crate::http::response::Response;

/// Maximum total size of a message head (64 KiB).
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

pub struct Connection<S, H> {
    stream: BufReader<S>,
    peer: Option<SocketAddr>,
    handler: Arc<H>,
    state: ConnectionState,
}

pub enum ConnectionState {
    Reading,
    Dispatching(Request),
    Closed,
}

impl<S, H> Connection<S, H>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: Handler,
{
    pub fn new(stream: S, peer: Option<SocketAddr>, handler: Arc<H>) -> Self {
        Self {
            stream: BufReader::new(stream),
            peer,
            handler,
            state: ConnectionState::Reading,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    self.state = match self.read_request().await? {
                        Some(req) => ConnectionState::Dispatching(req),
                        None => ConnectionState::Closed,
                    };
                }

                ConnectionState::Dispatching(mut req) => {
                    req.remote_addr = self.peer;
                    self.state = match self.handler.handle(req, &mut self.stream).await {
                        Ok(Disposition::KeepAlive) => ConnectionState::Reading,
                        Ok(Disposition::Close) => ConnectionState::Closed,
                        Err(e) => {
                            debug!(peer = ?self.peer, error = %e, "Request handling aborted");
                            ConnectionState::Closed
                        }
                    };
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        // The peer may already be gone; nothing useful to do with the error.
        let _ = self.stream.get_mut().shutdown().await;
        Ok(())
    }

    /// Reads the next request head.
    ///
    /// Returns `None` when the client closed the connection between requests
    /// or sent something unparseable (after answering it with an error).
    pub async fn read_request(&mut self) -> Result<Option<Request>> {
        let head = match read_head(&mut self.stream, MAX_HEADER_SIZE).await {
            Ok(Some(head)) => head,
            Ok(None) => return Ok(None),
            Err(ProxyError::HeaderTooLarge) => {
                respond(&mut self.stream, Response::header_too_large(), false).await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match parse_request_head(&head) {
            Ok((request, _)) => Ok(Some(request)),
            Err(e) => {
                debug!(peer = ?self.peer, error = %e, "Malformed request head");
                respond(&mut self.stream, Response::bad_request(), false).await?;
                Ok(None)
            }
        }
    }
}

/// Reads one message head, up to and including the blank line that ends it.
///
/// Returns `None` on a clean EOF before the first byte. Empty lines before the
/// start line are skipped.
pub async fn read_head<R>(src: &mut R, limit: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut head = Vec::with_capacity(1024);

    loop {
        let start = head.len();
        let budget = (limit - start) as u64;
        let n = (&mut *src).take(budget).read_until(b'\n', &mut head).await?;

        if n == 0 {
            if head.is_empty() {
                return Ok(None);
            }
            if head.len() >= limit {
                return Err(ProxyError::HeaderTooLarge);
            }
            return Err(ProxyError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed inside message head",
            )));
        }

        let line = &head[start..];
        if line.last() != Some(&b'\n') {
            // `take` ran out before the line ended.
            return Err(ProxyError::HeaderTooLarge);
        }

        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                head.clear();
                continue;
            }
            return Ok(Some(head));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::ClientIo;
    use crate::http::response::StatusCode;

    struct Hello;

    impl Handler for Hello {
        async fn handle<C: ClientIo>(&self, request: Request, client: &mut C) -> Result<Disposition> {
            let keep_alive = request.keep_alive();
            respond(client, Response::text(StatusCode::Ok, "hello"), keep_alive).await
        }
    }

    async fn exchange(input: &[u8]) -> String {
        let (mut client, server) = tokio::io::duplex(128 * 1024);
        let task = tokio::spawn(async move {
            Connection::new(server, None, Arc::new(Hello)).run().await
        });

        client.write_all(input).await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        task.await.unwrap().unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn keep_alive_serves_pipelined_requests() {
        let out = exchange(
            b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(out.ends_with("hello\n"));
    }

    #[tokio::test]
    async fn oversized_request_gets_431() {
        let mut input = b"GET / HTTP/1.1\r\nX-Pad: ".to_vec();
        input.extend(std::iter::repeat_n(b'a', MAX_HEADER_SIZE));
        input.extend_from_slice(b"\r\n\r\n");
        let out = exchange(&input).await;
        assert!(out.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"));
    }

    #[tokio::test]
    async fn malformed_request_gets_400() {
        let out = exchange(b"NOT A REQUEST\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(out.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn head_stops_at_blank_line() {
        let mut src = &b"\r\nGET / HTTP/1.1\r\nHost: a\r\n\r\nrest"[..];
        let head = read_head(&mut src, 1024).await.unwrap().unwrap();
        assert_eq!(head, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
        assert_eq!(src, b"rest");
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let mut src = &b"GET / HTTP/1.1\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n"[..];
        let err = read_head(&mut src, 24).await.unwrap_err();
        assert!(matches!(err, ProxyError::HeaderTooLarge));
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let mut src = &b""[..];
        assert!(read_head(&mut src, 1024).await.unwrap().is_none());
    }
}
