//! Request forwarding to the backend.
//!
//! This module rewrites a permitted request onto the backend target, streams
//! the request body up and the response back down, and turns backend failures
//! into gateway errors.

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{ProxyError, Result};
use crate::http::body::{self, BodyFraming};
use crate::http::connection::{MAX_HEADER_SIZE, read_head};
use crate::http::handler::{ClientIo, Disposition, Handler, respond};
use crate::http::headers::Headers;
use crate::http::parser::parse_response_head;
use crate::http::request::Request;
use crate::http::response::{Response, ResponseHead};
use crate::http::writer::{serialize_request_head, serialize_response_head};
use crate::proxy::target::BackendTarget;
use crate::proxy::transport::BackendConn;

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Forwards requests to a single backend over its shared transport.
pub struct ProxyForwarder {
    target: BackendTarget,
}

impl ProxyForwarder {
    pub fn new(target: BackendTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &BackendTarget {
        &self.target
    }

    /// Builds the headers sent to the backend for `request`.
    ///
    /// Hop-by-hop headers are dropped, `Host` names the backend, the client
    /// address is appended to `X-Forwarded-For` and the transport adds its
    /// credentials.
    pub fn outbound_headers(&self, request: &Request, framing: BodyFraming) -> Headers {
        let mut headers = request.headers.clone();
        let upgrade = request
            .is_upgrade()
            .then(|| request.header("Upgrade").map(str::to_string))
            .flatten();

        headers.remove_hop_by_hop();
        headers.remove("Expect");
        headers.set("Host", self.target.authority());

        if let Some(addr) = request.remote_addr {
            append_forwarded_for(&mut headers, addr);
        }

        self.target.transport().authorize(&mut headers);
        framing.apply(&mut headers);

        if let Some(protocol) = upgrade {
            headers.set("Connection", "Upgrade");
            headers.set("Upgrade", protocol);
        }

        headers
    }

    async fn forward<C: ClientIo>(
        &self,
        request: &Request,
        framing: BodyFraming,
        client: &mut C,
        response_started: &mut bool,
    ) -> Result<Disposition> {
        let transport = self.target.transport();

        let head = serialize_request_head(
            &request.method,
            &self.target.outbound_target(request),
            &self.outbound_headers(request, framing),
        );

        let mut conn = transport.connect(self.target.endpoint()).await?;
        conn.stream.write_all(&head).await?;

        if framing != BodyFraming::Empty {
            if request.headers.has_token("Expect", "100-continue") {
                client.write_all(CONTINUE).await?;
                client.flush().await?;
            }
            body::relay(framing, client, &mut conn.stream).await?;
        } else {
            conn.stream.flush().await?;
        }

        let response = loop {
            let head = self.await_response_head(&mut conn, client).await?;
            if !head.is_informational() {
                break head;
            }
            // 100 Continue was already answered locally.
            if head.status != 100 {
                client.write_all(&serialize_response_head(&head)).await?;
                client.flush().await?;
            }
        };

        if response.is_switching_protocols() {
            return self.splice_upgrade(request, response, conn, client, response_started).await;
        }

        let resp_framing = BodyFraming::for_response(&request.method, &response);
        let backend_reusable = !response.wants_close() && resp_framing != BodyFraming::UntilClose;
        // HTTP/1.0 clients get the decoded payload, delimited by closing.
        let dechunk = request.is_http10() && resp_framing == BodyFraming::Chunked;
        let keep_alive =
            request.keep_alive() && resp_framing != BodyFraming::UntilClose && !dechunk;

        let status = response.status;
        let mut out = response;
        out.headers.remove_hop_by_hop();
        if !dechunk {
            resp_framing.apply(&mut out.headers);
        }
        if !keep_alive {
            out.headers.set("Connection", "close");
        } else if request.is_http10() {
            out.headers.set("Connection", "keep-alive");
        }

        *response_started = true;
        client.write_all(&serialize_response_head(&out)).await?;
        let bytes = if dechunk {
            body::relay_dechunked(&mut conn.stream, client).await?
        } else {
            body::relay(resp_framing, &mut conn.stream, client).await?
        };

        info!(
            method = %request.method,
            path = %request.path(),
            status,
            bytes,
            reused = conn.reused,
            "Request forwarded"
        );

        if backend_reusable {
            transport.release(conn);
        }

        Ok(if keep_alive {
            Disposition::KeepAlive
        } else {
            Disposition::Close
        })
    }

    /// Waits for the next response head from the backend.
    ///
    /// Gives up if the client disconnects first or the transport timeout
    /// expires, dropping the backend connection either way.
    async fn await_response_head<C: ClientIo>(
        &self,
        conn: &mut BackendConn,
        client: &mut C,
    ) -> Result<ResponseHead> {
        let read = async {
            let raw = read_head(&mut conn.stream, MAX_HEADER_SIZE)
                .await?
                .ok_or_else(|| ProxyError::UpstreamConnect {
                    host: self.target.endpoint().host.clone(),
                    reason: "connection closed before response".to_string(),
                })?;
            parse_response_head(&raw)
                .map(|(head, _)| head)
                .map_err(|e| ProxyError::HttpParse(format!("backend response: {}", e)))
        };

        let limit = self.target.transport().timeout();
        let bounded = async move {
            match limit {
                Some(limit) => match tokio::time::timeout(limit, read).await {
                    Ok(head) => head,
                    Err(_) => Err(ProxyError::Timeout),
                },
                None => read.await,
            }
        };

        tokio::select! {
            head = bounded => head,
            _ = client_gone(client) => Err(ProxyError::ClientClosed),
        }
    }

    async fn splice_upgrade<C: ClientIo>(
        &self,
        request: &Request,
        mut response: ResponseHead,
        mut conn: BackendConn,
        client: &mut C,
        response_started: &mut bool,
    ) -> Result<Disposition> {
        let protocol = response.headers.get("Upgrade").map(str::to_string);
        let protocol = match (request.is_upgrade(), protocol) {
            (true, Some(protocol)) => protocol,
            _ => {
                return Err(ProxyError::HttpParse(
                    "backend switched protocols without an upgrade request".to_string(),
                ));
            }
        };

        response.headers.remove_hop_by_hop();
        response.headers.set("Connection", "Upgrade");
        response.headers.set("Upgrade", protocol.as_str());

        *response_started = true;
        client.write_all(&serialize_response_head(&response)).await?;
        client.flush().await?;

        info!(
            method = %request.method,
            path = %request.path(),
            protocol = %protocol,
            "Connection upgraded"
        );

        let (up, down) = tokio::io::copy_bidirectional(client, &mut conn.stream).await?;
        debug!(up, down, "Upgraded connection closed");
        Ok(Disposition::Close)
    }
}

impl Handler for ProxyForwarder {
    async fn handle<C: ClientIo>(&self, request: Request, client: &mut C) -> Result<Disposition> {
        let framing = match BodyFraming::for_request(&request.headers) {
            Ok(framing) => framing,
            Err(e) => {
                debug!(method = %request.method, error = %e, "Unusable request body framing");
                return respond(client, Response::bad_request(), false).await;
            }
        };

        let mut response_started = false;

        match self.forward(&request, framing, client, &mut response_started).await {
            Ok(disposition) => Ok(disposition),
            Err(ProxyError::ClientClosed) => Err(ProxyError::ClientClosed),
            Err(e) if response_started => Err(e),
            Err(e) => {
                let response = match e {
                    ProxyError::Timeout => Response::gateway_timeout(),
                    _ => Response::bad_gateway(),
                };
                warn!(
                    method = %request.method,
                    path = %request.path(),
                    backend = %self.target.base_url(),
                    status = response.status.as_u16(),
                    error = %e,
                    "Forwarding failed"
                );
                // Whether the request body was fully read is unknown here.
                respond(client, response, false).await
            }
        }
    }
}

/// Resolves once the client has closed its side of the connection.
///
/// Pipelined bytes from the client do not count; in that case this never
/// resolves.
async fn client_gone<C: ClientIo>(client: &mut C) {
    match client.fill_buf().await {
        Ok(buf) if !buf.is_empty() => std::future::pending::<()>().await,
        _ => {}
    }
}

fn append_forwarded_for(headers: &mut Headers, addr: SocketAddr) {
    let ip = addr.ip().to_string();
    let prior: Vec<&str> = headers.get_all("X-Forwarded-For").collect();
    let value = if prior.is_empty() {
        ip
    } else {
        format!("{}, {}", prior.join(", "), ip)
    };
    headers.set("X-Forwarded-For", value);
}
