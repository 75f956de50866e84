use std::net::SocketAddr;

use crate::http::headers::Headers;

/// Represents the head of an HTTP request received from a client.
///
/// The body is not part of this type: it stays on the connection and is
/// streamed by whoever handles the request.
#[derive(Debug, Clone)]
pub struct Request {
    /// The HTTP method exactly as sent (e.g. "GET"). Never case-normalized.
    pub method: String,
    /// The request target (e.g. "/metrics?format=text")
    pub target: String,
    /// HTTP version (typically "HTTP/1.1")
    pub version: String,
    /// Request headers in received order
    pub headers: Headers,
    /// Address of the client that sent the request, when known
    pub remote_addr: Option<SocketAddr>,
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Option<String>,
    target: Option<String>,
    version: Option<String>,
    headers: Headers,
    remote_addr: Option<SocketAddr>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            target: None,
            version: None,
            headers: Headers::new(),
            remote_addr: None,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        Ok(Request {
            method: self.method.ok_or("method missing")?,
            target: self.target.ok_or("target missing")?,
            version: self.version.unwrap_or_else(|| "HTTP/1.1".to_string()),
            headers: self.headers,
            remote_addr: self.remote_addr,
        })
    }
}

impl Request {
    /// The path component of the request target, without the query string.
    ///
    /// Absolute-form targets (`http://host/path`) are reduced to their path.
    pub fn path(&self) -> &str {
        let target = strip_authority(&self.target);
        let end = target.find(['?', '#']).unwrap_or(target.len());
        &target[..end]
    }

    /// The raw query string, if the target carries one.
    pub fn query(&self) -> Option<&str> {
        let target = strip_authority(&self.target);
        let (_, rest) = target.split_once('?')?;
        Some(rest.split('#').next().unwrap_or(rest))
    }

    /// Retrieves the first header value by name (case-insensitive).
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close` is sent.
    /// HTTP/1.0 defaults to close unless `Connection: keep-alive` is sent.
    pub fn keep_alive(&self) -> bool {
        if self.headers.has_token("Connection", "close") {
            return false;
        }
        if self.is_http10() {
            return self.headers.has_token("Connection", "keep-alive");
        }
        true
    }

    /// HTTP/1.0 clients need keep-alive spelled out and cannot read chunked bodies.
    pub fn is_http10(&self) -> bool {
        self.version.eq_ignore_ascii_case("HTTP/1.0")
    }

    /// True if the client asks to switch protocols on this connection.
    pub fn is_upgrade(&self) -> bool {
        self.headers.has_token("Connection", "upgrade") && self.headers.contains("Upgrade")
    }
}

fn strip_authority(target: &str) -> &str {
    if target.starts_with('/') {
        return target;
    }
    match target.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or("/"),
        None => target,
    }
}
