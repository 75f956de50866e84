//! The resolved backend: base URL plus the transport used to reach it.

use std::time::Duration;

use url::{Host, Url};

use crate::error::{ProxyError, Result};
use crate::http::request::Request;
use crate::proxy::transport::{Endpoint, Transport};

/// Fixed for the lifetime of the process once resolved.
pub struct BackendTarget {
    base_url: Url,
    endpoint: Endpoint,
    authority: String,
    transport: Transport,
}

impl std::fmt::Debug for BackendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendTarget")
            .field("base_url", &self.base_url)
            .field("endpoint", &self.endpoint)
            .field("authority", &self.authority)
            .finish_non_exhaustive()
    }
}

impl BackendTarget {
    /// Parses and validates `base_url`.
    ///
    /// Only `http` and `https` URLs with a host are accepted.
    pub fn new(base_url: &str, transport: Transport) -> Result<Self> {
        let url = Url::parse(base_url)
            .map_err(|e| ProxyError::Config(format!("invalid backend URL '{}': {}", base_url, e)))?;

        let tls = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(ProxyError::Config(format!(
                    "unsupported backend URL scheme '{}' in '{}'",
                    other, base_url
                )));
            }
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => {
                return Err(ProxyError::Config(format!(
                    "missing host in backend URL '{}'",
                    base_url
                )));
            }
        };

        let port = url
            .port_or_known_default()
            .ok_or_else(|| ProxyError::Config(format!("missing port in backend URL '{}'", base_url)))?;

        // `host_str` keeps IPv6 brackets; `port` is only set when non-default.
        let authority = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            (None, _) => host.clone(),
        };

        Ok(Self {
            base_url: url,
            endpoint: Endpoint { host, port, tls },
            authority,
            transport,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transport = self.transport.with_timeout(timeout);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn scheme(&self) -> &str {
        self.base_url.scheme()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The value sent as the outbound `Host` header.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// The origin-form request target sent to the backend.
    ///
    /// The request path and query are kept as received. A base URL with a
    /// path of its own is joined in front with a single slash, and a base
    /// query is placed before the request query.
    pub fn outbound_target(&self, request: &Request) -> String {
        let path = join_path(self.base_url.path(), request.path());

        match (self.base_url.query(), request.query()) {
            (Some(base), Some(q)) if !base.is_empty() && !q.is_empty() => {
                format!("{}?{}&{}", path, base, q)
            }
            (Some(base), _) if !base.is_empty() => format!("{}?{}", path, base),
            (_, Some(q)) => format!("{}?{}", path, q),
            _ => path,
        }
    }
}

fn join_path(base: &str, path: &str) -> String {
    if base.is_empty() || base == "/" {
        return if path.is_empty() { "/".to_string() } else { path.to_string() };
    }

    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}
