//! The shared outbound transport.
//!
//! One `Transport` is built at startup and used for every forwarded request.
//! It owns the TLS client configuration, the optional bearer token and a pool
//! of idle keep-alive connections to the backend.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, trace};

use crate::error::{ProxyError, Result};
use crate::http::headers::Headers;
use crate::proxy::credential::BearerToken;

/// Idle connections kept for reuse.
const MAX_IDLE_CONNECTIONS: usize = 16;

/// Idle connections older than this are discarded instead of reused.
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Which server certificates the transport accepts.
#[derive(Debug, Clone)]
pub enum TrustAnchors {
    /// The bundled Mozilla root store.
    WebPki,
    /// Only certificates chaining to these CAs.
    Bundle(Vec<CertificateDer<'static>>),
    /// Any certificate. Only for `--kubelet-api-insecure-skip-verify`.
    InsecureSkipVerify,
}

/// Where the backend lives, derived from the base URL.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// A connection to the backend, plain or TLS.
pub enum BackendStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl BackendStream {
    fn tcp(&self) -> &TcpStream {
        match self {
            BackendStream::Plain(s) => s,
            BackendStream::Tls(s) => s.get_ref().0,
        }
    }

    /// False if the peer has closed the socket or sent unsolicited bytes.
    fn is_idle_and_open(&self) -> bool {
        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        let mut cx = Context::from_waker(Waker::noop());
        matches!(self.tcp().poll_peek(&mut cx, &mut buf), Poll::Pending)
    }
}

impl AsyncRead for BackendStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            BackendStream::Tls(s) => Pin::new(&mut **s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BackendStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            BackendStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            BackendStream::Tls(s) => Pin::new(&mut **s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(s) => Pin::new(s).poll_flush(cx),
            BackendStream::Tls(s) => Pin::new(&mut **s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            BackendStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            BackendStream::Tls(s) => Pin::new(&mut **s).poll_shutdown(cx),
        }
    }
}

/// A buffered backend connection checked out of the transport.
pub struct BackendConn {
    pub stream: BufReader<BackendStream>,
    /// True if the connection came from the idle pool.
    pub reused: bool,
}

struct IdleConn {
    stream: BufReader<BackendStream>,
    since: Instant,
}

pub struct Transport {
    tls: TlsConnector,
    bearer: Option<Arc<BearerToken>>,
    timeout: Option<Duration>,
    idle: Mutex<Vec<IdleConn>>,
}

impl Transport {
    pub fn new(trust: TrustAnchors, bearer: Option<BearerToken>) -> Result<Self> {
        Ok(Self {
            tls: tls_connector(trust)?,
            bearer: bearer.map(Arc::new),
            timeout: None,
            idle: Mutex::new(Vec::new()),
        })
    }

    /// Bounds connecting and waiting for a response head. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn has_bearer_token(&self) -> bool {
        self.bearer.is_some()
    }

    /// Adds the bearer token unless the request already carries credentials.
    pub fn authorize(&self, headers: &mut Headers) {
        if let Some(bearer) = &self.bearer {
            if !headers.contains("Authorization") {
                headers.set("Authorization", bearer.header_value().as_str());
            }
        }
    }

    /// Returns an idle pooled connection if one is usable, or dials a new one.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<BackendConn> {
        if let Some(stream) = self.take_idle() {
            trace!(host = %endpoint.host, "Reusing idle backend connection");
            return Ok(BackendConn {
                stream,
                reused: true,
            });
        }

        let stream = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.dial(endpoint))
                .await
                .map_err(|_| ProxyError::Timeout)??,
            None => self.dial(endpoint).await?,
        };

        Ok(BackendConn {
            stream: BufReader::new(stream),
            reused: false,
        })
    }

    /// Hands a connection whose last response was fully read back to the pool.
    pub fn release(&self, conn: BackendConn) {
        if !conn.stream.buffer().is_empty() {
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(IdleConn {
                stream: conn.stream,
                since: Instant::now(),
            });
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn take_idle(&self) -> Option<BufReader<BackendStream>> {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(conn) = idle.pop() {
            if conn.since.elapsed() < IDLE_TIMEOUT && conn.stream.get_ref().is_idle_and_open() {
                return Some(conn.stream);
            }
            debug!("Discarding stale backend connection");
        }
        None
    }

    async fn dial(&self, endpoint: &Endpoint) -> Result<BackendStream> {
        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| ProxyError::UpstreamConnect {
                host: endpoint.host.clone(),
                reason: e.to_string(),
            })?;
        // Best effort.
        let _ = tcp.set_nodelay(true);

        if !endpoint.tls {
            return Ok(BackendStream::Plain(tcp));
        }

        let server_name = ServerName::try_from(endpoint.host.clone()).map_err(|_| {
            ProxyError::UpstreamConnect {
                host: endpoint.host.clone(),
                reason: "invalid server name for TLS".to_string(),
            }
        })?;

        let tls = self
            .tls
            .connect(server_name, tcp)
            .await
            .map_err(|e| ProxyError::UpstreamConnect {
                host: endpoint.host.clone(),
                reason: format!("TLS handshake failed: {}", e),
            })?;

        Ok(BackendStream::Tls(Box::new(tls)))
    }
}

fn tls_connector(trust: TrustAnchors) -> Result<TlsConnector> {
    // Select ring explicitly so the process-wide default provider never matters.
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| ProxyError::Config(format!("TLS config error: {}", e)))?;

    let mut config = match trust {
        TrustAnchors::WebPki => {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        TrustAnchors::Bundle(certs) => {
            let mut roots = RootCertStore::empty();
            for cert in certs {
                roots
                    .add(cert)
                    .map_err(|e| ProxyError::Credential(format!("invalid CA certificate: {}", e)))?;
            }
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        TrustAnchors::InsecureSkipVerify => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth(),
    };

    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
