//! Shared helpers for the end-to-end tests: a scripted backend, a proxy
//! running on an ephemeral port and a raw HTTP client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use kubelet_proxy::gate::RequestGate;
use kubelet_proxy::http::body::{self, BodyFraming};
use kubelet_proxy::http::connection::{MAX_HEADER_SIZE, read_head};
use kubelet_proxy::http::parser::{parse_request_head, parse_response_head};
use kubelet_proxy::http::response::ResponseHead;
use kubelet_proxy::policy::AllowListPolicy;
use kubelet_proxy::proxy::{BackendTarget, ProxyForwarder, Transport, TrustAnchors};
use kubelet_proxy::server;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;

pub const UP: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nup";

/// A backend that answers every request with the same bytes.
pub struct FakeBackend {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub async fn start(response: &'static [u8]) -> Self {
        Self::start_inner(response, None).await
    }

    pub async fn start_tls(response: &'static [u8], acceptor: TlsAcceptor) -> Self {
        Self::start_inner(response, Some(acceptor)).await
    }

    async fn start_inner(response: &'static [u8], acceptor: Option<TlsAcceptor>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let log = Arc::clone(&requests);
        let count = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                count.fetch_add(1, Ordering::SeqCst);
                let log = Arc::clone(&log);
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match acceptor {
                        Some(acceptor) => {
                            if let Ok(tls) = acceptor.accept(socket).await {
                                answer(tls, response, log).await;
                            }
                        }
                        None => answer(socket, response, log).await,
                    }
                });
            }
        });

        Self {
            addr,
            requests,
            connections,
        }
    }

    /// Raw request heads received so far, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

async fn answer<S>(stream: S, response: &'static [u8], log: Arc<Mutex<Vec<String>>>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    while let Ok(Some(raw)) = read_head(&mut stream, MAX_HEADER_SIZE).await {
        let Ok((request, _)) = parse_request_head(&raw) else {
            return;
        };
        log.lock()
            .unwrap()
            .push(String::from_utf8_lossy(&raw).into_owned());

        let framing = BodyFraming::for_request(&request.headers).unwrap();
        let mut sink = Vec::new();
        if body::relay(framing, &mut stream, &mut sink).await.is_err() {
            return;
        }

        if stream.write_all(response).await.is_err() || stream.flush().await.is_err() {
            return;
        }
        if !request.keep_alive() {
            return;
        }
    }
}

/// A backend that accepts connections and never answers.
pub async fn silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// A backend that reads one request, never answers and reports when the
/// proxy closes the connection.
pub async fn hanging_backend() -> (SocketAddr, oneshot::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut seen = Vec::new();
        if socket.read_to_end(&mut seen).await.is_ok() {
            let _ = tx.send(seen);
        }
    });
    (addr, rx)
}

/// A backend that answers the first request head with `response` and then
/// echoes every byte it receives.
pub async fn echo_backend(response: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut stream = BufReader::new(socket);
                if !matches!(read_head(&mut stream, MAX_HEADER_SIZE).await, Ok(Some(_))) {
                    return;
                }
                if stream.write_all(response).await.is_err() {
                    return;
                }
                let (mut reader, mut writer) = tokio::io::split(stream);
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// An address nothing is listening on.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn plain_target(url: &str) -> BackendTarget {
    BackendTarget::new(url, Transport::new(TrustAnchors::WebPki, None).unwrap()).unwrap()
}

/// Starts the gate and forwarder on an ephemeral port.
pub async fn start_proxy(policy: AllowListPolicy, target: BackendTarget) -> SocketAddr {
    let listener = server::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(RequestGate::new(
        Arc::new(policy),
        ProxyForwarder::new(target),
    ));
    tokio::spawn(server::serve(listener, handler));
    addr
}

pub fn metrics_policy() -> AllowListPolicy {
    AllowListPolicy::new(["GET"], ["/metrics"])
}

/// Sends raw bytes and reads until the proxy closes the connection.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

/// Sends a bodiless request with `Connection: close`.
pub async fn send(addr: SocketAddr, method: &str, target: &str) -> String {
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: proxy\r\nConnection: close\r\n\r\n",
        method, target
    );
    send_raw(addr, request.as_bytes()).await
}

/// Reads one response from a kept-alive connection.
pub async fn read_response(stream: &mut BufReader<TcpStream>) -> (ResponseHead, Vec<u8>) {
    let raw = read_head(stream, MAX_HEADER_SIZE).await.unwrap().unwrap();
    let (head, _) = parse_response_head(&raw).unwrap();
    let mut body = Vec::new();
    body::relay(BodyFraming::for_response("GET", &head), stream, &mut body)
        .await
        .unwrap();
    (head, body)
}

pub fn status_of(response: &str) -> u16 {
    response
        .split(' ')
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}

pub fn body_of(response: &str) -> &str {
    response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
}

/// A CA and a `localhost` certificate it signed.
pub struct TestPki {
    pub ca_pem: String,
    pub ca_der: CertificateDer<'static>,
    pub leaf_der: CertificateDer<'static>,
    pub leaf_key: Vec<u8>,
}

impl TestPki {
    pub fn generate() -> Self {
        let mut ca_params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, "kubelet-proxy test CA");
        ca_params.distinguished_name = dn;
        let ca_key = rcgen::KeyPair::generate().unwrap();
        let ca_cert = ca_params.clone().self_signed(&ca_key).unwrap();
        let issuer = rcgen::Issuer::new(ca_params, ca_key);

        let leaf_params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        let leaf_key = rcgen::KeyPair::generate().unwrap();
        let leaf_cert = leaf_params.signed_by(&leaf_key, &issuer).unwrap();

        Self {
            ca_pem: ca_cert.pem(),
            ca_der: ca_cert.der().clone(),
            leaf_der: leaf_cert.der().clone(),
            leaf_key: leaf_key.serialize_der(),
        }
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.leaf_key.clone()));
        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![self.leaf_der.clone(), self.ca_der.clone()], key)
        .unwrap();
        TlsAcceptor::from(Arc::new(config))
    }
}
