//! Backend credential and endpoint resolution.
//!
//! Runs once at startup. Inside a Kubernetes pod the service-account token
//! and CA bundle are mounted at well-known paths and the API server address is
//! advertised through environment variables; outside a pod none of that
//! exists and the proxy falls back to the local kubelet.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use rustls::pki_types::CertificateDer;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::{ProxyError, Result};
use crate::proxy::target::BackendTarget;
use crate::proxy::transport::{Transport, TrustAnchors};

/// Where Kubernetes mounts service-account credentials into a pod.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Backend used when neither an explicit endpoint nor a cluster is available.
pub const DEFAULT_KUBELET_ENDPOINT: &str = "https://localhost:10250";

/// How long a token read from disk is trusted before it is read again.
const TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// The parts of the process environment that reveal an in-cluster context.
#[derive(Debug, Clone)]
pub struct ClusterEnv {
    pub service_host: Option<String>,
    pub service_port: Option<String>,
    pub service_account_dir: PathBuf,
}

impl ClusterEnv {
    pub fn from_process() -> Self {
        Self {
            service_host: std::env::var("KUBERNETES_SERVICE_HOST").ok(),
            service_port: std::env::var("KUBERNETES_SERVICE_PORT").ok(),
            service_account_dir: PathBuf::from(SERVICE_ACCOUNT_DIR),
        }
    }

    fn token_path(&self) -> PathBuf {
        self.service_account_dir.join("token")
    }

    fn ca_path(&self) -> PathBuf {
        self.service_account_dir.join("ca.crt")
    }
}

/// A bearer token, re-read from its file once the cached copy gets old.
///
/// Projected service-account tokens are rotated by the kubelet, so a token
/// read once at startup eventually expires.
pub struct BearerToken {
    file: Option<PathBuf>,
    refresh_every: Duration,
    cached: RwLock<CachedToken>,
}

struct CachedToken {
    value: Zeroizing<String>,
    read_at: Instant,
}

impl BearerToken {
    /// A token that never changes.
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            file: None,
            refresh_every: Duration::MAX,
            cached: RwLock::new(CachedToken {
                value: Zeroizing::new(token.into()),
                read_at: Instant::now(),
            }),
        }
    }

    /// Reads the token from `path` now and again whenever it goes stale.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_file_with_refresh(path, TOKEN_REFRESH_INTERVAL)
    }

    /// Like [`BearerToken::from_file`], re-reading once the cached token is
    /// older than `refresh_every`.
    pub fn from_file_with_refresh(path: &Path, refresh_every: Duration) -> Result<Self> {
        let value = read_token(path)?;
        Ok(Self {
            file: Some(path.to_path_buf()),
            refresh_every,
            cached: RwLock::new(CachedToken {
                value,
                read_at: Instant::now(),
            }),
        })
    }

    /// The current token.
    pub fn token(&self) -> Zeroizing<String> {
        if let Some(path) = &self.file {
            let stale = self
                .cached
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .read_at
                .elapsed()
                >= self.refresh_every;
            if stale {
                self.refresh(path);
            }
        }
        self.cached.read().unwrap_or_else(|e| e.into_inner()).value.clone()
    }

    /// `Bearer <token>`, ready for an Authorization header.
    pub fn header_value(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("Bearer {}", self.token().as_str()))
    }

    fn refresh(&self, path: &Path) {
        let fresh = read_token(path);
        let mut cached = self.cached.write().unwrap_or_else(|e| e.into_inner());
        match fresh {
            Ok(value) => cached.value = value,
            Err(e) => warn!(error = %e, "Keeping previous bearer token"),
        }
        // A failed read is not retried on every request.
        cached.read_at = Instant::now();
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerToken")
            .field("file", &self.file)
            .field("value", &"<redacted>")
            .finish()
    }
}

fn read_token(path: &Path) -> Result<Zeroizing<String>> {
    let raw = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
        ProxyError::Credential(format!(
            "reading service account token {}: {}",
            path.display(),
            e
        ))
    })?);
    Ok(Zeroizing::new(raw.trim().to_string()))
}

/// Credentials supplied by the surrounding cluster.
#[derive(Debug)]
pub struct InClusterCredentials {
    /// The API server address, e.g. `https://10.96.0.1:443`.
    pub host: String,
    pub token: BearerToken,
    /// The cluster CA, when it could be loaded.
    pub ca: Option<Vec<CertificateDer<'static>>>,
}

/// Where the credentials for reaching the backend come from.
#[derive(Debug)]
pub enum CredentialSource {
    InCluster(InClusterCredentials),
    Standalone,
}

impl CredentialSource {
    /// Detects the execution context.
    ///
    /// Missing service environment variables mean "not in a cluster" and
    /// yield `Standalone`. Once in a cluster, an unreadable token is an error;
    /// an unusable CA bundle only falls back to the default trust roots.
    pub fn detect(env: &ClusterEnv) -> Result<Self> {
        let (host, port) = match (env.service_host.as_deref(), env.service_port.as_deref()) {
            (Some(host), Some(port)) if !host.is_empty() && !port.is_empty() => (host, port),
            _ => return Ok(CredentialSource::Standalone),
        };

        let token = BearerToken::from_file(&env.token_path())?;

        let ca_path = env.ca_path();
        let ca = match load_ca_bundle(&ca_path) {
            Ok(certs) => Some(certs),
            Err(e) => {
                warn!(
                    path = %ca_path.display(),
                    error = %e,
                    "Expected to load root CA config, using default roots"
                );
                None
            }
        };

        Ok(CredentialSource::InCluster(InClusterCredentials {
            host: format!("https://{}", join_host_port(host, port)),
            token,
            ca,
        }))
    }

    pub fn is_in_cluster(&self) -> bool {
        matches!(self, CredentialSource::InCluster(_))
    }
}

/// Resolves the backend target and the transport used to reach it.
pub struct CredentialResolver {
    env: ClusterEnv,
}

impl CredentialResolver {
    pub fn new(env: ClusterEnv) -> Self {
        Self { env }
    }

    pub fn from_env() -> Self {
        Self::new(ClusterEnv::from_process())
    }

    /// Builds the backend target.
    ///
    /// An explicit endpoint always wins; otherwise the in-cluster host is
    /// used, otherwise [`DEFAULT_KUBELET_ENDPOINT`]. With
    /// `insecure_skip_verify` any server certificate is accepted and cluster
    /// CA data is ignored.
    pub fn resolve(
        &self,
        insecure_skip_verify: bool,
        explicit_endpoint: Option<&str>,
    ) -> Result<BackendTarget> {
        let source = CredentialSource::detect(&self.env)?;

        let (base_url, trust, bearer) = match source {
            CredentialSource::InCluster(creds) => {
                let trust = match (insecure_skip_verify, creds.ca) {
                    (true, _) => TrustAnchors::InsecureSkipVerify,
                    (false, Some(ca)) => TrustAnchors::Bundle(ca),
                    (false, None) => TrustAnchors::WebPki,
                };
                let base_url = explicit_endpoint.map(str::to_string).unwrap_or(creds.host);
                (base_url, trust, Some(creds.token))
            }
            CredentialSource::Standalone => {
                let trust = if insecure_skip_verify {
                    TrustAnchors::InsecureSkipVerify
                } else {
                    TrustAnchors::WebPki
                };
                let base_url = explicit_endpoint.unwrap_or(DEFAULT_KUBELET_ENDPOINT).to_string();
                (base_url, trust, None)
            }
        };

        let in_cluster = bearer.is_some();
        let target = BackendTarget::new(&base_url, Transport::new(trust, bearer)?)?;

        info!(
            backend = %target.base_url(),
            in_cluster,
            insecure_skip_verify,
            "Resolved backend target"
        );

        Ok(target)
    }
}

/// Loads every certificate from a PEM bundle.
pub fn load_ca_bundle(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| ProxyError::Credential(format!("opening {}: {}", path.display(), e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::Credential(format!("parsing {}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(ProxyError::Credential(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// `host:port`, bracketing IPv6 literals.
fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
