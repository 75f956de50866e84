//! Reverse proxy functionality
//!
//! Resolution of the backend and its credentials, the outbound transport and
//! the forwarding of permitted requests.

pub mod credential;
pub mod target;
pub mod transport;
pub mod upstream;

pub use credential::{BearerToken, ClusterEnv, CredentialResolver, CredentialSource};
pub use target::BackendTarget;
pub use transport::{Transport, TrustAnchors};
pub use upstream::ProxyForwarder;
