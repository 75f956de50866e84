//! kubelet-proxy - allow-list reverse proxy for the kubelet API
//!
//! Sits next to a workload, accepts plain HTTP and forwards only the
//! configured methods and paths to the kubelet, attaching the credentials the
//! process finds in its environment.

pub mod config;
pub mod error;
pub mod gate;
pub mod http;
pub mod logging;
pub mod policy;
pub mod proxy;
pub mod server;

pub use error::{ProxyError, Result};
pub use gate::{RequestGate, Verdict};
pub use policy::AllowListPolicy;
