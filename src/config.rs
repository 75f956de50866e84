//! Startup configuration.
//!
//! Every option can be given as a flag or through its environment variable.
//! The flag wins when both are present.

use std::time::Duration;

use clap::Parser;

use crate::policy::AllowListPolicy;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "kubelet-proxy",
    version,
    about = "Allow-list reverse proxy in front of the kubelet API"
)]
pub struct Config {
    /// Log level: panic, fatal, error, warn, info, debug or trace.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Address to listen on. A bare `:port` listens on all interfaces.
    #[arg(long, env = "BIND_ADDRESS", default_value = ":10255")]
    pub bind_address: String,

    /// Base URL of the kubelet API. Resolved from the environment when unset.
    #[arg(long, env = "KUBELET_API")]
    pub kubelet_api: Option<String>,

    /// Accept any certificate presented by the kubelet API.
    #[arg(long, env = "KUBELET_API_INSECURE_SKIP_VERIFY")]
    pub kubelet_api_insecure_skip_verify: bool,

    /// Seconds to wait for the kubelet API to accept and answer a request.
    #[arg(long, env = "KUBELET_API_TIMEOUT")]
    pub kubelet_api_timeout: Option<u64>,

    /// Request paths to let through, matched exactly as given (no trimming).
    /// Repeat the flag or separate entries with commas.
    #[arg(long, env = "KUBELET_PROXY_PATHS", value_delimiter = ',')]
    pub paths: Vec<String>,

    /// Request methods to let through, case-sensitive. Repeat the flag or
    /// separate entries with commas.
    #[arg(
        long,
        env = "KUBELET_PROXY_METHODS",
        value_delimiter = ',',
        default_value = "GET"
    )]
    pub methods: Vec<String>,
}

impl Config {
    /// Parses the process arguments and environment, exiting on error.
    pub fn load() -> Self {
        Self::parse()
    }

    /// The address handed to the listener.
    pub fn bind_addr(&self) -> String {
        match self.bind_address.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{}", port),
            None => self.bind_address.clone(),
        }
    }

    pub fn backend_timeout(&self) -> Option<Duration> {
        self.kubelet_api_timeout
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// The allow-list built from `--methods` and `--paths`.
    pub fn policy(&self) -> AllowListPolicy {
        AllowListPolicy::new(non_empty(&self.methods), non_empty(&self.paths))
    }
}

fn non_empty(values: &[String]) -> Vec<String> {
    values
        .iter()
        .filter(|v| !v.is_empty())
        .cloned()
        .collect()
}
