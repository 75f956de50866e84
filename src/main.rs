use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use kubelet_proxy::config::Config;
use kubelet_proxy::gate::RequestGate;
use kubelet_proxy::proxy::{CredentialResolver, ProxyForwarder};
use kubelet_proxy::{logging, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load();

    let level = logging::parse_level(&cfg.log_level)?;
    logging::init(level);

    let target = CredentialResolver::from_env()
        .resolve(cfg.kubelet_api_insecure_skip_verify, cfg.kubelet_api.as_deref())
        .context("resolving kubelet API target")?
        .with_timeout(cfg.backend_timeout());

    let policy = cfg.policy();
    info!(
        methods = ?policy.methods().collect::<Vec<_>>(),
        paths = ?policy.paths().collect::<Vec<_>>(),
        "Allow-list loaded"
    );

    let bind_addr = cfg.bind_addr();
    info!("Starting proxy to {} listening on {}", target.base_url(), bind_addr);

    let listener = server::bind(&bind_addr).await?;
    let handler = Arc::new(RequestGate::new(
        Arc::new(policy),
        ProxyForwarder::new(target),
    ));

    tokio::select! {
        res = server::serve(listener, handler) => {
            if let Err(e) = &res {
                error!("Server stopped: {}", e);
            }
            res?;
        }

        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
