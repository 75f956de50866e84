use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::{ProxyError, Result};
use crate::http::connection::Connection;
use crate::http::handler::Handler;

pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|source| ProxyError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Accepts connections forever, one task per connection.
///
/// Accept errors are logged and do not stop the loop.
pub async fn serve<H: Handler>(listener: TcpListener, handler: Arc<H>) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {}", addr);
    }

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };
        debug!("Accepted connection from {}", peer);

        let _ = socket.set_nodelay(true);
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, Some(peer), handler);
            if let Err(e) = conn.run().await {
                debug!("Connection error from {}: {}", peer, e);
            }
        });
    }
}
