//! The request handler seam.
//!
//! A handler receives a parsed request head and the client connection, whose
//! read side is positioned at the start of the request body. It must write
//! exactly one response and report whether the connection can carry another
//! request.

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::error::Result;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;

/// The client side of a connection as seen by a handler.
pub trait ClientIo: AsyncBufRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncBufRead + AsyncWrite + Unpin + Send> ClientIo for T {}

/// What the connection should do once a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The request was fully consumed and the response fully written.
    KeepAlive,
    /// The connection must be closed.
    Close,
}

pub trait Handler: Send + Sync + 'static {
    fn handle<C: ClientIo>(
        &self,
        request: Request,
        client: &mut C,
    ) -> impl Future<Output = Result<Disposition>> + Send;
}

impl<H: Handler> Handler for Arc<H> {
    fn handle<C: ClientIo>(
        &self,
        request: Request,
        client: &mut C,
    ) -> impl Future<Output = Result<Disposition>> + Send {
        (**self).handle(request, client)
    }
}

/// Writes a locally generated response and returns the matching disposition.
pub async fn respond<C: ClientIo>(
    client: &mut C,
    response: Response,
    keep_alive: bool,
) -> Result<Disposition> {
    let (response, disposition) = if keep_alive {
        (response, Disposition::KeepAlive)
    } else {
        (response.with_close(), Disposition::Close)
    };

    ResponseWriter::new(&response).write_to_stream(client).await?;
    Ok(disposition)
}
