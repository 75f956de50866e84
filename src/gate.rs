//! Allow-list middleware in front of another handler.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::http::body::BodyFraming;
use crate::http::handler::{ClientIo, Disposition, Handler, respond};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::policy::AllowListPolicy;

/// Outcome of checking a request against the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Method not in the allow-list; answered with 405.
    MethodNotAllowed,
    /// Method allowed, path not in the allow-list; answered with 404.
    PathNotFound,
    /// Handed to the inner handler unchanged.
    Forward,
}

/// Rejects requests the policy does not permit and delegates the rest.
///
/// The method is checked before the path, so a request failing both checks
/// gets 405.
pub struct RequestGate<H> {
    policy: Arc<AllowListPolicy>,
    inner: H,
}

impl<H: Handler> RequestGate<H> {
    pub fn new(policy: Arc<AllowListPolicy>, inner: H) -> Self {
        Self { policy, inner }
    }

    pub fn verdict(&self, request: &Request) -> Verdict {
        if !self.policy.permits_method(&request.method) {
            Verdict::MethodNotAllowed
        } else if !self.policy.permits_path(request.path()) {
            Verdict::PathNotFound
        } else {
            Verdict::Forward
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

impl<H: Handler> Handler for RequestGate<H> {
    async fn handle<C: ClientIo>(&self, request: Request, client: &mut C) -> Result<Disposition> {
        let response = match self.verdict(&request) {
            Verdict::Forward => return self.inner.handle(request, client).await,
            Verdict::MethodNotAllowed => Response::method_not_allowed(),
            Verdict::PathNotFound => Response::not_found(),
        };

        debug!(
            method = %request.method,
            path = %request.path(),
            peer = ?request.remote_addr,
            status = response.status.as_u16(),
            "Request rejected by allow-list"
        );

        // The unread body would be taken for the next request, so close instead.
        let body_pending = !matches!(BodyFraming::for_request(&request.headers), Ok(BodyFraming::Empty));
        let keep_alive = request.keep_alive() && !body_pending;
        let response = if keep_alive && request.is_http10() {
            response.with_keep_alive()
        } else {
            response
        };
        respond(client, response, keep_alive).await
    }
}
