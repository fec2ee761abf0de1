//! Authenticating reverse proxy.
//!
//! Every request, whatever its method or path, goes through one handler:
//! 1. Get a token from the shared [`TokenCache`]
//! 2. Set `Authorization: <type> <token>`
//! 3. Forward to the backend and relay the answer verbatim
//!
//! If no token can be obtained the client gets a 500 with the mint error as the
//! body and the backend is never contacted.

pub mod forward;

pub use forward::{ForwardError, Forwarder};

use crate::cache::TokenCache;
use crate::credentials::MintError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Shared state for the proxy handler
#[derive(Clone)]
pub struct ProxyAppState {
    pub token_cache: TokenCache,
    pub forwarder: Arc<Forwarder>,
}

/// Errors surfaced to the client
enum ProxyError {
    Credential(MintError),
    Forward(ForwardError),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::Credential(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
            ProxyError::Forward(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
        }
    }
}

/// Create the proxy router: a single fallback matching every method and path.
pub fn create_proxy_router(state: ProxyAppState) -> Router {
    Router::new()
        .fallback(proxy_request)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn proxy_request(
    State(state): State<ProxyAppState>,
    mut req: Request,
) -> Result<Response, ProxyError> {
    let token = state.token_cache.get_token().await.map_err(|e| {
        error!(error = %e, uri = %req.uri(), "Failed to obtain credential");
        ProxyError::Credential(e)
    })?;

    token.set_auth_header(req.headers_mut()).map_err(|e| {
        error!(error = %e, "Failed to set Authorization header");
        ProxyError::Credential(e)
    })?;

    let client_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    state
        .forwarder
        .forward(req, client_addr)
        .await
        .map_err(|e| {
            warn!(error = %e, backend = %state.forwarder.backend(), "Forwarding failed");
            ProxyError::Forward(e)
        })
}
