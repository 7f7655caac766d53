//! HTTP Dispatcher: validates the inbound request, resolves the `profile`
//! query parameter against a fresh `ProfileResolver`, assembles a
//! per-request `GatewayServerHandler`, and streams the MCP transport through
//! it. Builds a fresh `StreamableHttpService` per request (rather than
//! `Router::nest_service`-ing one static instance) since `profile` varies
//! per request but the service factory closure does not.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::cleanup::CleanupManager;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::profile::Profile;
use crate::registry::ConnectorRegistry;
use crate::resolver::ProfileResolver;
use crate::server_factory::GatewayServerHandler;

const MCP_PATH: &str = "/mcp";

/// Read-only process state shared across every request. Config and registry
/// are immutable after construction; requests never share transports,
/// servers, profiles, or cleanup managers.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub registry: Arc<ConnectorRegistry>,
}

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(MCP_PATH, any(mcp_handler))
        .fallback(not_found)
        .with_state(state)
}

/// Binds `listen`, serves until `shutdown` is cancelled, and returns once
/// the listener has stopped accepting connections. The caller disposes the
/// registry next.
pub async fn serve(state: Arc<GatewayState>, listen: &str, shutdown: CancellationToken) -> Result<()> {
    let bind_addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address '{listen}'"))?;

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind gateway HTTP endpoint at {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "mcp gateway listening");

    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("gateway HTTP server stopped with error")
}

async fn not_found() -> Response {
    json_rpc_error_response(
        StatusCode::NOT_FOUND,
        &GatewayError::InvalidRequest("no such endpoint".to_string()),
    )
}

/// The single `/mcp` handler for POST, GET, and DELETE. Any other method
/// reaches this handler too (via `any()`) so the 405 response can carry a
/// JSON-RPC error envelope, which axum's built-in method-not-allowed
/// rejection does not produce.
async fn mcp_handler(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    request: Request,
) -> Response {
    if !matches!(method, Method::POST | Method::GET | Method::DELETE) {
        return json_rpc_error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &GatewayError::InvalidRequest(format!("unsupported method: {method}")),
        );
    }

    let Some(profile_name) = query.get("profile").cloned() else {
        return json_rpc_error_response(
            StatusCode::BAD_REQUEST,
            &GatewayError::InvalidRequest("Missing profile query parameter".to_string()),
        );
    };

    // A fresh resolver per request means a clean cache every time.
    let mut resolver = ProfileResolver::new(&state.config, &state.registry);
    let resolved = match resolver.resolve(&profile_name).await {
        Ok(resolved) => resolved,
        Err(error) => {
            let gateway_error = GatewayError::InvalidRequest(error.to_string());
            tracing::warn!(profile = %profile_name, error = %gateway_error, "profile resolution failed");
            return json_rpc_error_response(StatusCode::BAD_REQUEST, &gateway_error);
        }
    };

    let cleanup = Arc::new(CleanupManager::new(profile_name.clone()));
    let profile = Arc::new(Profile::new(resolved, state.registry.clone()));

    // Parse the POST body for diagnostics only; never aborts the request.
    let request = log_and_forward_body(request).await;

    let handler = GatewayServerHandler::new(profile);
    let session_manager = Arc::new(LocalSessionManager::default());
    // Drives this request's own `StreamableHttpService` down; cancelling it
    // tells the transport's session task to stop regardless of how the
    // request ended. This is this architecture's closest counterpart to
    // "close the transport" for a per-request, sessionless service.
    let request_transport_ct = CancellationToken::new();
    {
        let transport_ct = request_transport_ct.clone();
        cleanup
            .register(move || async move {
                transport_ct.cancel();
                Ok(())
            })
            .await;
    }
    {
        // Releases this request's session state ("close the server"); the
        // `Arc` clone captured here is the only handle the cleanup path
        // itself holds, so dropping it here — rather than leaving it to
        // fall out of `mcp_handler`'s scope — is the explicit release.
        let session_manager = session_manager.clone();
        cleanup
            .register(move || async move {
                drop(session_manager);
                Ok(())
            })
            .await;
    }

    // No session-id generator: every request gets its own ephemeral server,
    // sessionless and independent of any other request.
    let service_config = StreamableHttpServerConfig {
        stateful_mode: false,
        cancellation_token: request_transport_ct.child_token(),
        ..Default::default()
    };
    let service = StreamableHttpService::new(
        move || Ok(handler.clone()),
        session_manager,
        service_config,
    );

    let outcome = service.oneshot(request).await;

    match outcome {
        Ok(response) => {
            cleanup.run(None).await;
            response.into_response()
        }
        Err(error) => {
            let gateway_error = GatewayError::Internal(error.to_string());
            tracing::error!(profile = %profile_name, error = %gateway_error, "dispatch failed");
            cleanup.run(Some(&gateway_error)).await;
            json_rpc_error_response(StatusCode::INTERNAL_SERVER_ERROR, &gateway_error)
        }
    }
}

/// Buffers the body, logs a warning if it is not valid JSON, then hands an
/// identical request back to the caller so the transport still receives the
/// original bytes.
async fn log_and_forward_body(request: Request) -> Request {
    if request.method() != Method::POST {
        return request;
    }

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::warn!(error = %error, "failed to buffer request body");
            return Request::from_parts(parts, Body::empty());
        }
    };

    if let Err(error) = serde_json::from_slice::<serde_json::Value>(&bytes) {
        let snippet: String = String::from_utf8_lossy(&bytes).chars().take(200).collect();
        tracing::warn!(error = %error, body = %snippet, "request body is not valid JSON-RPC");
    }

    Request::from_parts(parts, Body::from(bytes))
}

fn json_rpc_error_response(status: StatusCode, error: &GatewayError) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        Json(error.to_json_rpc_body()),
    )
        .into_response()
}
