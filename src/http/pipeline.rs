//! Per-request pipeline stages.
//!
//! # Data Flow
//! ```text
//! identify_agent   → ClientInfo extension (User-Agent product, x-gateway-key)
//! resolve_service  → ResolvedService extension, or 501 "not registered"
//! authorize        → AuthorizationIdentity extension, or 401 / 500
//! forward.rs       → HTTP proxy or RPC dispatch
//! ```
//!
//! Each stage short-circuits with an envelope response. The authorize stage
//! buffers the body for hashing and hands the same bytes downstream.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::USER_AGENT;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;

use crate::auth::signature::parse_timestamp;
use crate::auth::AuthRequest;
use crate::composite::CompositeConnection;
use crate::error::GatewayError;
use crate::http::request::{
    header_str, request_uri, RequestIdExt, X_GATEWAY_KEY, X_GATEWAY_SIGNATURE, X_GATEWAY_TIMESTAMP,
};
use crate::http::response::{Envelope, GatewayMessage};
use crate::http::server::GatewayState;
use crate::observability::metrics;
use crate::rpc::{keys, ClientInfo};

/// The mounted connection serving this request.
#[derive(Clone)]
pub struct ResolvedService {
    pub connection: Arc<CompositeConnection>,
    /// Path below the service segment, always starting with `/`.
    pub sub_path: String,
}

/// Split `/svc/a/b` into `("svc", "/a/b")`.
pub fn split_service_path(path: &str) -> (&str, String) {
    let trimmed = path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((segment, rest)) => (segment, format!("/{}", rest)),
        None => (trimmed, "/".to_string()),
    }
}

/// The path a backend will act on: percent-decoded, with empty and `.`
/// segments dropped and `..` applied. Always starts with `/`.
pub fn route_path(sub_path: &str) -> String {
    let decoded = percent_decode_str(sub_path).decode_utf8_lossy();
    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

pub async fn identify_agent(mut request: Request, next: Next) -> Response {
    let agent = header_str(request.headers(), USER_AGENT.as_str())
        .and_then(|ua| ua.split('/').next())
        .unwrap_or_default()
        .to_string();
    let client_id = header_str(request.headers(), X_GATEWAY_KEY)
        .unwrap_or_default()
        .to_string();

    request.extensions_mut().insert(ClientInfo { client_id, agent });
    next.run(request).await
}

pub async fn resolve_service(State(state): State<GatewayState>, mut request: Request, next: Next) -> Response {
    let (segment, sub_path) = split_service_path(request.uri().path());
    let segment = segment.to_string();

    match state.forwarder.resolve(&segment) {
        Some(connection) => {
            request.extensions_mut().insert(ResolvedService { connection, sub_path });
            next.run(request).await
        }
        None => {
            tracing::debug!(request_id = %request.request_id(), service = %segment, "Service not registered");
            Envelope::new(501)
                .with_error(GatewayMessage::NotRegistered.text(&state.locale))
                .with_svcid(segment)
                .with_controller(request_uri(&request))
                .with_action(request.method().as_str())
                .into_response()
        }
    }
}

pub async fn authorize(State(state): State<GatewayState>, request: Request, next: Next) -> Response {
    let Some(resolved) = request.extensions().get::<ResolvedService>().cloned() else {
        return internal_error(&request, "service was not resolved");
    };

    let class = resolved
        .connection
        .classify_route(request.method().as_str(), &route_path(&resolved.sub_path));
    let Some(tier) = class.tier() else {
        return next.run(request).await;
    };

    let controller = request_uri(&request);
    let (mut parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.forwarding.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            return Envelope::new(500)
                .with_error(format!("while reading body: {}", e))
                .with_controller(controller)
                .with_action(parts.method.as_str())
                .into_response();
        }
    };

    let header = |name: &str| header_str(&parts.headers, name).unwrap_or_default().to_string();
    let auth_request = AuthRequest {
        method: parts.method.to_string(),
        uri: controller.parse().unwrap_or_else(|_| parts.uri.clone()),
        body: body.clone(),
        client_id: header(X_GATEWAY_KEY),
        timestamp: parse_timestamp(&header(X_GATEWAY_TIMESTAMP)),
        signature: header(X_GATEWAY_SIGNATURE),
        token: header(keys::AUTHORIZATION),
    };

    match state.engines.for_tier(tier).authorize(&auth_request).await {
        Ok(identity) => {
            parts.extensions.insert(identity);
            next.run(Request::from_parts(parts, Body::from(body))).await
        }
        Err(GatewayError::Authorization(e)) => {
            metrics::record_auth_failure(tier.as_str());
            tracing::warn!(
                request_id = %parts.headers.request_id(),
                service = %resolved.connection.key(),
                tier = %tier,
                reason = %e,
                "Authorization rejected"
            );
            Envelope::new(401)
                .with_error(e.message(&state.locale))
                .into_response()
        }
        Err(e) => {
            tracing::error!(request_id = %parts.headers.request_id(), tier = %tier, error = %e, "Authorization failed");
            Envelope::new(500)
                .with_error(e.to_string())
                .with_controller(controller)
                .with_action(parts.method.as_str())
                .into_response()
        }
    }
}

fn internal_error(request: &Request, message: &str) -> Response {
    Envelope::new(500)
        .with_error(message)
        .with_controller(request_uri(request))
        .with_action(request.method().as_str())
        .into_response()
}
