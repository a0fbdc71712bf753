//! Final pipeline stage: hand the request to the resolved backend.
//!
//! # Responsibilities
//! - Plain HTTP backends: proxy verbatim, re-checking JSON envelopes
//! - RPC backends: translate to a dispatch call and back
//! - Map transport failures to 503 (unavailable) or 500 envelopes

use std::net::SocketAddr;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::auth::AuthorizationIdentity;
use crate::composite::Transport;
use crate::http::pipeline::ResolvedService;
use crate::http::realip::recover_real_ip;
use crate::http::request::{header_str, request_uri, RequestIdExt};
use crate::http::response::{Envelope, GatewayMessage, CONTENT_TYPE_JSON};
use crate::http::server::GatewayState;
use crate::observability::metrics;
use crate::rpc::{keys, ClientInfo, DispatchReply, DispatchRequest, Metadata, RpcError};

/// Client headers that must never reach a backend under their `bv-` name.
const RESERVED_HEADERS: [&str; 3] = ["x-remote-addr", "real-ip", "real-ip-proof"];

pub async fn forward(State(state): State<GatewayState>, request: Request) -> Response {
    let start = Instant::now();
    let method = request.method().clone();

    let Some(resolved) = request.extensions().get::<ResolvedService>().cloned() else {
        return Envelope::new(500)
            .with_error("service was not resolved")
            .with_controller(request_uri(&request))
            .with_action(method.as_str())
            .into_response();
    };

    let response = match resolved.connection.transport() {
        Transport::Http { base_url } => proxy_http(&state, base_url, &resolved, request).await,
        Transport::Rpc(_) => dispatch_rpc(&state, &resolved, request).await,
    };

    metrics::record_request(resolved.connection.key(), method.as_str(), response.status().as_u16(), start);
    response
}

async fn proxy_http(state: &GatewayState, base_url: &str, resolved: &ResolvedService, request: Request) -> Response {
    let mut target = format!("{}{}", base_url.trim_end_matches('/'), resolved.sub_path);
    if let Some(query) = request.uri().query() {
        target.push('?');
        target.push_str(query);
    }

    let method = request.method().clone();
    let (mut parts, body) = request.into_parts();
    parts.headers.remove(HOST);

    let upstream = match target.parse() {
        Ok(uri) => {
            parts.uri = uri;
            Request::from_parts(parts, body)
        }
        Err(e) => {
            tracing::warn!(target = %target, error = %e, "Invalid upstream URI");
            return unavailable(&state.locale, &target, &method, StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let response = match state.client.request(upstream).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(service = %resolved.connection.key(), target = %target, error = %e, "Upstream error");
            return unavailable(&state.locale, &target, &method, StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let (parts, body) = response.into_parts();
    let is_json = header_str(&parts.headers, CONTENT_TYPE.as_str()) == Some(CONTENT_TYPE_JSON);
    if !is_json {
        return Response::from_parts(parts, Body::new(body));
    }

    let bytes = match axum::body::to_bytes(Body::new(body), state.forwarding.max_reply_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return Envelope::new(500)
                .with_error(format!("while reading upstream body: {}", e))
                .with_svcid(resolved.connection.key())
                .with_controller(target)
                .with_action(method.as_str())
                .into_response();
        }
    };
    relay_envelope(resolved.connection.key(), &target, &method, bytes)
}

/// Re-emit a JSON envelope with its own status. Bodies that are not an
/// envelope become a 500.
fn relay_envelope(service: &str, target: &str, method: &Method, body: Bytes) -> Response {
    match serde_json::from_slice::<Envelope>(&body) {
        Ok(envelope) => {
            let mut response = (envelope.status(), body).into_response();
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
            response
        }
        Err(e) => {
            tracing::warn!(service = %service, target = %target, error = %e, "Upstream JSON is not an envelope");
            Envelope::new(500)
                .with_error(format!("invalid upstream response: {}", e))
                .with_svcid(service)
                .with_controller(target)
                .with_action(method.as_str())
                .into_response()
        }
    }
}

async fn dispatch_rpc(state: &GatewayState, resolved: &ResolvedService, request: Request) -> Response {
    let controller = request_uri(&request);
    let request_id = request.request_id().to_string();
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, state.forwarding.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            return Envelope::new(500)
                .with_error(format!("while reading request body: {}", e))
                .with_controller(controller)
                .with_action(parts.method.as_str())
                .into_response();
        }
    };

    let mut metadata = Metadata::new();
    if let Err(e) = side_channel(&parts.extensions, &mut metadata) {
        return Envelope::new(500)
            .with_error(format!("while marshaling json: {}", e))
            .with_controller(controller)
            .with_action(parts.method.as_str())
            .into_response();
    }

    let remote = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    metadata.insert(
        keys::REMOTE_ADDR.to_string(),
        remote.map(|addr| addr.to_string()).unwrap_or_default(),
    );
    let real_ip = recover_real_ip(&parts.headers, remote, state.forwarding.skip_forwarded_for);
    metadata.insert(keys::REAL_IP.to_string(), real_ip.address);
    metadata.insert(keys::REAL_IP_PROOF.to_string(), real_ip.proof.to_string());
    forward_headers(&parts.headers, &mut metadata);

    let mut path = resolved.sub_path.clone();
    if let Some(query) = parts.uri.query().filter(|q| !q.is_empty()) {
        path.push('?');
        path.push_str(query);
    }

    let dispatch = DispatchRequest {
        method: parts.method.to_string(),
        path,
        body,
        metadata,
    };

    match resolved.connection.dispatch(dispatch).await {
        Ok(reply) => {
            tracing::info!(request_id = %request_id, uri = %controller, server = %reply.server, "Request served");
            reply_to_http(reply)
        }
        Err(e) => {
            let status = match e {
                RpcError::Unavailable(_) | RpcError::Closed => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            tracing::error!(
                request_id = %request_id,
                service = %resolved.connection.key(),
                status = status.as_u16(),
                error = %e,
                "Dispatch failed"
            );
            Envelope::new(status.as_u16())
                .with_error(e.to_string())
                .with_controller(controller)
                .with_action(parts.method.as_str())
                .into_response()
        }
    }
}

/// Serialize client and identity info set by earlier stages.
fn side_channel(extensions: &axum::http::Extensions, metadata: &mut Metadata) -> Result<(), serde_json::Error> {
    if let Some(client) = extensions.get::<ClientInfo>() {
        metadata.insert(keys::CLIENT_INFO.to_string(), serde_json::to_string(client)?);
    }
    if let Some(identity) = extensions.get::<AuthorizationIdentity>() {
        metadata.insert(keys::AUTHORIZATION_INFO.to_string(), serde_json::to_string(identity)?);
    }
    Ok(())
}

/// Copy client headers as `bv-{name}`; `authorization` also travels raw.
/// Only the first value of a repeated header is kept.
fn forward_headers(headers: &axum::http::HeaderMap, metadata: &mut Metadata) {
    for name in headers.keys() {
        let key = name.as_str();
        if RESERVED_HEADERS.contains(&key) {
            continue;
        }
        let Some(value) = header_str(headers, key) else { continue };
        if key == keys::AUTHORIZATION {
            metadata
                .entry(keys::AUTHORIZATION.to_string())
                .or_insert_with(|| value.to_string());
        }
        metadata
            .entry(format!("{}{}", keys::FORWARDED_PREFIX, key))
            .or_insert_with(|| value.to_string());
    }
}

/// Relay reply metadata as headers; `bv-content-type` becomes `content-type`.
fn reply_to_http(reply: DispatchReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, reply.body).into_response();
    response.headers_mut().remove(CONTENT_TYPE);

    for (key, value) in &reply.metadata {
        if key == CONTENT_TYPE.as_str() {
            continue;
        }
        let key = if key == keys::CONTENT_TYPE {
            CONTENT_TYPE.as_str()
        } else {
            key.as_str()
        };
        match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => tracing::debug!(key = %key, "Dropping invalid reply header"),
        }
    }
    response
}

fn unavailable(locale: &str, target: &str, method: &Method, status: StatusCode) -> Response {
    Envelope::new(status.as_u16())
        .with_error(GatewayMessage::Unavailable.text(locale))
        .with_controller(target)
        .with_action(method.as_str())
        .into_response()
}
