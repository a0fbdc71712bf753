//! Backend-side service runtime.
//!
//! A backend describes itself with a [`ServiceDescriptor`], declares its
//! handlers on a pattern [`Router`], registers with the directory and
//! serves the handshake and dispatch endpoints the gateway calls.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Json;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpListener;
use url::form_urlencoded;

use crate::auth::{AuthorizationIdentity, DEFAULT_LOCALE};
use crate::directory::{Directory, ServiceDescriptor};
use crate::error::GatewayResult;
use crate::http::response::{Envelope, GatewayMessage, CONTENT_TYPE_JSON, CONTENT_TYPE_XML};
use crate::routing::{RouteMatch, Router, Tier};
use crate::rpc::client::{read_metadata, write_metadata};
use crate::rpc::{
    keys, local_hostname, ClientInfo, DispatchReply, DispatchRequest, HandshakeRequest,
    HandshakeResponse, Metadata, RpcError, WireRoute, DISPATCH_PATH, HANDSHAKE_PATH, HEADER_METHOD,
    HEADER_PATH, HEADER_SERVER, HEADER_STATUS,
};

/// Type-erased async request handler.
pub type Handler = Arc<dyn Fn(RequestContext) -> BoxFuture<'static, Reply> + Send + Sync>;

/// Wrap an async function as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// What a handler sees of one dispatched call.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    method: String,
    path: String,
    body: Bytes,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    metadata: Metadata,
    identity: AuthorizationIdentity,
    client: ClientInfo,
}

impl RequestContext {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn raw_body(&self) -> &Bytes {
        &self.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// First value of a query parameter.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn queries(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Client request header forwarded by the gateway.
    pub fn header(&self, name: &str) -> Option<&str> {
        let key = format!("{}{}", keys::FORWARDED_PREFIX, name.to_ascii_lowercase());
        self.metadata.get(&key).map(String::as_str)
    }

    /// All forwarded client headers, prefix removed.
    pub fn headers(&self) -> HashMap<&str, &str> {
        self.metadata
            .iter()
            .filter_map(|(k, v)| Some((k.strip_prefix(keys::FORWARDED_PREFIX)?, v.as_str())))
            .collect()
    }

    /// Raw metadata entry.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.metadata(keys::CONTENT_TYPE)
    }

    pub fn client_ip(&self) -> Option<&str> {
        self.metadata(keys::REAL_IP)
    }

    /// Whether the gateway positively identified the client address.
    pub fn client_ip_proof(&self) -> bool {
        self.metadata(keys::REAL_IP_PROOF)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn identity(&self) -> &AuthorizationIdentity {
        &self.identity
    }

    pub fn client_info(&self) -> &ClientInfo {
        &self.client
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Xml,
}

#[derive(Debug, Clone)]
enum ReplyBody {
    Envelope {
        format: Format,
        result: Option<Value>,
        error: String,
        appid: String,
    },
    Raw(Bytes),
}

/// Handler outcome.
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    body: ReplyBody,
    headers: Metadata,
}

impl Reply {
    fn envelope(status: u16, format: Format, result: Option<Value>) -> Self {
        Self {
            status,
            body: ReplyBody::Envelope {
                format,
                result,
                error: String::new(),
                appid: String::new(),
            },
            headers: Metadata::new(),
        }
    }

    /// JSON envelope. `None` uses the default result for the status.
    pub fn json(status: u16, result: Option<Value>) -> Self {
        Self::envelope(status, Format::Json, result)
    }

    pub fn xml(status: u16, result: Option<Value>) -> Self {
        Self::envelope(status, Format::Xml, result)
    }

    /// JSON envelope carrying an error message.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, None).with_error(message)
    }

    pub fn raw(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: ReplyBody::Raw(body.into()),
            headers: Metadata::new(),
        }
    }

    pub fn redirect(location: &str) -> Self {
        Self::raw(301, Bytes::new()).with_header("location", location)
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        if let ReplyBody::Envelope { error, .. } = &mut self.body {
            *error = message.into();
        }
        self
    }

    pub fn with_appid(mut self, id: impl Into<String>) -> Self {
        if let ReplyBody::Envelope { appid, .. } = &mut self.body {
            *appid = id.into();
        }
        self
    }

    /// Response header relayed to the client by the gateway.
    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.insert(key.to_ascii_lowercase(), value.into());
        self
    }

    /// Content type of a raw body.
    pub fn with_content_type(self, mime: &str) -> Self {
        self.with_header(keys::CONTENT_TYPE, mime)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    fn render(self, method: &str, controller: &str, svcid: &str) -> Result<(u16, Metadata, Bytes), RpcError> {
        let mut headers = self.headers;
        let body = match self.body {
            ReplyBody::Raw(bytes) => bytes,
            ReplyBody::Envelope {
                format,
                result,
                error,
                appid,
            } => {
                let result = result.unwrap_or_else(|| default_result(self.status));
                let envelope = Envelope::new(self.status)
                    .with_error(error)
                    .with_appid(appid)
                    .with_svcid(svcid)
                    .with_controller(controller)
                    .with_action(action_label(method))
                    .with_result(result);
                match format {
                    Format::Json => {
                        headers.insert(keys::CONTENT_TYPE.to_string(), CONTENT_TYPE_JSON.to_string());
                        Bytes::from(envelope.to_json())
                    }
                    Format::Xml => {
                        headers.insert(keys::CONTENT_TYPE.to_string(), CONTENT_TYPE_XML.to_string());
                        Bytes::from(envelope.to_xml().map_err(RpcError::Codec)?)
                    }
                }
            }
        };
        Ok((self.status, headers, body))
    }
}

fn default_result(status: u16) -> Value {
    if status >= 400 {
        Value::String(String::new())
    } else {
        GatewayMessage::Success.as_value()
    }
}

/// Envelope action label for an HTTP method.
pub fn action_label(method: &str) -> &'static str {
    match method.to_ascii_uppercase().as_str() {
        "GET" => "Get",
        "POST" => "Add",
        "PUT" => "Edit",
        "DELETE" => "Delete",
        _ => "",
    }
}

/// Descriptor, route table and handshake/dispatch logic of one backend.
pub struct BackendService {
    descriptor: ServiceDescriptor,
    router: Router<Handler>,
    hostname: String,
    locale: String,
}

impl BackendService {
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        Self {
            descriptor,
            router: Router::new(),
            hostname: local_hostname(),
            locale: DEFAULT_LOCALE.to_string(),
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Route table for declaring handlers and tiers.
    pub fn routes(&mut self) -> &mut Router<Handler> {
        &mut self.router
    }

    /// Private entries are withheld; the gateway declares those itself.
    pub fn handshake(&self, request: &HandshakeRequest) -> HandshakeResponse {
        tracing::info!(from = %request.from, key = %self.descriptor.key, "Handshake received");

        let mut protected_routes: HashMap<String, Vec<WireRoute>> = HashMap::new();
        for (method, routes) in self.router.protected_routes().iter() {
            let entries: Vec<WireRoute> = routes
                .iter()
                .filter(|route| route.tier != Tier::Private)
                .map(|route| WireRoute {
                    pattern: route.pattern.as_str().to_string(),
                    tier: route.tier.as_str().to_string(),
                })
                .collect();
            if !entries.is_empty() {
                protected_routes.insert(method.to_string(), entries);
            }
        }

        HandshakeResponse {
            server: self.hostname.clone(),
            checksum: self.descriptor.checksum(),
            namespace: self.descriptor.namespace.clone(),
            protected_routes,
        }
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchReply, RpcError> {
        let mut metadata = request.metadata;
        let client: ClientInfo = take_json(&mut metadata, keys::CLIENT_INFO)?;
        let identity: AuthorizationIdentity = take_json(&mut metadata, keys::AUTHORIZATION_INFO)?;

        let reply = match request.path.parse::<Uri>() {
            Ok(uri) => {
                let query = form_urlencoded::parse(uri.query().unwrap_or("").as_bytes()).fold(
                    HashMap::new(),
                    |mut acc, (k, v)| {
                        acc.entry(k.into_owned()).or_insert_with(|| v.into_owned());
                        acc
                    },
                );
                let ctx = RequestContext {
                    method: request.method.to_ascii_uppercase(),
                    path: uri.path().to_string(),
                    body: request.body,
                    params: HashMap::new(),
                    query,
                    metadata,
                    identity,
                    client,
                };
                self.route(ctx).await
            }
            Err(_) => Reply::error(400, GatewayMessage::PathNotFound.text(&self.locale)),
        };

        let (status, metadata, body) = reply.render(&request.method, &request.path, &self.descriptor.key)?;
        Ok(DispatchReply {
            server: self.hostname.clone(),
            status,
            body,
            metadata,
        })
    }

    async fn route(&self, mut ctx: RequestContext) -> Reply {
        let handler = match self.router.dispatch(&ctx.method, &ctx.path) {
            RouteMatch::Found { handler, params } => {
                ctx.params = params;
                handler.clone()
            }
            RouteMatch::NotFound => {
                tracing::debug!(method = %ctx.method, path = %ctx.path, "No backend route matched");
                return Reply::error(404, GatewayMessage::PathNotFound.text(&self.locale));
            }
        };
        handler(ctx).await
    }

    /// Axum router exposing the transport endpoints.
    pub fn into_router(self) -> axum::Router {
        axum::Router::new()
            .route(HANDSHAKE_PATH, post(handshake_endpoint))
            .route(DISPATCH_PATH, post(dispatch_endpoint))
            .with_state(Arc::new(self))
    }
}

fn take_json<T: DeserializeOwned + Default>(metadata: &mut Metadata, key: &str) -> Result<T, RpcError> {
    match metadata.remove(key) {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| RpcError::Codec(format!("{}: {}", key, e))),
        None => Ok(T::default()),
    }
}

async fn handshake_endpoint(
    State(service): State<Arc<BackendService>>,
    Json(request): Json<HandshakeRequest>,
) -> Json<HandshakeResponse> {
    Json(service.handshake(&request))
}

async fn dispatch_endpoint(
    State(service): State<Arc<BackendService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let request = DispatchRequest {
        method: header(HEADER_METHOD),
        path: header(HEADER_PATH),
        body,
        metadata: read_metadata(&headers),
    };

    match service.dispatch(request).await {
        Ok(reply) => {
            let mut response = Body::from(reply.body).into_response();
            let out = response.headers_mut();
            out.insert(HEADER_STATUS, HeaderValue::from(reply.status));
            if let Ok(server) = HeaderValue::from_str(&reply.server) {
                out.insert(HEADER_SERVER, server);
            }
            write_metadata(out, &reply.metadata);
            response
        }
        Err(e) => {
            tracing::warn!(error = %e, "Dispatch rejected");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

/// A backend service bound to its directory registration.
pub struct BackendServer {
    service: BackendService,
}

impl BackendServer {
    pub fn new(service: BackendService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &BackendService {
        &self.service
    }

    /// Store the descriptor, and announce it when it has a gateway mount path.
    pub async fn register(&self, directory: &dyn Directory) -> GatewayResult<()> {
        let descriptor = self.service.descriptor();
        directory.write(descriptor).await?;
        if descriptor.has_mount_path() {
            tracing::info!(key = %descriptor.key, mount = ?descriptor.mount_path, "Announcing service to gateway");
            directory.publish(descriptor).await?;
        }
        Ok(())
    }

    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(address = %listener.local_addr()?, key = %self.service.descriptor().key, "Backend service listening");
        axum::serve(listener, self.service.into_router())
            .with_graceful_shutdown(shutdown)
            .await
    }
}
