//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: liveness probe plus the service catch-all
//! - Wire the pipeline stages as route layers
//! - Wire cross-cutting layers (request ID, tracing, CORS, no-cache, body limit, timeout)
//! - Optionally nest everything under a base path
//! - Serve with connect info and graceful shutdown

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::header::{CACHE_CONTROL, EXPIRES, PRAGMA};
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::auth::AuthEngines;
use crate::config::{ForwardingConfig, GatewayConfig};
use crate::gateway::Forwarder;
use crate::http::forward::forward;
use crate::http::pipeline::{authorize, identify_agent, resolve_service};
use crate::http::request::{propagate_request_id_layer, request_span, set_request_id_layer};
use crate::http::response::CONTENT_TYPE_JSON;
use crate::rpc::client::{pooled_client, PooledClient};

/// Application state injected into handlers and pipeline stages.
#[derive(Clone)]
pub struct GatewayState {
    pub forwarder: Arc<Forwarder>,
    pub engines: Arc<AuthEngines>,
    pub client: PooledClient,
    pub locale: String,
    pub forwarding: ForwardingConfig,
}

impl GatewayState {
    pub fn new(config: &GatewayConfig, forwarder: Arc<Forwarder>, engines: Arc<AuthEngines>) -> Self {
        Self {
            forwarder,
            engines,
            client: pooled_client(),
            locale: config.auth.locale.clone(),
            forwarding: config.forwarding.clone(),
        }
    }
}

/// The gateway's HTTP surface.
pub struct GatewayServer {
    router: Router,
}

impl GatewayServer {
    pub fn new(config: &GatewayConfig, state: GatewayState) -> Self {
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Router with all layers applied; usable without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: GatewayState) -> Router {
        let surface = Router::new()
            .route("/{service}", any(forward))
            .route("/{service}/{*rest}", any(forward))
            .route_layer(from_fn_with_state(state.clone(), authorize))
            .route_layer(from_fn_with_state(state.clone(), resolve_service))
            .route_layer(from_fn(identify_agent))
            .route("/", get(liveness))
            .layer(DefaultBodyLimit::max(config.forwarding.max_body_bytes))
            .with_state(state);

        let app = match config.listener.base_path.as_str() {
            "" | "/" => surface,
            base => Router::new().nest(base, surface),
        };

        app.layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http().make_span_with(request_span))
                .layer(propagate_request_id_layer())
                .layer(cors_layer())
                .layer(SetResponseHeaderLayer::overriding(
                    CACHE_CONTROL,
                    HeaderValue::from_static("no-cache, no-store, no-transform, must-revalidate, private, max-age=0"),
                ))
                .layer(SetResponseHeaderLayer::overriding(PRAGMA, HeaderValue::from_static("no-cache")))
                .layer(SetResponseHeaderLayer::overriding(
                    EXPIRES,
                    HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 UTC"),
                ))
                .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
        )
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Liveness probe: 200 with an empty body.
async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE_JSON)])
}

/// Any `http://` or `https://` origin, fixed methods and header allow-list.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            let origin = origin.as_bytes();
            origin.starts_with(b"https://") || origin.starts_with(b"http://")
        }))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
            header::ACCEPT_ENCODING,
            header::COOKIE,
            header::ORIGIN,
            HeaderName::from_static("x-api-key"),
        ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::tests::sign;
    use crate::composite::{CompositeConnection, Transport};
    use crate::composite::connector::tests::MockClient;
    use crate::directory::MemoryDirectory;
    use crate::http::response::Envelope;
    use crate::routing::{PathPattern, ProtectedRoutes, Tier};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.auth.secret = "protect-key".into();
        config.auth.use_signature = Some(false);
        config
    }

    fn server(config: &GatewayConfig) -> (GatewayServer, Arc<Forwarder>) {
        let forwarder = Arc::new(Forwarder::new());
        let engines = Arc::new(AuthEngines::from_config(&config.auth, Arc::new(MemoryDirectory::new())));
        let state = GatewayState::new(config, forwarder.clone(), engines);
        (GatewayServer::new(config, state), forwarder)
    }

    fn mount_orders(forwarder: &Forwarder) {
        let mut routes = ProtectedRoutes::new();
        routes.push("GET", PathPattern::compile("/items/{id}").unwrap(), Tier::Protect);
        routes.push("GET", PathPattern::compile("/secret").unwrap(), Tier::Protect);
        forwarder.mount(CompositeConnection::new(
            "orders",
            "orders",
            Transport::Rpc(MockClient::new(None)),
            routes,
        ));
    }

    async fn envelope(response: axum::response::Response) -> Envelope {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_liveness() {
        let (server, _) = server(&config());
        let response = server
            .router()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert!(response.headers()["cache-control"].to_str().unwrap().contains("no-cache"));
    }

    #[tokio::test]
    async fn test_unknown_service_is_501() {
        let (server, _) = server(&config());
        let response = server
            .router()
            .oneshot(Request::get("/ghost/items").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        let body = envelope(response).await;
        assert_eq!(body.response, 501);
        assert_eq!(body.error, "Service not registered");
        assert_eq!(body.svcid, "ghost");
        assert_eq!(body.controller, "/ghost/items");
        assert_eq!(body.action, "GET");
    }

    #[tokio::test]
    async fn test_protected_route_without_token_is_401() {
        let (server, forwarder) = server(&config());
        mount_orders(&forwarder);

        let response = server
            .router()
            .oneshot(Request::get("/orders/items/9").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = envelope(response).await;
        assert_eq!(body.response, 401);
        assert!(!body.error.is_empty());
    }

    #[tokio::test]
    async fn test_encoded_or_dotted_path_to_protected_route_is_401() {
        let (server, forwarder) = server(&config());
        mount_orders(&forwarder);

        for path in ["/orders/%73ecret", "/orders//secret", "/orders/./secret", "/orders/x/../secret", "/orders/items/%39"] {
            let response = server
                .router()
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", path);
        }
    }

    #[tokio::test]
    async fn test_oversized_body_to_protected_route_is_rejected() {
        let mut config = config();
        config.forwarding.max_body_bytes = 16;
        let (server, forwarder) = server(&config);
        mount_orders(&forwarder);
        let token = sign(serde_json::json!({ "id": "42", "username": "ana" }), b"protect-key");

        let response = server
            .router()
            .oneshot(
                Request::get("/orders/items/9")
                    .header("authorization", format!("Bearer {}", token))
                    .body(Body::from(vec![b'x'; 64]))
                    .unwrap(),
            )
            .await
            .unwrap();

        // Never reaches the backend, which would answer 503.
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(envelope(response).await.error.starts_with("while reading body"));
    }

    #[tokio::test]
    async fn test_authorized_dispatch_failure_is_503() {
        let (server, forwarder) = server(&config());
        mount_orders(&forwarder);
        let token = sign(serde_json::json!({ "id": "42", "username": "ana" }), b"protect-key");

        let response = server
            .router()
            .oneshot(
                Request::get("/orders/items/9")
                    .header("authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        // The mock client refuses every dispatch as unavailable.
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = envelope(response).await;
        assert_eq!(body.controller, "/orders/items/9");
        assert_eq!(body.action, "GET");
    }

    #[tokio::test]
    async fn test_base_path_nesting() {
        let mut config = config();
        config.listener.base_path = "/gw".into();
        let (server, _) = server(&config);

        let response = server
            .router()
            .oneshot(Request::get("/gw/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(envelope(response).await.controller, "/gw/ghost");

        let response = server
            .router()
            .oneshot(Request::get("/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
