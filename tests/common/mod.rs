//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use api_gateway::auth::AuthEngines;
use api_gateway::composite::Connector;
use api_gateway::directory::{ConnectionKind, Directory, MemoryDirectory, ServiceDescriptor};
use api_gateway::rpc::{BackendServer, BackendService, HttpDialer};
use api_gateway::{Forwarder, GatewayConfig, GatewayServer, GatewayState, RegistrationController, Shutdown};
use tokio::net::TcpListener;

/// A gateway on an ephemeral port, wired to an in-memory directory.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub directory: MemoryDirectory,
    pub forwarder: Arc<Forwarder>,
    shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Poll until `segment` resolves to a mounted service.
    pub async fn wait_for_mount(&self, segment: &str) {
        for _ in 0..250 {
            if self.forwarder.resolve(segment).is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("service {} was never mounted", segment);
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start the server and the registration controller.
pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let directory = MemoryDirectory::new();
    let forwarder = Arc::new(Forwarder::new());
    let shutdown = Shutdown::new();

    let dialer = HttpDialer::new().with_max_reply_bytes(config.forwarding.max_reply_bytes);
    let connector = Connector::new(Arc::new(dialer))
        .with_static_routes(config.static_route_table().unwrap())
        .with_hostname("gateway-test");
    let controller = RegistrationController::new(Arc::new(directory.clone()), connector, forwarder.clone());
    let controller_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = controller.run(controller_shutdown).await;
    });

    let engines = Arc::new(AuthEngines::from_config(&config.auth, Arc::new(directory.clone())));
    let state = GatewayState::new(&config, forwarder.clone(), engines);
    let server = GatewayServer::new(&config, state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stopped = shutdown.wait();
    tokio::spawn(async move {
        let _ = server.run(listener, stopped).await;
    });

    TestGateway {
        addr,
        directory,
        forwarder,
        shutdown,
    }
}

/// Bind an ephemeral port for a backend that needs to know it up front.
pub async fn bind_local() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Register `service` with the gateway's directory and serve it until the
/// returned sender fires or is dropped.
pub async fn start_backend(
    gateway: &TestGateway,
    listener: TcpListener,
    service: BackendService,
) -> (tokio::sync::oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let server = BackendServer::new(service);
    server.register(&gateway.directory).await.unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let _ = server
            .serve(listener, async move {
                let _ = rx.await;
            })
            .await;
    });
    (tx, handle)
}

/// Serve a plain axum router and announce it as an HTTP-kind service.
pub async fn start_http_backend(gateway: &TestGateway, key: &str, router: axum::Router) -> SocketAddr {
    let (listener, port) = bind_local().await;
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    let descriptor = ServiceDescriptor::new("127.0.0.1", port, key)
        .with_kind(ConnectionKind::Http)
        .with_mount_path(format!("/{}", key));
    gateway.directory.write(&descriptor).await.unwrap();
    gateway.directory.publish(&descriptor).await.unwrap();
    addr
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// HS256 token over `claims`.
pub fn token(claims: serde_json::Value, key: &str) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(key.as_bytes()),
    )
    .unwrap()
}
