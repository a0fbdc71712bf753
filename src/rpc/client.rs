//! HTTP/1.1 implementation of the service transport.
//!
//! Handshake bodies are JSON. Dispatch bodies are passed through untouched;
//! method, path, status and metadata ride in `x-rpc-*` headers.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::rpc::{
    Dialer, DispatchReply, DispatchRequest, HandshakeRequest, HandshakeResponse, Metadata,
    RpcError, ServiceClient, DISPATCH_PATH, HANDSHAKE_PATH, HEADER_METHOD, HEADER_PATH,
    HEADER_SERVER, HEADER_STATUS, METADATA_PREFIX,
};

/// Reply ceiling used when no other limit is configured.
pub const DEFAULT_MAX_REPLY_BYTES: usize = 32 * 1024 * 1024;

/// Shared pooled client for all backends.
pub type PooledClient = Client<HttpConnector, Body>;

pub fn pooled_client() -> PooledClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

/// Opens [`HttpServiceClient`]s over one connection pool.
#[derive(Clone)]
pub struct HttpDialer {
    client: PooledClient,
    max_reply_bytes: usize,
}

impl HttpDialer {
    pub fn new() -> Self {
        Self {
            client: pooled_client(),
            max_reply_bytes: DEFAULT_MAX_REPLY_BYTES,
        }
    }

    pub fn with_max_reply_bytes(mut self, max_reply_bytes: usize) -> Self {
        self.max_reply_bytes = max_reply_bytes;
        self
    }
}

impl Default for HttpDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for HttpDialer {
    async fn dial(&self, address: &str) -> Result<Arc<dyn ServiceClient>, RpcError> {
        let client =
            HttpServiceClient::new(self.client.clone(), address)?.with_max_reply_bytes(self.max_reply_bytes);
        Ok(Arc::new(client))
    }
}

/// Client bound to one `host:port`.
pub struct HttpServiceClient {
    client: PooledClient,
    authority: String,
    max_reply_bytes: usize,
    closed: AtomicBool,
}

impl HttpServiceClient {
    pub fn new(client: PooledClient, address: &str) -> Result<Self, RpcError> {
        let authority = address.trim().to_string();
        // Reject anything that is not a bare authority.
        Uri::from_str(&format!("http://{}/", authority))
            .ok()
            .filter(|uri| uri.path() == "/" && uri.authority().is_some())
            .ok_or_else(|| RpcError::InvalidTarget(address.to_string()))?;

        Ok(Self {
            client,
            authority,
            max_reply_bytes: DEFAULT_MAX_REPLY_BYTES,
            closed: AtomicBool::new(false),
        })
    }

    /// Replies larger than this fail instead of being buffered.
    pub fn with_max_reply_bytes(mut self, max_reply_bytes: usize) -> Self {
        self.max_reply_bytes = max_reply_bytes;
        self
    }

    fn uri(&self, path: &str) -> Result<Uri, RpcError> {
        Uri::from_str(&format!("http://{}{}", self.authority, path))
            .map_err(|_| RpcError::InvalidTarget(self.authority.clone()))
    }

    fn ensure_open(&self) -> Result<(), RpcError> {
        if self.closed.load(Ordering::Acquire) {
            Err(RpcError::Closed)
        } else {
            Ok(())
        }
    }

    async fn send(&self, request: Request<Body>) -> Result<(StatusCode, HeaderMap, Bytes), RpcError> {
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| RpcError::Unavailable(format!("{}: {}", self.authority, e)))?;

        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(Body::new(body), self.max_reply_bytes)
            .await
            .map_err(|e| RpcError::Unavailable(format!("{}: reading reply: {}", self.authority, e)))?;
        Ok((parts.status, parts.headers, bytes))
    }
}

#[async_trait]
impl ServiceClient for HttpServiceClient {
    async fn handshake(&self, request: HandshakeRequest) -> Result<HandshakeResponse, RpcError> {
        self.ensure_open()?;

        let payload = serde_json::to_vec(&request).map_err(|e| RpcError::Codec(e.to_string()))?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.uri(HANDSHAKE_PATH)?)
            .header("content-type", "application/json")
            .body(Body::from(payload))
            .map_err(|e| RpcError::Codec(e.to_string()))?;

        let (status, _, body) = self.send(request).await?;
        if status != StatusCode::OK {
            return Err(RpcError::Status {
                code: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        serde_json::from_slice(&body).map_err(|e| RpcError::Codec(e.to_string()))
    }

    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchReply, RpcError> {
        self.ensure_open()?;

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.uri(DISPATCH_PATH)?)
            .header(HEADER_METHOD, header_value(&request.method)?)
            .header(HEADER_PATH, header_value(&request.path)?);

        if let Some(headers) = builder.headers_mut() {
            write_metadata(headers, &request.metadata);
        }

        let request = builder
            .body(Body::from(request.body))
            .map_err(|e| RpcError::Codec(e.to_string()))?;

        let (status, headers, body) = self.send(request).await?;
        if status != StatusCode::OK {
            return Err(RpcError::Status {
                code: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let reply_status = headers
            .get(HEADER_STATUS)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u16>().ok())
            .ok_or_else(|| RpcError::Codec("missing reply status".to_string()))?;
        let server = headers
            .get(HEADER_SERVER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("?")
            .to_string();

        Ok(DispatchReply {
            server,
            status: reply_status,
            body,
            metadata: read_metadata(&headers),
        })
    }

    fn close(&self) -> Result<(), RpcError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(RpcError::Closed);
        }
        tracing::debug!(target_addr = %self.authority, "Service client closed");
        Ok(())
    }
}

fn header_value(value: &str) -> Result<HeaderValue, RpcError> {
    HeaderValue::from_str(value).map_err(|e| RpcError::Codec(format!("{:?}: {}", value, e)))
}

/// Copy metadata into `x-rpc-md-*` headers. Entries that are not valid
/// header text are dropped.
pub(crate) fn write_metadata(headers: &mut HeaderMap, metadata: &Metadata) {
    for (key, value) in metadata {
        let name = HeaderName::from_str(&format!("{}{}", METADATA_PREFIX, key.to_ascii_lowercase()));
        match (name, HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(key = %key, "Dropping metadata entry that is not valid header text"),
        }
    }
}

/// Collect `x-rpc-md-*` headers back into metadata.
pub(crate) fn read_metadata(headers: &HeaderMap) -> Metadata {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(METADATA_PREFIX)?;
            let value = std::str::from_utf8(value.as_bytes()).ok()?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
