//! A mounted backend.

use std::fmt;
use std::sync::Arc;

use crate::error::{GatewayError, GatewayResult};
use crate::routing::{ProtectedRoutes, Tier};
use crate::rpc::{DispatchReply, DispatchRequest, RpcError, ServiceClient};

/// How requests reach the backend.
#[derive(Clone)]
pub enum Transport {
    /// Translated into dispatch calls.
    Rpc(Arc<dyn ServiceClient>),
    /// Proxied as plain HTTP to `base_url`.
    Http { base_url: String },
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Rpc(_) => f.write_str("Rpc"),
            Transport::Http { base_url } => write!(f, "Http({})", base_url),
        }
    }
}

/// Protection requirements of one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteClass {
    pub needs_auth: bool,
    pub is_strict: bool,
    pub is_private: bool,
}

impl RouteClass {
    pub fn from_tier(tier: Option<Tier>) -> Self {
        match tier {
            None => Self::default(),
            Some(tier) => Self {
                needs_auth: true,
                is_strict: tier == Tier::Strict,
                is_private: tier == Tier::Private,
            },
        }
    }

    /// Tier whose authorizer must run, if any.
    pub fn tier(&self) -> Option<Tier> {
        match (self.needs_auth, self.is_strict, self.is_private) {
            (false, _, _) => None,
            (true, _, true) => Some(Tier::Private),
            (true, true, false) => Some(Tier::Strict),
            (true, false, false) => Some(Tier::Protect),
        }
    }
}

/// Runtime binding of a key to a live backend and its protected routes.
#[derive(Debug)]
pub struct CompositeConnection {
    key: String,
    mount_path: String,
    transport: Transport,
    protected: ProtectedRoutes,
}

impl CompositeConnection {
    pub fn new(
        key: impl Into<String>,
        mount_path: impl Into<String>,
        transport: Transport,
        protected: ProtectedRoutes,
    ) -> Self {
        Self {
            key: key.into(),
            mount_path: mount_path.into(),
            transport,
            protected,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Slash-trimmed mount path; empty when the backend has none.
    pub fn mount_path(&self) -> &str {
        &self.mount_path
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn protected_routes(&self) -> &ProtectedRoutes {
        &self.protected
    }

    /// Close the transport. Call at most once.
    pub fn stop(&self) -> GatewayResult<()> {
        match &self.transport {
            Transport::Rpc(client) => client.close().map_err(GatewayError::from),
            Transport::Http { .. } => Ok(()),
        }
    }

    /// First protected entry for `method` matching `path` decides the class.
    pub fn classify_route(&self, method: &str, path: &str) -> RouteClass {
        RouteClass::from_tier(self.protected.classify(method, path))
    }

    /// Forward a dispatch call. Plain HTTP backends have no dispatch channel.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchReply, RpcError> {
        match &self.transport {
            Transport::Rpc(client) => client.dispatch(request).await,
            Transport::Http { base_url } => Err(RpcError::InvalidTarget(base_url.clone())),
        }
    }
}
