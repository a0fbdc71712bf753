//! Per-tier authorizers and their startup wiring.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::integrity::verify_private;
use crate::auth::legacy::LegacyBypass;
use crate::auth::signature::SignatureVerifier;
use crate::auth::token::{decode_unverified, parse_token, verify_claims};
use crate::auth::{AuthRequest, AuthorizationError, AuthorizationIdentity};
use crate::config::AuthConfig;
use crate::directory::CredentialStore;
use crate::error::GatewayResult;
use crate::routing::Tier;

/// Shared contract of all tiers.
#[async_trait]
pub trait Authorizer: Send + Sync {
    fn tier(&self) -> Tier;

    async fn authorize(&self, request: &AuthRequest) -> GatewayResult<AuthorizationIdentity>;
}

/// Token-based authorizer for one tier.
pub struct TierAuthorizer {
    tier: Tier,
    key: Vec<u8>,
    legacy: Option<LegacyBypass>,
    signature: Option<SignatureVerifier>,
    clock: fn() -> DateTime<Utc>,
}

impl TierAuthorizer {
    /// `key` verifies token signatures (strict, protect) or seeds the claim
    /// digest (private).
    pub fn new(tier: Tier, key: impl Into<Vec<u8>>) -> Self {
        Self {
            tier,
            key: key.into(),
            legacy: None,
            signature: None,
            clock: Utc::now,
        }
    }

    /// Honour the static bypass token. Ignored outside the strict tier.
    pub fn with_legacy(mut self, legacy: LegacyBypass) -> Self {
        if self.tier == Tier::Strict {
            self.legacy = Some(legacy);
        }
        self
    }

    pub fn with_signature(mut self, verifier: SignatureVerifier) -> Self {
        self.signature = Some(verifier);
        self
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    fn identity(&self, value: &str) -> Result<AuthorizationIdentity, AuthorizationError> {
        match self.tier {
            Tier::Strict => {
                if let Some(legacy) = self.legacy.as_ref().filter(|l| l.matches(value)) {
                    return legacy.claim((self.clock)());
                }
                Ok(verify_claims(value, &self.key)?.into_identity())
            }
            Tier::Protect => Ok(verify_claims(value, &self.key)?.into_identity()),
            Tier::Private => {
                let claims = decode_unverified(value)?;
                verify_private(&self.key, &claims)?;
                Ok(AuthorizationIdentity::default())
            }
        }
    }
}

#[async_trait]
impl Authorizer for TierAuthorizer {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn authorize(&self, request: &AuthRequest) -> GatewayResult<AuthorizationIdentity> {
        let token = parse_token(&request.token)?;
        if !token.is_bearer() {
            return Err(AuthorizationError::unsupported().into());
        }

        let identity = self.identity(&token.value)?;

        if let Some(verifier) = &self.signature {
            verifier.verify(request, &token.value).await?;
        }

        Ok(identity)
    }
}

/// One authorizer per tier, built once at startup.
#[derive(Clone)]
pub struct AuthEngines {
    protect: Arc<dyn Authorizer>,
    strict: Arc<dyn Authorizer>,
    private: Arc<dyn Authorizer>,
}

impl AuthEngines {
    pub fn new(
        protect: Arc<dyn Authorizer>,
        strict: Arc<dyn Authorizer>,
        private: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            protect,
            strict,
            private,
        }
    }

    pub fn from_config(config: &AuthConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        let signature = config
            .signature_enabled()
            .then(|| SignatureVerifier::new(credentials));

        let build = |tier: Tier, key: &str| {
            let mut authorizer = TierAuthorizer::new(tier, key.as_bytes());
            if let Some(verifier) = &signature {
                authorizer = authorizer.with_signature(verifier.clone());
            }
            authorizer
        };

        let legacy = config
            .legacy_token
            .as_deref()
            .map(LegacyBypass::new)
            .unwrap_or_default();

        tracing::info!(
            signature = signature.is_some(),
            environment = %config.environment,
            "Authorization engines ready"
        );

        Self {
            protect: Arc::new(build(Tier::Protect, &config.secret)),
            strict: Arc::new(build(Tier::Strict, &config.strict_secret).with_legacy(legacy)),
            private: Arc::new(build(Tier::Private, &config.private_secret)),
        }
    }

    pub fn for_tier(&self, tier: Tier) -> &Arc<dyn Authorizer> {
        match tier {
            Tier::Protect => &self.protect,
            Tier::Strict => &self.strict,
            Tier::Private => &self.private,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::integrity::private_digest;
    use crate::auth::legacy::LEGACY_TOKEN;
    use crate::auth::signature::{parse_timestamp, sign, string_to_sign};
    use crate::auth::token::tests::sign as sign_token;
    use crate::auth::token::TokenClaims;
    use crate::auth::AuthErrorKind;
    use crate::directory::MemoryDirectory;
    use crate::error::GatewayError;
    use axum::body::Bytes;
    use chrono::TimeZone;

    fn request(token: &str) -> AuthRequest {
        AuthRequest {
            method: "GET".into(),
            uri: "/orders".parse().unwrap(),
            body: Bytes::new(),
            client_id: "app".into(),
            timestamp: parse_timestamp("2024-03-01T10:20:30+0000"),
            signature: String::new(),
            token: token.into(),
        }
    }

    fn auth_kind(err: GatewayError) -> AuthErrorKind {
        match err {
            GatewayError::Authorization(e) => e.kind(),
            other => panic!("expected authorization error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_protect_tier_extracts_identity() {
        let engine = TierAuthorizer::new(Tier::Protect, "k");
        let token = sign_token(serde_json::json!({"id": "5", "organization_id": "2", "app": "9"}), b"k");

        let identity = engine.authorize(&request(&format!("Bearer {}", token))).await.unwrap();
        assert_eq!(identity.user_id, "5");
        assert_eq!(identity.organization_id, "2");
        assert_eq!(identity.app_id, "9");
    }

    #[tokio::test]
    async fn test_framing_and_type_errors() {
        let engine = TierAuthorizer::new(Tier::Protect, "k");
        let err = engine.authorize(&request("justoneword")).await.unwrap_err();
        assert_eq!(auth_kind(err), AuthErrorKind::MalformedToken);

        let err = engine.authorize(&request("type val extra")).await.unwrap_err();
        assert_eq!(auth_kind(err), AuthErrorKind::MalformedToken);

        let err = engine.authorize(&request("Basic abc")).await.unwrap_err();
        assert_eq!(auth_kind(err), AuthErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_tier_keys_are_separate() {
        let strict = TierAuthorizer::new(Tier::Strict, "strict-key");
        let token = sign_token(serde_json::json!({"id": "5"}), b"protect-key");
        let err = strict.authorize(&request(&format!("Bearer {}", token))).await.unwrap_err();
        assert_eq!(auth_kind(err), AuthErrorKind::InvalidToken);
    }

    #[tokio::test]
    async fn test_private_tier_uses_claim_digest() {
        let engine = TierAuthorizer::new(Tier::Private, "p");
        let mut claims = TokenClaims {
            user_id: "5".into(),
            username: "ana".into(),
            ..Default::default()
        };
        claims.jti = private_digest(b"p", &claims);
        let body = serde_json::json!({"jti": claims.jti, "id": "5", "username": "ana"});

        // Signed with an unrelated key: the signature is not what is checked.
        let token = sign_token(body.clone(), b"whatever");
        let identity = engine.authorize(&request(&format!("Bearer {}", token))).await.unwrap();
        assert_eq!(identity, AuthorizationIdentity::default());

        let mut tampered = body;
        tampered["username"] = "bob".into();
        let token = sign_token(tampered, b"whatever");
        let err = engine.authorize(&request(&format!("Bearer {}", token))).await.unwrap_err();
        assert_eq!(auth_kind(err), AuthErrorKind::IntegrityMismatch);
    }

    #[tokio::test]
    async fn test_legacy_token_only_in_strict_tier() {
        fn before_cutoff() -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
        }

        let strict = TierAuthorizer::new(Tier::Strict, "k")
            .with_legacy(LegacyBypass::default())
            .with_clock(before_cutoff);
        let identity = strict
            .authorize(&request(&format!("Bearer {}", LEGACY_TOKEN)))
            .await
            .unwrap();
        assert_eq!(identity.user_id, "1");

        let protect = TierAuthorizer::new(Tier::Protect, "k")
            .with_legacy(LegacyBypass::default())
            .with_clock(before_cutoff);
        let err = protect
            .authorize(&request(&format!("Bearer {}", LEGACY_TOKEN)))
            .await
            .unwrap_err();
        assert_eq!(auth_kind(err), AuthErrorKind::InvalidToken);

        let expired = TierAuthorizer::new(Tier::Strict, "k").with_legacy(LegacyBypass::default());
        let err = expired
            .authorize(&request(&format!("Bearer {}", LEGACY_TOKEN)))
            .await
            .unwrap_err();
        assert_eq!(auth_kind(err), AuthErrorKind::TokenRetired);
    }

    #[tokio::test]
    async fn test_signature_checked_after_token() {
        let directory = MemoryDirectory::new();
        directory.set_credential("app", "caller-secret");
        let engine = TierAuthorizer::new(Tier::Protect, "k")
            .with_signature(SignatureVerifier::new(Arc::new(directory)));

        let token = sign_token(serde_json::json!({"id": "5"}), b"k");
        let mut req = request(&format!("Bearer {}", token));

        let err = engine.authorize(&req).await.unwrap_err();
        assert_eq!(auth_kind(err), AuthErrorKind::SignatureMismatch);

        let message = string_to_sign("GET", &req.uri, &token, req.timestamp.as_ref(), b"");
        req.signature = sign(b"caller-secret", &message);
        assert_eq!(engine.authorize(&req).await.unwrap().user_id, "5");
    }

    #[test]
    fn test_from_config_signature_default() {
        let mut config = AuthConfig::default();
        config.environment = "local".into();
        assert!(!config.signature_enabled());
        config.environment = "production".into();
        assert!(config.signature_enabled());
        config.use_signature = Some(false);
        assert!(!config.signature_enabled());

        let engines = AuthEngines::from_config(&config, Arc::new(MemoryDirectory::new()));
        assert_eq!(engines.for_tier(Tier::Private).tier(), Tier::Private);
        assert_eq!(engines.for_tier(Tier::Strict).tier(), Tier::Strict);
    }
}
