//! Authorization header framing and JWT claim extraction.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Deserializer};

use crate::auth::{AuthorizationError, AuthorizationIdentity};

pub const TOKEN_TYPE_BEARER: &str = "bearer";

/// `{type} {value}` split out of an authorization header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Lower-cased.
    pub kind: String,
    pub value: String,
}

impl Token {
    pub fn is_bearer(&self) -> bool {
        self.kind == TOKEN_TYPE_BEARER
    }
}

/// Split a header value into exactly two single-space separated parts.
pub fn parse_token(source: &str) -> Result<Token, AuthorizationError> {
    if source.is_empty() {
        return Err(AuthorizationError::token_not_found());
    }

    let parts: Vec<&str> = source.split(' ').collect();
    let [kind, value] = parts.as_slice() else {
        return Err(AuthorizationError::malformed_token());
    };

    Ok(Token {
        kind: kind.to_ascii_lowercase(),
        value: value.to_string(),
    })
}

/// Claims carried by gateway tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    /// Standard token id; holds the integrity digest for the private tier.
    #[serde(default)]
    pub jti: String,
    #[serde(rename = "id", default, deserialize_with = "string_or_number")]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub isorgadmin: i64,
    #[serde(default)]
    pub isactive: i64,
    #[serde(default, deserialize_with = "string_or_number")]
    pub organization_id: String,
    #[serde(rename = "app", default, deserialize_with = "string_or_number")]
    pub app_id: String,
    #[serde(default)]
    pub exp: Option<i64>,
}

impl TokenClaims {
    pub fn into_identity(self) -> AuthorizationIdentity {
        AuthorizationIdentity {
            user_id: self.user_id,
            username: self.username,
            is_org_admin: self.isorgadmin,
            is_active: self.isactive,
            organization_id: self.organization_id,
            app_id: self.app_id,
            exp: self.exp.unwrap_or(0),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
    validation.required_spec_claims.clear();
    validation.validate_aud = false;
    validation
}

/// Verify an HMAC-signed token with `key` and return its claims.
pub fn verify_claims(value: &str, key: &[u8]) -> Result<TokenClaims, AuthorizationError> {
    decode::<TokenClaims>(value, &DecodingKey::from_secret(key), &validation())
        .map(|data| data.claims)
        .map_err(AuthorizationError::invalid_token)
}

/// Decode claims without checking the token signature.
pub fn decode_unverified(value: &str) -> Result<TokenClaims, AuthorizationError> {
    let mut validation = validation();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    decode::<TokenClaims>(value, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(AuthorizationError::invalid_token)
}
