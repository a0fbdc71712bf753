//! Request signatures.
//!
//! ```text
//! METHOD;escaped-path[?sorted-query];token;timestamp;sha256hex(body without whitespace)
//! ```
//! signed with HMAC-SHA256 under the caller's secret and sent hex encoded in
//! `x-gateway-signature`.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::Uri;
use chrono::{DateTime, FixedOffset};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use url::form_urlencoded;

use crate::auth::{AuthRequest, AuthorizationError};
use crate::directory::{CredentialError, CredentialStore};
use crate::error::{GatewayError, GatewayResult};

type HmacSha256 = Hmac<Sha256>;

/// `YYYY-MM-DDThh:mm:ss±hhmm`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Rendering of a missing timestamp.
const ZERO_TIMESTAMP: &str = "0001-01-01T00:00:00+0000";

pub fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT).ok()
}

pub fn format_timestamp(timestamp: Option<&DateTime<FixedOffset>>) -> String {
    match timestamp {
        Some(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        None => ZERO_TIMESTAMP.to_string(),
    }
}

fn escape(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
        .replace('*', "%2A")
        .replace("%7E", "~")
}

/// Re-encode a raw query: keys sorted, value order kept, spaces as `%20`.
pub fn canonical_query(raw: &str) -> String {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        grouped.entry(key.into_owned()).or_default().push(value.into_owned());
    }

    let mut pairs = Vec::new();
    for (key, values) in &grouped {
        let key = escape(key);
        for value in values {
            pairs.push(format!("{}={}", key, escape(value)));
        }
    }
    pairs.join("&")
}

fn body_digest(body: &[u8]) -> String {
    let stripped: Vec<u8> = body
        .iter()
        .copied()
        .filter(|b| !matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
        .collect();
    hex::encode(Sha256::digest(&stripped))
}

/// Canonical string the caller signs.
pub fn string_to_sign(
    method: &str,
    uri: &Uri,
    token: &str,
    timestamp: Option<&DateTime<FixedOffset>>,
    body: &[u8],
) -> String {
    let mut relative = uri.path().to_string();
    let query = canonical_query(uri.query().unwrap_or(""));
    if !query.is_empty() {
        relative.push('?');
        relative.push_str(&query);
    }

    format!(
        "{};{};{};{};{}",
        method,
        relative,
        token,
        format_timestamp(timestamp),
        body_digest(body),
    )
}

/// Lower-case hex HMAC-SHA256 of `message`.
pub fn sign(secret: &[u8], message: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of a supplied signature with the expected one.
pub fn signatures_match(supplied: &str, expected: &str) -> bool {
    !expected.is_empty() && bool::from(supplied.as_bytes().ct_eq(expected.as_bytes()))
}

/// Checks request signatures against secrets from a credential store.
#[derive(Clone)]
pub struct SignatureVerifier {
    credentials: Arc<dyn CredentialStore>,
}

impl SignatureVerifier {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self { credentials }
    }

    /// `token` is the bearer value, without its type prefix.
    pub async fn verify(&self, request: &AuthRequest, token: &str) -> GatewayResult<()> {
        let secret = match self.credentials.secret_by_id(&request.client_id).await {
            Ok(secret) => secret,
            Err(CredentialError::NotFound(_)) => {
                return Err(AuthorizationError::composite_failed().into());
            }
            Err(e) => return Err(GatewayError::Internal(e.to_string())),
        };

        let message = string_to_sign(
            &request.method,
            &request.uri,
            token,
            request.timestamp.as_ref(),
            &request.body,
        );
        let expected = sign(secret.as_bytes(), &message);

        if signatures_match(&request.signature, &expected) {
            Ok(())
        } else {
            tracing::debug!(client_id = %request.client_id, "Request signature mismatch");
            Err(AuthorizationError::signature_mismatch().into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthErrorKind;
    use crate::directory::MemoryDirectory;
    use axum::body::Bytes;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_timestamp_format() {
        let ts = parse_timestamp("2024-03-01T10:20:30+0700").unwrap();
        assert_eq!(format_timestamp(Some(&ts)), "2024-03-01T10:20:30+0700");
        assert!(parse_timestamp("2024-03-01 10:20:30").is_none());
        assert_eq!(format_timestamp(None), "0001-01-01T00:00:00+0000");
    }

    #[test]
    fn test_canonical_query() {
        assert_eq!(canonical_query("b=2&a=x+y&a=1"), "a=x%20y&a=1&b=2");
        assert_eq!(canonical_query("q=a%20b~c*"), "q=a%20b~c%2A");
        assert_eq!(canonical_query(""), "");
    }

    #[test]
    fn test_string_to_sign_layout() {
        let ts = parse_timestamp("2024-03-01T10:20:30+0000").unwrap();
        let s = string_to_sign("POST", &uri("/orders/1?z=1&a=2"), "tok", Some(&ts), b" {\"a\": 1}\n");
        let expected_body = hex::encode(Sha256::digest(b"{\"a\":1}"));
        assert_eq!(
            s,
            format!("POST;/orders/1?a=2&z=1;tok;2024-03-01T10:20:30+0000;{}", expected_body)
        );
    }

    #[test]
    fn test_any_byte_change_breaks_signature() {
        let message = "GET;/a;tok;2024-03-01T10:20:30+0000;abc";
        let good = sign(b"secret", message);
        assert!(signatures_match(&good, &sign(b"secret", message)));

        let mut flipped = message.as_bytes().to_vec();
        flipped[0] ^= 0x01;
        let flipped = String::from_utf8(flipped).unwrap();
        assert!(!signatures_match(&good, &sign(b"secret", &flipped)));
        assert!(!signatures_match(&good[..10], &good));
    }

    fn request(client_id: &str, signature: String) -> AuthRequest {
        AuthRequest {
            method: "GET".into(),
            uri: uri("/orders?id=1"),
            body: Bytes::new(),
            client_id: client_id.into(),
            timestamp: parse_timestamp("2024-03-01T10:20:30+0000"),
            signature,
            token: "Bearer tok".into(),
        }
    }

    #[tokio::test]
    async fn test_verifier() {
        let directory = MemoryDirectory::new();
        directory.set_credential("app", "secret");
        let verifier = SignatureVerifier::new(Arc::new(directory));

        let unsigned = request("app", String::new());
        let message = string_to_sign("GET", &unsigned.uri, "tok", unsigned.timestamp.as_ref(), b"");
        let good = request("app", sign(b"secret", &message));
        verifier.verify(&good, "tok").await.unwrap();

        let err = verifier.verify(&request("app", "00".into()), "tok").await.unwrap_err();
        assert!(matches!(err, GatewayError::Authorization(e) if e.kind() == AuthErrorKind::SignatureMismatch));

        let err = verifier.verify(&request("ghost", "00".into()), "tok").await.unwrap_err();
        assert!(matches!(err, GatewayError::Authorization(e) if e.kind() == AuthErrorKind::CompositeFailed));
    }
}
