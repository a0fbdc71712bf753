//! Keyed claim digest for the private tier.
//!
//! Private tokens are not trusted for their signature. Instead the issuer
//! stores `HMAC-SHA256(secret, "private:[id:username:isorgadmin:isactive:org:app]")`
//! in the token id, and the gateway recomputes it.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::auth::token::TokenClaims;
use crate::auth::AuthorizationError;

type HmacSha256 = Hmac<Sha256>;

fn canonical(claims: &TokenClaims) -> String {
    format!(
        "private:[{}:{}:{}:{}:{}:{}]",
        claims.user_id,
        claims.username,
        claims.isorgadmin,
        claims.isactive,
        claims.organization_id,
        claims.app_id,
    )
}

/// Lower-case hex digest expected in the token id.
pub fn private_digest(secret: &[u8], claims: &TokenClaims) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(canonical(claims).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Fail closed unless the token id equals the recomputed digest.
pub fn verify_private(secret: &[u8], claims: &TokenClaims) -> Result<(), AuthorizationError> {
    let expected = private_digest(secret, claims);
    let matches = !expected.is_empty()
        && bool::from(expected.as_bytes().ct_eq(claims.jti.as_bytes()));
    if matches {
        Ok(())
    } else {
        Err(AuthorizationError::integrity_mismatch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthErrorKind;

    fn claims() -> TokenClaims {
        TokenClaims {
            user_id: "42".into(),
            username: "ana".into(),
            isorgadmin: 1,
            isactive: 1,
            organization_id: "9".into(),
            app_id: "3".into(),
            ..Default::default()
        }
    }

    fn sealed(secret: &[u8]) -> TokenClaims {
        let mut c = claims();
        c.jti = private_digest(secret, &c);
        c
    }

    #[test]
    fn test_matching_digest_verifies() {
        assert!(verify_private(b"private-secret", &sealed(b"private-secret")).is_ok());
    }

    #[test]
    fn test_any_mutated_field_fails_closed() {
        let base = sealed(b"s");
        let mutations: Vec<Box<dyn Fn(&mut TokenClaims)>> = vec![
            Box::new(|c| c.user_id = "43".into()),
            Box::new(|c| c.username = "bob".into()),
            Box::new(|c| c.isorgadmin = 0),
            Box::new(|c| c.isactive = 0),
            Box::new(|c| c.organization_id = "10".into()),
            Box::new(|c| c.app_id = "4".into()),
        ];

        for mutate in mutations {
            let mut c = base.clone();
            mutate(&mut c);
            let err = verify_private(b"s", &c).unwrap_err();
            assert_eq!(err.kind(), AuthErrorKind::IntegrityMismatch);
            assert_eq!(err.machine(), "invalid authorization token, 0x10001");
        }
    }

    #[test]
    fn test_wrong_secret_fails() {
        assert!(verify_private(b"other", &sealed(b"s")).is_err());
    }
}
