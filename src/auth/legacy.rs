//! Retired static token accepted by the strict tier until a fixed cutoff.
//!
//! Migration scaffolding. Past the cutoff every use is rejected.

use chrono::{DateTime, TimeZone, Utc};

use crate::auth::{AuthorizationError, AuthorizationIdentity};

/// The one static token value honoured before the cutoff.
pub const LEGACY_TOKEN: &str = "eyJ0eXAiOiJKV1QiLCJhbGciOiJIUzI1NiJ9.eyJleHAiOjE1OTM4MzgyNTksImlhdCI6MTU5MTI0NjI1OSwiaXNzIjoiYmFja29mZmljZS0yLjAiLCJqdGkiOiI0NDRmNzAzZTJkYTI0ZGYxMzZlOWM5YTk2OTc3N2E3OCIsInVhdCI6IjFkYzg2MGFmMjBkNGM3Yzg2ZDdkZWNmYzAxOGZmMzU4WkRRMk9HTXdZekF0Wm1KaFlTMHhNV1U1TFdJME16Y3RNREF4TmpObE1ERTJaRFJqIiwidWVtIjoiMWRjODYwYWYyMGQ0YzdjODZkN2RlY2ZjMDE4ZmYzNThZVzVrZDJsQWEyOXBibmR2Y210ekxtTnZiUT09IiwidWlkIjoiMWRjODYwYWYyMGQ0YzdjODZkN2RlY2ZjMDE4ZmYzNThNUT09IiwidW5xIjoiMWRjODYwYWYyMGQ0YzdjODZkN2RlY2ZjMDE4ZmYzNThOVFkzT1RNek5tTXRZekkxTXkwMFpUWXlMVGxtWm1FdFlqY3paR0l4TVRCak4yTTAiLCJ1YWQiOiIxZGM4NjBhZjIwZDRjN2M4NmQ3ZGVjZmMwMThmZjM1OFlYTnpaWE56YjNJPSJ9.XbS48y2XHkSqf9WMRFqDCzSBJSXtTDhHYz-imbU8mos";

fn default_cutoff() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 1, 15, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Clone)]
pub struct LegacyBypass {
    token: String,
    cutoff: DateTime<Utc>,
}

impl LegacyBypass {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            cutoff: default_cutoff(),
        }
    }

    pub fn with_cutoff(mut self, cutoff: DateTime<Utc>) -> Self {
        self.cutoff = cutoff;
        self
    }

    pub fn matches(&self, value: &str) -> bool {
        !self.token.is_empty() && self.token == value
    }

    /// Synthetic identity for the static token, or a rejection after the cutoff.
    pub fn claim(&self, now: DateTime<Utc>) -> Result<AuthorizationIdentity, AuthorizationError> {
        if now > self.cutoff {
            tracing::warn!(cutoff = %self.cutoff, "Retired static token presented");
            return Err(AuthorizationError::token_retired());
        }

        Ok(AuthorizationIdentity {
            user_id: "1".to_string(),
            username: format!("admin+{}", now.format("%Y%m%d")),
            organization_id: "0".to_string(),
            app_id: "0".to_string(),
            ..Default::default()
        })
    }
}

impl Default for LegacyBypass {
    fn default() -> Self {
        Self::new(LEGACY_TOKEN)
    }
}
