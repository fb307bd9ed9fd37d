// Token endpoint response parsing.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use sso_bridge_core::types::TokenSet;

/// Raw token response (snake_case wire format).
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawTokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
}

/// Parse a token endpoint body. Returns `None` when no access token is present.
///
/// An `expires_in` that is not positive, or too large to land on a
/// representable instant, leaves `expires_at` unset.
pub fn parse_token_response(data: &serde_json::Value, now: DateTime<Utc>) -> Option<TokenSet> {
    let raw: RawTokenResponse = serde_json::from_value(data.clone()).unwrap_or_default();
    let access_token = raw.access_token.filter(|t| !t.is_empty())?;

    Some(TokenSet {
        access_token,
        refresh_token: raw.refresh_token,
        id_token: raw.id_token,
        token_type: raw.token_type,
        scope: raw.scope,
        expires_at: raw
            .expires_in
            .filter(|secs| *secs > 0)
            .and_then(chrono::Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_response() {
        let now = Utc::now();
        let raw = serde_json::json!({
            "access_token": "ya29.abc",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "1//xyz",
            "scope": "openid email profile",
            "id_token": "ey.jwt.token"
        });

        let tokens = parse_token_response(&raw, now).unwrap();
        assert_eq!(tokens.access_token, "ya29.abc");
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//xyz"));
        assert_eq!(tokens.expires_at, Some(now + chrono::Duration::hours(1)));
    }

    #[test]
    fn test_oversized_expires_in_means_no_expiry() {
        let now = Utc::now();
        for expires_in in [i64::MAX, i64::MAX / 1000, 400_000_000_000_000] {
            let raw = serde_json::json!({"access_token": "at", "expires_in": expires_in});
            let tokens = parse_token_response(&raw, now).unwrap();
            assert_eq!(tokens.expires_at, None, "expires_in = {expires_in}");
        }
    }

    #[test]
    fn test_non_positive_expires_in_means_no_expiry() {
        let raw = serde_json::json!({"access_token": "at", "expires_in": -5});
        assert_eq!(parse_token_response(&raw, Utc::now()).unwrap().expires_at, None);
        let raw = serde_json::json!({"access_token": "at", "expires_in": 0});
        assert_eq!(parse_token_response(&raw, Utc::now()).unwrap().expires_at, None);
    }

    #[test]
    fn test_missing_access_token() {
        assert!(parse_token_response(&serde_json::json!({"token_type": "Bearer"}), Utc::now()).is_none());
        assert!(parse_token_response(&serde_json::json!("oops"), Utc::now()).is_none());
    }
}
