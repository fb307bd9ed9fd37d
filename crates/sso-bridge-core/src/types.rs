// Values exchanged between providers, provisioning and the session store.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Provider User Info ──────────────────────────────────────────

/// Identity resolved by one successful protocol exchange.
///
/// Never persisted as-is: provisioning consumes it immediately and the
/// session stores only what it needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUserInfo {
    /// Stable identifier at the provider (`sub`, NameID, LDAP username).
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Internal roles resolved through the configuration's role mapping.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Internal groups resolved through the configuration's group mapping.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Raw provider attributes / claims.
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    /// Tokens obtained during the exchange (OAuth only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenSet>,
}

impl ProviderUserInfo {
    /// Display name built from first and last name, if any.
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

// ─── Callback / Credentials ──────────────────────────────────────

/// Raw callback parameters as received by the host handler
/// (`code`, `state`, `SAMLResponse`, `RelayState`, `error`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackParams(HashMap<String, String>);

impl CallbackParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// The value for `key`, treating an empty string as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

impl From<HashMap<String, String>> for CallbackParams {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CallbackParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Username + password submitted directly for LDAP.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ─── Tokens ──────────────────────────────────────────────────────

/// Tokens returned by an OAuth token endpoint.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ─── Session ─────────────────────────────────────────────────────

/// A persisted SSO session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoSession {
    pub id: String,
    pub user_id: String,
    pub config_id: String,
    pub provider_user_id: String,
    /// Opaque per-protocol data (token set, NameID, DN, ...).
    #[serde(default)]
    pub session_data: serde_json::Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_used_at: DateTime<Utc>,
}

impl SsoSession {
    /// Expired once `now` reaches `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_callback_params_ignore_empty_values() {
        let params = CallbackParams::new().with("code", "").with("state", "xyz");
        assert_eq!(params.get("code"), None);
        assert_eq!(params.get("state"), Some("xyz"));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn test_callback_params_from_iter() {
        let params: CallbackParams = [("SAMLResponse", "PHNhbWw+")].into_iter().collect();
        assert_eq!(params.get("SAMLResponse"), Some("PHNhbWw+"));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("alice", "hunter2");
        let s = format!("{creds:?}");
        assert!(s.contains("alice"));
        assert!(!s.contains("hunter2"));
    }

    #[test]
    fn test_session_expiry_boundary() {
        let now = Utc::now();
        let session = SsoSession {
            id: "s1".into(),
            user_id: "u1".into(),
            config_id: "c1".into(),
            provider_user_id: "p1".into(),
            session_data: serde_json::Value::Null,
            expires_at: now,
            created_at: now - Duration::hours(1),
            last_used_at: now - Duration::hours(1),
        };
        assert!(session.is_expired(now));
        assert!(!session.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn test_display_name() {
        let info = ProviderUserInfo {
            id: "1".into(),
            first_name: Some("John".into()),
            last_name: Some("Doe".into()),
            ..Default::default()
        };
        assert_eq!(info.display_name().as_deref(), Some("John Doe"));
        assert_eq!(ProviderUserInfo::default().display_name(), None);
    }
}
