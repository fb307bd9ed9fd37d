// Runtime options for the SSO layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ProviderType;

/// Upper bound on any configured TTL (ten years).
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Per-protocol session lifetimes, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTtl {
    pub oauth_secs: u64,
    pub saml_secs: u64,
    pub ldap_secs: u64,
}

impl Default for SessionTtl {
    fn default() -> Self {
        Self {
            oauth_secs: 24 * 60 * 60,
            saml_secs: 8 * 60 * 60,
            ldap_secs: 8 * 60 * 60,
        }
    }
}

impl SessionTtl {
    /// Lifetime for sessions issued through `provider_type`.
    pub fn for_provider(&self, provider_type: &ProviderType) -> chrono::Duration {
        let secs = match provider_type {
            ProviderType::OAuth => self.oauth_secs,
            ProviderType::Saml => self.saml_secs,
            ProviderType::Ldap | ProviderType::Other(_) => self.ldap_secs,
        };
        chrono::Duration::seconds(secs.min(MAX_TTL_SECS) as i64)
    }
}

/// Options for the SSO manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SsoOptions {
    pub session_ttl: SessionTtl,
    /// Timeout for outbound identity provider calls.
    pub request_timeout_secs: u64,
    /// Timeout for every datastore / identity-store call.
    pub persistence_timeout_secs: u64,
    /// Interval of the background expiry sweep.
    pub cleanup_interval_secs: u64,
    pub audit_page_size: usize,
    pub audit_max_page_size: usize,
    /// Our SAML service-provider entity id. Falls back to the ACS URL.
    pub sp_entity_id: Option<String>,
    /// Filled into OAuth configurations created without a redirect URI.
    pub default_oauth_redirect_uri: Option<String>,
    /// Filled into SAML configurations created without an ACS URL.
    pub default_saml_acs_url: Option<String>,
    /// Ask the identity store for a login link after each successful login.
    pub issue_login_links: bool,
}

impl Default for SsoOptions {
    fn default() -> Self {
        Self {
            session_ttl: SessionTtl::default(),
            request_timeout_secs: 10,
            persistence_timeout_secs: 5,
            cleanup_interval_secs: 300,
            audit_page_size: 50,
            audit_max_page_size: 500,
            sp_entity_id: None,
            default_oauth_redirect_uri: None,
            default_saml_acs_url: None,
            issue_login_links: false,
        }
    }
}

impl SsoOptions {
    /// Defaults overlaid with `SSO_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary lookup (the environment in production).
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("SSO_OAUTH_REDIRECT_URI") {
            self.default_oauth_redirect_uri = Some(v);
        }
        if let Some(v) = non_empty("SSO_SAML_ACS_URL") {
            self.default_saml_acs_url = Some(v);
        }
        if let Some(v) = non_empty("SSO_SP_ENTITY_ID") {
            self.sp_entity_id = Some(v);
        }
        if let Some(v) = non_empty("SSO_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.request_timeout_secs = v;
        }
        if let Some(v) = non_empty("SSO_CLEANUP_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.cleanup_interval_secs = v;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn persistence_timeout(&self) -> Duration {
        Duration::from_secs(self.persistence_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Page size for an audit query: the requested limit capped at the maximum.
    pub fn audit_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.audit_page_size)
            .min(self.audit_max_page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let opts = SsoOptions::default();
        assert_eq!(opts.request_timeout(), Duration::from_secs(10));
        assert_eq!(
            opts.session_ttl.for_provider(&ProviderType::OAuth),
            chrono::Duration::hours(24)
        );
        assert_eq!(
            opts.session_ttl.for_provider(&ProviderType::Saml),
            chrono::Duration::hours(8)
        );
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            ("SSO_OAUTH_REDIRECT_URI", "https://app.example.com/sso/callback"),
            ("SSO_REQUEST_TIMEOUT_SECS", "3"),
            ("SSO_CLEANUP_INTERVAL_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let opts = SsoOptions::default().with_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(
            opts.default_oauth_redirect_uri.as_deref(),
            Some("https://app.example.com/sso/callback")
        );
        assert_eq!(opts.request_timeout_secs, 3);
        assert_eq!(opts.cleanup_interval_secs, 300);
    }

    #[test]
    fn test_audit_limit_capped() {
        let opts = SsoOptions::default();
        assert_eq!(opts.audit_limit(None), 50);
        assert_eq!(opts.audit_limit(Some(10)), 10);
        assert_eq!(opts.audit_limit(Some(10_000)), 500);
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let opts: SsoOptions = serde_json::from_str(r#"{"requestTimeoutSecs": 2}"#).unwrap();
        assert_eq!(opts.request_timeout_secs, 2);
        assert_eq!(opts.persistence_timeout_secs, 5);
    }
}
