// User-info fetch and claim normalisation.

use std::collections::HashMap;

use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::warn;

use sso_bridge_core::config::{OAuthSettings, SsoConfiguration};
use sso_bridge_core::error::{Result, SsoError};
use sso_bridge_core::mapping::{
    self, EMAIL_CLAIMS, FIRST_NAME_CLAIMS, LAST_NAME_CLAIMS, USERNAME_CLAIMS,
};
use sso_bridge_core::types::ProviderUserInfo;

use crate::code_exchange::request_error;

/// GET the user-info endpoint with the access token as bearer credentials.
///
/// A non-2xx answer fails the login the same way a failed code exchange does.
pub async fn fetch_user_info(
    client: &reqwest::Client,
    settings: &OAuthSettings,
    access_token: &str,
) -> Result<HashMap<String, Value>> {
    let response = client
        .get(&settings.userinfo_url)
        .bearer_auth(access_token)
        .header(ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| request_error(e, "userinfo request", SsoError::TokenExchange))?;

    let status = response.status();
    if !status.is_success() {
        warn!(userinfo_url = %settings.userinfo_url, %status, "userinfo endpoint rejected request");
        return Err(SsoError::TokenExchange(format!(
            "userinfo endpoint returned {status}"
        )));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| SsoError::TokenExchange(format!("invalid userinfo response: {e}")))?;

    match body {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(SsoError::TokenExchange(
            "userinfo response is not a JSON object".into(),
        )),
    }
}

/// Normalise provider claims (`sub`, `email`, `given_name`, `family_name`, ...)
/// and apply the configuration's attribute, role and group mappings.
pub fn normalize_claims(
    claims: HashMap<String, Value>,
    config: &SsoConfiguration,
) -> Result<ProviderUserInfo> {
    let id = mapping::resolve_attribute(&claims, &config.attribute_mapping, "id", &["sub", "id"])
        .ok_or_else(|| SsoError::TokenExchange("userinfo response has no subject".into()))?;

    let lookup = |field: &str, candidates: &[&str]| {
        mapping::resolve_attribute(&claims, &config.attribute_mapping, field, candidates)
    };

    Ok(ProviderUserInfo {
        email: lookup("email", EMAIL_CLAIMS),
        first_name: lookup("firstName", FIRST_NAME_CLAIMS),
        last_name: lookup("lastName", LAST_NAME_CLAIMS),
        username: lookup("username", USERNAME_CLAIMS),
        roles: mapping::map_roles(&claims, &config.role_mapping),
        groups: mapping::map_groups(&claims, &config.group_mapping),
        id,
        attributes: claims,
        tokens: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use sso_bridge_core::config::NewConfiguration;

    fn config() -> SsoConfiguration {
        NewConfiguration::oauth("t", "idp", OAuthSettings::default())
            .with_role_mapping("admin", "owner")
            .with_group_mapping("engineering", "eng")
            .into_configuration("c".into(), Utc::now())
    }

    fn claims(v: Value) -> HashMap<String, Value> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_standard_oidc_claims() {
        let info = normalize_claims(
            claims(json!({
                "sub": "248289761001",
                "email": "jane@example.com",
                "given_name": "Jane",
                "family_name": "Doe",
                "preferred_username": "jdoe",
                "admin": true,
                "groups": ["engineering"]
            })),
            &config(),
        )
        .unwrap();

        assert_eq!(info.id, "248289761001");
        assert_eq!(info.email.as_deref(), Some("jane@example.com"));
        assert_eq!(info.first_name.as_deref(), Some("Jane"));
        assert_eq!(info.last_name.as_deref(), Some("Doe"));
        assert_eq!(info.username.as_deref(), Some("jdoe"));
        assert_eq!(info.roles, vec!["owner"]);
        assert_eq!(info.groups, vec!["eng"]);
    }

    #[test]
    fn test_numeric_id_fallback() {
        let info = normalize_claims(claims(json!({"id": 42})), &config()).unwrap();
        assert_eq!(info.id, "42");
    }

    #[test]
    fn test_missing_subject_rejected() {
        let err = normalize_claims(claims(json!({"email": "x@example.com"})), &config()).unwrap_err();
        assert!(matches!(err, SsoError::TokenExchange(_)));
    }
}
