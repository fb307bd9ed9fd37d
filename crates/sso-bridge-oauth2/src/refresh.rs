// Refresh-token grant.

use chrono::{DateTime, Utc};

use sso_bridge_core::config::OAuthSettings;
use sso_bridge_core::error::{Result, SsoError};
use sso_bridge_core::types::TokenSet;

use crate::code_exchange::post_token_form;

/// Exchange a refresh token for a new token set.
///
/// Providers that do not rotate refresh tokens omit one from the response;
/// the submitted token is carried over in that case.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    settings: &OAuthSettings,
    refresh_token: &str,
    now: DateTime<Utc>,
) -> Result<TokenSet> {
    if refresh_token.trim().is_empty() {
        return Err(SsoError::TokenRefresh("refresh token is empty".into()));
    }

    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", settings.client_id.as_str()),
        ("client_secret", settings.client_secret.as_str()),
    ];

    let mut tokens =
        post_token_form(client, &settings.token_url, &form, now, SsoError::TokenRefresh).await?;
    if tokens.refresh_token.is_none() {
        tokens.refresh_token = Some(refresh_token.to_string());
    }
    Ok(tokens)
}
