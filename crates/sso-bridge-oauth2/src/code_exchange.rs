// Authorization code exchange at the provider's token endpoint.
//
// Client credentials go in the form body (client_secret_post). A non-2xx answer
// is fatal for the attempt and never retried: codes are single-use.

use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use tracing::{debug, warn};

use sso_bridge_core::config::OAuthSettings;
use sso_bridge_core::error::{Result, SsoError};
use sso_bridge_core::types::TokenSet;

use crate::tokens::parse_token_response;

/// Exchange an authorization code for tokens; `expires_in` counts from `now`.
pub async fn exchange_authorization_code(
    client: &reqwest::Client,
    settings: &OAuthSettings,
    code: &str,
    now: DateTime<Utc>,
) -> Result<TokenSet> {
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", settings.redirect_uri.as_str()),
        ("client_id", settings.client_id.as_str()),
        ("client_secret", settings.client_secret.as_str()),
    ];

    post_token_form(client, &settings.token_url, &form, now, SsoError::TokenExchange).await
}

/// POST a form to the token endpoint and parse the token set.
/// `to_error` wraps every failure except timeouts.
pub(crate) async fn post_token_form(
    client: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
    now: DateTime<Utc>,
    to_error: fn(String) -> SsoError,
) -> Result<TokenSet> {
    debug!(token_url, "requesting tokens");

    let response = client
        .post(token_url)
        .header(ACCEPT, "application/json")
        .form(form)
        .send()
        .await
        .map_err(|e| request_error(e, "token request", to_error))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(token_url, %status, "token endpoint rejected request");
        return Err(to_error(format!("token endpoint returned {status}: {body}")));
    }

    let data: serde_json::Value = response
        .json()
        .await
        .map_err(|e| to_error(format!("invalid token response: {e}")))?;

    parse_token_response(&data, now)
        .ok_or_else(|| to_error("token response has no access_token".into()))
}

/// Timeouts become `SsoError::Timeout`; everything else goes through `to_error`.
pub(crate) fn request_error(
    e: reqwest::Error,
    operation: &str,
    to_error: fn(String) -> SsoError,
) -> SsoError {
    if e.is_timeout() {
        SsoError::Timeout(format!("oauth {operation}"))
    } else {
        to_error(format!("{operation} failed: {e}"))
    }
}
