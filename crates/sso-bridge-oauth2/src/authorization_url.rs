// Authorization URL builder for the authorization-code flow.

use sso_bridge_core::config::OAuthSettings;

/// Build `authorize_url?client_id=…&response_type=code&scope=…&redirect_uri=…&state=…`.
///
/// Every value is percent-encoded (spaces in the scope become `%20`); `state`
/// round-trips unchanged once decoded. An authorize URL that already carries a
/// query string is extended with `&`.
pub fn create_authorization_url(settings: &OAuthSettings, state: &str) -> String {
    let separator = if settings.authorize_url.contains('?') {
        '&'
    } else {
        '?'
    };

    let params = [
        ("client_id", settings.client_id.as_str()),
        ("response_type", "code"),
        ("scope", settings.scope.as_str()),
        ("redirect_uri", settings.redirect_uri.as_str()),
        ("state", state),
    ];
    let query = params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}{separator}{query}", settings.authorize_url)
}
