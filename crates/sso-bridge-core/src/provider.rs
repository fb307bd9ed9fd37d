// The capability set shared by every protocol provider.

use async_trait::async_trait;

use crate::config::ProviderType;
use crate::error::Result;
use crate::types::{CallbackParams, Credentials, ProviderUserInfo, SsoSession, TokenSet};

/// One identity provider, bound to one configuration.
///
/// Redirect-based protocols implement `get_auth_url` / `handle_callback`;
/// directory protocols implement `authenticate`. Capabilities a protocol
/// lacks return `SsoError::UnsupportedOperation` naming the protocol, never a
/// placeholder value.
#[async_trait]
pub trait SsoProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Browser redirect URL that starts a login, carrying `state` back.
    fn get_auth_url(&self, state: &str) -> Result<String>;

    /// Complete a redirect-based exchange from raw callback parameters.
    async fn handle_callback(&self, params: &CallbackParams) -> Result<ProviderUserInfo>;

    /// Exchange a refresh token for a new token set.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet>;

    /// Direct credential check.
    async fn authenticate(&self, credentials: &Credentials) -> Result<ProviderUserInfo>;

    /// Record the logout of `session`, attributed to its owner, and run any
    /// provider-side cleanup. Never fails on provider-side errors.
    async fn logout(&self, session: &SsoSession) -> Result<()>;
}
