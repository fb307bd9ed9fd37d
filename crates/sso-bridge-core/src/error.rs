// Error taxonomy for the SSO layer.
//
// Every failure handed back to a host handler is an `SsoError`. `kind()` tells
// the host whether the caller sent bad input, the identity provider failed, or
// the server is misconfigured; `code()` is the stable machine-readable code.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable error codes, serialized as SCREAMING_SNAKE_CASE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidConfiguration,
    UnsupportedProvider,
    ConfigurationDisabled,
    ConfigurationNotFound,
    MissingAuthorizationCode,
    MissingSamlResponse,
    InvalidCallback,
    TokenExchangeFailed,
    TokenRefreshFailed,
    ProviderRejected,
    InvalidSamlResponse,
    SignatureVerificationFailed,
    AssertionConditionsFailed,
    AuthenticationFailed,
    UnsupportedOperation,
    SessionNotFound,
    Conflict,
    DatabaseError,
    Timeout,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration => "INVALID_CONFIGURATION",
            Self::UnsupportedProvider => "UNSUPPORTED_PROVIDER",
            Self::ConfigurationDisabled => "CONFIGURATION_DISABLED",
            Self::ConfigurationNotFound => "CONFIGURATION_NOT_FOUND",
            Self::MissingAuthorizationCode => "MISSING_AUTHORIZATION_CODE",
            Self::MissingSamlResponse => "MISSING_SAML_RESPONSE",
            Self::InvalidCallback => "INVALID_CALLBACK",
            Self::TokenExchangeFailed => "TOKEN_EXCHANGE_FAILED",
            Self::TokenRefreshFailed => "TOKEN_REFRESH_FAILED",
            Self::ProviderRejected => "PROVIDER_REJECTED",
            Self::InvalidSamlResponse => "INVALID_SAML_RESPONSE",
            Self::SignatureVerificationFailed => "SIGNATURE_VERIFICATION_FAILED",
            Self::AssertionConditionsFailed => "ASSERTION_CONDITIONS_FAILED",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification a host handler uses to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The caller sent malformed or missing callback input.
    BadRequest,
    /// Credentials or assertions were rejected.
    Unauthorized,
    /// The identity provider failed or answered with a non-2xx status.
    Upstream,
    /// The server-side configuration is incomplete or unsupported.
    Misconfiguration,
    NotFound,
    /// The datastore or identity store failed.
    Persistence,
    Internal,
}

impl ErrorKind {
    /// HTTP status a host would typically answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::Upstream => 502,
            Self::Misconfiguration | Self::Persistence | Self::Internal => 500,
        }
    }
}

/// The error type returned by every fallible operation in the workspace.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SsoError {
    #[error("Invalid SSO configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unsupported SSO provider type: {0}")]
    UnsupportedProvider(String),

    #[error("SSO configuration {0} is disabled")]
    ConfigurationDisabled(String),

    #[error("SSO configuration {0} not found")]
    ConfigurationNotFound(String),

    #[error("Missing authorization code")]
    MissingAuthorizationCode,

    #[error("Missing SAMLResponse parameter")]
    MissingSamlResponse,

    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    #[error("Failed to exchange code for tokens: {0}")]
    TokenExchange(String),

    #[error("Failed to refresh token: {0}")]
    TokenRefresh(String),

    #[error("Identity provider returned an error: {0}")]
    ProviderRejected(String),

    #[error("Invalid SAML response: {0}")]
    InvalidSamlResponse(String),

    #[error("SAML signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("SAML assertion conditions not met: {0}")]
    AssertionConditions(String),

    /// Deliberately carries no detail: callers must not learn which half of
    /// a directory check failed.
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("{0}")]
    UnsupportedOperation(String),

    #[error("SSO session {0} not found")]
    SessionNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),
}

impl SsoError {
    /// `<protocol> does not support <capability>`.
    pub fn unsupported(protocol: &str, capability: &str) -> Self {
        Self::UnsupportedOperation(format!("{protocol} does not support {capability}"))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidConfiguration(_) => ErrorCode::InvalidConfiguration,
            Self::UnsupportedProvider(_) => ErrorCode::UnsupportedProvider,
            Self::ConfigurationDisabled(_) => ErrorCode::ConfigurationDisabled,
            Self::ConfigurationNotFound(_) => ErrorCode::ConfigurationNotFound,
            Self::MissingAuthorizationCode => ErrorCode::MissingAuthorizationCode,
            Self::MissingSamlResponse => ErrorCode::MissingSamlResponse,
            Self::InvalidCallback(_) => ErrorCode::InvalidCallback,
            Self::TokenExchange(_) => ErrorCode::TokenExchangeFailed,
            Self::TokenRefresh(_) => ErrorCode::TokenRefreshFailed,
            Self::ProviderRejected(_) => ErrorCode::ProviderRejected,
            Self::InvalidSamlResponse(_) => ErrorCode::InvalidSamlResponse,
            Self::SignatureVerification(_) => ErrorCode::SignatureVerificationFailed,
            Self::AssertionConditions(_) => ErrorCode::AssertionConditionsFailed,
            Self::AuthenticationFailed => ErrorCode::AuthenticationFailed,
            Self::UnsupportedOperation(_) => ErrorCode::UnsupportedOperation,
            Self::SessionNotFound(_) => ErrorCode::SessionNotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingAuthorizationCode
            | Self::MissingSamlResponse
            | Self::InvalidCallback(_)
            | Self::InvalidSamlResponse(_)
            | Self::UnsupportedOperation(_) => ErrorKind::BadRequest,
            Self::SignatureVerification(_)
            | Self::AssertionConditions(_)
            | Self::AuthenticationFailed
            | Self::ProviderRejected(_) => ErrorKind::Unauthorized,
            Self::TokenExchange(_) | Self::TokenRefresh(_) | Self::Timeout(_) => {
                ErrorKind::Upstream
            }
            Self::InvalidConfiguration(_)
            | Self::UnsupportedProvider(_)
            | Self::ConfigurationDisabled(_) => ErrorKind::Misconfiguration,
            Self::ConfigurationNotFound(_) | Self::SessionNotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) | Self::Database(_) => ErrorKind::Persistence,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// JSON body for a host error response.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

impl From<serde_json::Error> for SsoError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("Serialization error: {e}"))
    }
}

/// Unified result type for sso-bridge operations.
pub type Result<T> = std::result::Result<T, SsoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_provider_message() {
        let err = SsoError::UnsupportedProvider("kerberos".into());
        assert_eq!(err.to_string(), "Unsupported SSO provider type: kerberos");
        assert_eq!(err.kind(), ErrorKind::Misconfiguration);
    }

    #[test]
    fn test_kinds_distinguish_client_upstream_and_server() {
        assert_eq!(SsoError::MissingAuthorizationCode.kind(), ErrorKind::BadRequest);
        assert_eq!(SsoError::MissingSamlResponse.kind(), ErrorKind::BadRequest);
        assert_eq!(SsoError::TokenExchange("500".into()).kind(), ErrorKind::Upstream);
        assert_eq!(
            SsoError::UnsupportedProvider("x".into()).kind(),
            ErrorKind::Misconfiguration
        );
    }

    #[test]
    fn test_unsupported_helper() {
        let err = SsoError::unsupported("LDAP", "token refresh");
        assert_eq!(err.to_string(), "LDAP does not support token refresh");
        assert_eq!(err.code(), ErrorCode::UnsupportedOperation);
    }

    #[test]
    fn test_authentication_failed_is_opaque() {
        assert_eq!(SsoError::AuthenticationFailed.to_string(), "Authentication failed");
    }

    #[test]
    fn test_to_json() {
        let body = SsoError::MissingSamlResponse.to_json();
        assert_eq!(body["code"], "MISSING_SAML_RESPONSE");
        assert_eq!(body["message"], "Missing SAMLResponse parameter");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ErrorKind::BadRequest.status_code(), 400);
        assert_eq!(ErrorKind::Upstream.status_code(), 502);
        assert_eq!(ErrorKind::Misconfiguration.status_code(), 500);
    }
}
