#![doc = include_str!("../README.md")]

pub mod authorization_url;
pub mod code_exchange;
pub mod provider;
pub mod refresh;
pub mod tokens;
pub mod userinfo;

// Re-exports
pub use authorization_url::create_authorization_url;
pub use code_exchange::exchange_authorization_code;
pub use provider::{build_http_client, OAuthProvider};
pub use refresh::refresh_access_token;
pub use tokens::parse_token_response;
pub use userinfo::{fetch_user_info, normalize_claims};
