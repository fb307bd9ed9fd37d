#![doc = include_str!("../README.md")]

pub mod audit;
pub mod clock;
pub mod config;
pub mod db;
pub mod env;
pub mod error;
pub mod identity;
pub mod mapping;
pub mod options;
pub mod provider;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use audit::{AuditAction, AuditEvent, AuditLogEntry, AuditLogFilter, AuditSink, NoopAuditSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    LdapAttributeNames, LdapSettings, NewConfiguration, OAuthSettings, ProviderType,
    SamlSettings, SsoConfiguration,
};
pub use db::adapter::Adapter;
pub use error::{ErrorCode, ErrorKind, Result, SsoError};
pub use identity::{IdentityStore, IdentityUser, NewUserProfile};
pub use options::{SessionTtl, SsoOptions};
pub use provider::SsoProvider;
pub use types::{CallbackParams, Credentials, ProviderUserInfo, SsoSession, TokenSet};
