#![doc = include_str!("../README.md")]

pub mod audit;
pub mod cleanup;
pub mod dispatcher;
pub mod manager;
pub mod provisioning;
pub mod session;

mod rows;

// Re-exports
pub use audit::AuditLogger;
pub use cleanup::spawn_cleanup_task;
pub use dispatcher::{Provider, ProviderDispatcher};
pub use manager::{LoginOutcome, SsoManager};
pub use provisioning::{ProvisionedUser, Provisioner};
pub use session::SessionManager;

pub use sso_bridge_core::{
    AuditAction, AuditLogEntry, AuditLogFilter, CallbackParams, Clock, Credentials, ErrorKind,
    IdentityStore, IdentityUser, NewConfiguration, ProviderType, ProviderUserInfo, Result,
    SsoConfiguration, SsoError, SsoOptions, SsoProvider, SsoSession, SystemClock,
};
