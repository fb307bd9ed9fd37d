// Boundary to the host application's user accounts.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// An internal user account as seen by the SSO layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Profile for an admin-level account creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUserProfile {
    pub email: String,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub roles: Vec<String>,
    pub groups: Vec<String>,
    pub email_verified: bool,
}

/// User account store owned by the host application.
#[async_trait]
pub trait IdentityStore: Send + Sync + fmt::Debug {
    /// Case-insensitive lookup by email.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<IdentityUser>>;

    /// Find a user by id.
    async fn find_user_by_id(&self, id: &str) -> Result<Option<IdentityUser>>;

    /// Create an account, bypassing the normal signup flow.
    ///
    /// Must return `SsoError::Conflict` when the email is already taken so
    /// provisioning can fall back to a lookup.
    async fn create_user(&self, profile: NewUserProfile) -> Result<IdentityUser>;

    /// Issue a one-time sign-in link for the host to complete its own session.
    async fn issue_login_link(&self, email: &str) -> Result<String>;
}
