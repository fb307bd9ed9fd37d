// In-memory user account store implementing `IdentityStore`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use sso_bridge_core::error::{Result, SsoError};
use sso_bridge_core::identity::{IdentityStore, IdentityUser, NewUserProfile};
use sso_bridge_core::utils::generate_id;

/// Accounts keyed by lowercased email.
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentityStore {
    users: Arc<RwLock<HashMap<String, IdentityUser>>>,
    create_calls: Arc<AtomicUsize>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored accounts.
    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    /// How many times `create_user` was attempted, including conflicts.
    pub fn create_attempts(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Seed an existing account.
    pub async fn insert(&self, user: IdentityUser) {
        self.users
            .write()
            .await
            .insert(user.email.to_lowercase(), user);
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<IdentityUser>> {
        Ok(self.users.read().await.get(&email.to_lowercase()).cloned())
    }

    async fn find_user_by_id(&self, id: &str) -> Result<Option<IdentityUser>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.id == id)
            .cloned())
    }

    async fn create_user(&self, profile: NewUserProfile) -> Result<IdentityUser> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let key = profile.email.to_lowercase();
        let mut users = self.users.write().await;
        if users.contains_key(&key) {
            return Err(SsoError::Conflict(format!(
                "user with email {} already exists",
                profile.email
            )));
        }

        let user = IdentityUser {
            id: generate_id(),
            email: profile.email,
            name: profile.name,
            roles: profile.roles,
            groups: profile.groups,
        };
        users.insert(key, user.clone());
        Ok(user)
    }

    async fn issue_login_link(&self, email: &str) -> Result<String> {
        if !self.users.read().await.contains_key(&email.to_lowercase()) {
            return Err(SsoError::Internal(format!("no account for {email}")));
        }
        Ok(format!(
            "https://login.invalid/magic-link?token={}",
            generate_id()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(email: &str) -> NewUserProfile {
        NewUserProfile {
            email: email.into(),
            name: None,
            first_name: None,
            last_name: None,
            roles: vec![],
            groups: vec![],
            email_verified: true,
        }
    }

    #[tokio::test]
    async fn test_email_is_unique_case_insensitive() {
        let store = MemoryIdentityStore::new();
        store.create_user(profile("Jane@Example.com")).await.unwrap();
        let err = store.create_user(profile("jane@example.com")).await.unwrap_err();
        assert!(matches!(err, SsoError::Conflict(_)));
        assert_eq!(store.user_count().await, 1);
        assert_eq!(store.create_attempts(), 2);
    }

    #[tokio::test]
    async fn test_find_by_email_and_id() {
        let store = MemoryIdentityStore::new();
        let user = store.create_user(profile("a@example.com")).await.unwrap();
        assert_eq!(
            store.find_user_by_email("A@example.com").await.unwrap(),
            Some(user.clone())
        );
        assert_eq!(store.find_user_by_id(&user.id).await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn test_login_link_requires_account() {
        let store = MemoryIdentityStore::new();
        assert!(store.issue_login_link("ghost@example.com").await.is_err());
        store.create_user(profile("real@example.com")).await.unwrap();
        let link = store.issue_login_link("real@example.com").await.unwrap();
        assert!(link.contains("token="));
    }
}
