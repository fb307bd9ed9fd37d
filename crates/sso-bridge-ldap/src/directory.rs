//! Directory access: service-account search and user bind.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tracing::{debug, warn};

use sso_bridge_core::config::LdapSettings;
use sso_bridge_core::error::{Result, SsoError};

/// LDAP result code for invalid credentials.
const RC_INVALID_CREDENTIALS: u32 = 49;

/// One directory entry as returned by a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// First value of `name`, matched case-insensitively as LDAP does.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn values(&self, name: &str) -> Option<&Vec<String>> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

/// The two directory operations authentication needs.
#[async_trait]
pub trait Directory: Send + Sync + fmt::Debug {
    /// Bind as the service account and search `base_dn` (subtree) with
    /// `filter`. More than one match is an error.
    async fn find_user(
        &self,
        settings: &LdapSettings,
        filter: &str,
        attrs: &[String],
    ) -> Result<Option<DirectoryEntry>>;

    /// Bind as `dn` with `password`. `Ok(false)` means the directory
    /// rejected the credentials.
    async fn verify_password(&self, settings: &LdapSettings, dn: &str, password: &str) -> Result<bool>;
}

/// `Directory` backed by a live server through `ldap3`.
#[derive(Debug, Clone)]
pub struct Ldap3Directory {
    conn_timeout: Duration,
}

impl Ldap3Directory {
    pub fn new(conn_timeout: Duration) -> Self {
        Self { conn_timeout }
    }

    async fn connect(&self, url: &str) -> Result<Ldap> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.conn_timeout);
        let (conn, ldap) = LdapConnAsync::with_settings(settings, url)
            .await
            .map_err(|e| SsoError::Internal(format!("failed to connect to LDAP server at {url}: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        Ok(ldap)
    }

    async fn bind(ldap: &mut Ldap, dn: &str, password: &str) -> Result<bool> {
        let result = ldap
            .simple_bind(dn, password)
            .await
            .map_err(|e| SsoError::Internal(format!("LDAP bind failed: {e}")))?;
        match result.rc {
            0 => Ok(true),
            RC_INVALID_CREDENTIALS => Ok(false),
            rc => Err(SsoError::Internal(format!(
                "LDAP bind failed with code {rc}: {}",
                result.text
            ))),
        }
    }

    async fn close(mut ldap: Ldap) {
        if let Err(e) = ldap.unbind().await {
            debug!(error = %e, "error during LDAP unbind");
        }
    }
}

#[async_trait]
impl Directory for Ldap3Directory {
    async fn find_user(
        &self,
        settings: &LdapSettings,
        filter: &str,
        attrs: &[String],
    ) -> Result<Option<DirectoryEntry>> {
        let mut ldap = self.connect(&settings.server_url).await?;

        if !Self::bind(&mut ldap, &settings.bind_dn, &settings.bind_password).await? {
            Self::close(ldap).await;
            return Err(SsoError::Internal("LDAP service account bind rejected".into()));
        }

        let searched = ldap
            .search(&settings.base_dn, Scope::Subtree, filter, attrs.to_vec())
            .await
            .map_err(|e| SsoError::Internal(format!("LDAP search failed: {e}")))
            .and_then(|result| {
                result
                    .success()
                    .map_err(|e| SsoError::Internal(format!("LDAP search failed: {e}")))
            });
        Self::close(ldap).await;
        let (entries, _) = searched?;

        if entries.len() > 1 {
            return Err(SsoError::Internal(format!(
                "LDAP filter matched {} entries",
                entries.len()
            )));
        }

        Ok(entries.into_iter().next().map(|e| {
            let entry = SearchEntry::construct(e);
            DirectoryEntry {
                dn: entry.dn,
                attrs: entry.attrs,
            }
        }))
    }

    async fn verify_password(&self, settings: &LdapSettings, dn: &str, password: &str) -> Result<bool> {
        let mut ldap = self.connect(&settings.server_url).await?;
        let bound = Self::bind(&mut ldap, dn, password).await;
        Self::close(ldap).await;
        bound
    }
}
