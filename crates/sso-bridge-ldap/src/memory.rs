//! In-memory `Directory` for tests.
//!
//! Understands equality filters, optionally combined under `(&...)`, which
//! covers the filters a configuration normally carries.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use sso_bridge_core::config::LdapSettings;
use sso_bridge_core::error::{Result, SsoError};

use crate::directory::{Directory, DirectoryEntry};

#[derive(Debug, Default)]
struct State {
    service_account: Option<(String, String)>,
    users: Vec<(DirectoryEntry, String)>,
    unreachable: bool,
    filters: Vec<String>,
    binds: Vec<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    state: Mutex<State>,
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let hex: String = chars.by_ref().take(2).collect();
            if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                out.push(byte as char);
                continue;
            }
            out.push('\\');
            out.push_str(&hex);
        } else {
            out.push(c);
        }
    }
    out
}

/// Split `(a=b)(c=d)` into `["a=b", "c=d"]`.
fn components(filter: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in filter.char_indices() {
        match c {
            '(' => {
                if depth == 0 {
                    start = i + 1;
                }
                depth += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    parts.push(&filter[start..i]);
                }
            }
            _ => {}
        }
    }
    parts
}

fn equality_terms(filter: &str) -> Vec<(String, String)> {
    let mut terms = Vec::new();
    for part in components(filter) {
        if let Some(inner) = part.strip_prefix('&') {
            terms.extend(equality_terms(inner));
        } else if let Some((attr, value)) = part.split_once('=') {
            terms.push((attr.to_string(), unescape(value)));
        }
    }
    terms
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Require this DN/password for the service-account bind.
    pub fn with_service_account(self, dn: &str, password: &str) -> Self {
        self.state().service_account = Some((dn.to_string(), password.to_string()));
        self
    }

    pub fn add_user(&self, dn: &str, password: &str, attrs: &[(&str, &[&str])]) {
        let attrs: HashMap<String, Vec<String>> = attrs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect();
        self.state().users.push((
            DirectoryEntry {
                dn: dn.to_string(),
                attrs,
            },
            password.to_string(),
        ));
    }

    /// Make every operation fail as if the server were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Filters received by `find_user`, in order.
    pub fn filters(&self) -> Vec<String> {
        self.state().filters.clone()
    }

    /// DNs of user binds attempted, in order.
    pub fn binds(&self) -> Vec<String> {
        self.state().binds.clone()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn find_user(
        &self,
        settings: &LdapSettings,
        filter: &str,
        _attrs: &[String],
    ) -> Result<Option<DirectoryEntry>> {
        let mut state = self.state();
        if state.unreachable {
            return Err(SsoError::Internal("directory unreachable".into()));
        }
        if let Some((dn, password)) = &state.service_account {
            if *dn != settings.bind_dn || *password != settings.bind_password {
                return Err(SsoError::Internal("LDAP service account bind rejected".into()));
            }
        }
        state.filters.push(filter.to_string());

        let terms = equality_terms(filter);
        let matches: Vec<&DirectoryEntry> = state
            .users
            .iter()
            .map(|(entry, _)| entry)
            .filter(|entry| {
                !terms.is_empty()
                    && terms.iter().all(|(attr, value)| {
                        entry
                            .values(attr)
                            .is_some_and(|vs| vs.iter().any(|v| v.eq_ignore_ascii_case(value)))
                    })
            })
            .collect();

        match matches.as_slice() {
            [] => Ok(None),
            [entry] => Ok(Some((*entry).clone())),
            many => Err(SsoError::Internal(format!(
                "LDAP filter matched {} entries",
                many.len()
            ))),
        }
    }

    async fn verify_password(&self, _settings: &LdapSettings, dn: &str, password: &str) -> Result<bool> {
        let mut state = self.state();
        if state.unreachable {
            return Err(SsoError::Internal("directory unreachable".into()));
        }
        state.binds.push(dn.to_string());
        Ok(state
            .users
            .iter()
            .any(|(entry, stored)| entry.dn == dn && *stored == password))
    }
}
