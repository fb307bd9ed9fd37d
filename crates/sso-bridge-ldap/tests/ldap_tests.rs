//! LDAP provider tests against the in-memory directory.
//!
//! Covers: unsupported redirect operations, successful bind, opaque failures,
//! filter escaping, attribute and group mapping, timeouts, logout auditing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use sso_bridge_core::audit::{AuditAction, AuditEvent, AuditSink, NoopAuditSink};
use sso_bridge_core::config::{LdapSettings, NewConfiguration, SsoConfiguration};
use sso_bridge_core::error::{ErrorKind, Result, SsoError};
use sso_bridge_core::provider::SsoProvider;
use sso_bridge_core::types::{CallbackParams, Credentials, SsoSession};
use sso_bridge_ldap::{Directory, DirectoryEntry, InMemoryDirectory, LdapProvider};

// ── Helpers ─────────────────────────────────────────────────────

fn session(id: &str, user_id: &str, config_id: &str) -> SsoSession {
    let now = Utc::now();
    SsoSession {
        id: id.into(),
        user_id: user_id.into(),
        config_id: config_id.into(),
        provider_user_id: "ext-1".into(),
        session_data: serde_json::Value::Null,
        expires_at: now,
        created_at: now,
        last_used_at: now,
    }
}

const SERVICE_DN: &str = "cn=svc,dc=example,dc=com";
const SERVICE_PW: &str = "svc-secret";
const JDOE_DN: &str = "uid=jdoe,ou=people,dc=example,dc=com";

#[derive(Debug, Default)]
struct RecordingSink {
    events: Mutex<Vec<AuditEvent>>,
}

#[async_trait]
impl AuditSink for RecordingSink {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A directory that never answers.
#[derive(Debug)]
struct HangingDirectory;

#[async_trait]
impl Directory for HangingDirectory {
    async fn find_user(
        &self,
        _settings: &LdapSettings,
        _filter: &str,
        _attrs: &[String],
    ) -> Result<Option<DirectoryEntry>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }

    async fn verify_password(&self, _settings: &LdapSettings, _dn: &str, _password: &str) -> Result<bool> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(false)
    }
}

fn config() -> SsoConfiguration {
    NewConfiguration::ldap(
        "tenant-1",
        "Corporate LDAP",
        LdapSettings {
            server_url: "ldap://ldap.example.com:389".into(),
            bind_dn: SERVICE_DN.into(),
            bind_password: SERVICE_PW.into(),
            base_dn: "dc=example,dc=com".into(),
            user_search_filter: "(&(objectClass=person)(uid={username}))".into(),
            ..Default::default()
        },
    )
    .with_group_mapping("cn=engineering,ou=groups,dc=example,dc=com", "eng")
    .with_role_mapping("admins", "admin")
    .into_configuration("cfg-ldap".into(), Utc::now())
}

fn directory() -> Arc<InMemoryDirectory> {
    let dir = InMemoryDirectory::new().with_service_account(SERVICE_DN, SERVICE_PW);
    dir.add_user(
        JDOE_DN,
        "correct-horse",
        &[
            ("objectClass", &["person"]),
            ("uid", &["jdoe"]),
            ("mail", &["jdoe@example.com"]),
            ("givenName", &["John"]),
            ("sn", &["Doe"]),
            (
                "memberOf",
                &[
                    "cn=engineering,ou=groups,dc=example,dc=com",
                    "cn=admins,ou=groups,dc=example,dc=com",
                ],
            ),
        ],
    );
    Arc::new(dir)
}

fn provider(dir: Arc<InMemoryDirectory>) -> LdapProvider {
    LdapProvider::new(config(), dir, Duration::from_secs(2), Arc::new(NoopAuditSink)).unwrap()
}

// ── Unsupported operations ──────────────────────────────────────

#[tokio::test]
async fn redirect_operations_are_unsupported() {
    let p = provider(directory());

    let err = p.get_auth_url("state").unwrap_err();
    assert_eq!(err.to_string(), "LDAP does not support redirect-based authentication");

    let err = p.handle_callback(&CallbackParams::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "LDAP does not support callback-based authentication");

    let err = p.refresh_token("rt").await.unwrap_err();
    assert_eq!(err.to_string(), "LDAP does not support token refresh");
    assert!(matches!(err, SsoError::UnsupportedOperation(_)));
}

// ── Authentication ──────────────────────────────────────────────

#[tokio::test]
async fn valid_credentials_return_user_info() {
    let dir = directory();
    let info = provider(dir.clone())
        .authenticate(&Credentials::new("jdoe", "correct-horse"))
        .await
        .unwrap();

    assert_eq!(info.id, "jdoe");
    assert_eq!(info.username.as_deref(), Some("jdoe"));
    assert_eq!(info.email.as_deref(), Some("jdoe@example.com"));
    assert_eq!(info.first_name.as_deref(), Some("John"));
    assert_eq!(info.last_name.as_deref(), Some("Doe"));
    assert_eq!(info.groups, vec!["eng"]);
    assert_eq!(info.roles, vec!["admin"]);

    assert_eq!(dir.filters(), vec!["(&(objectClass=person)(uid=jdoe))"]);
    assert_eq!(dir.binds(), vec![JDOE_DN]);
}

#[tokio::test]
async fn wrong_password_and_unknown_user_are_indistinguishable() {
    let p = provider(directory());

    let wrong_password = p
        .authenticate(&Credentials::new("jdoe", "battery-staple"))
        .await
        .unwrap_err();
    let unknown_user = p
        .authenticate(&Credentials::new("nobody", "correct-horse"))
        .await
        .unwrap_err();

    assert_eq!(wrong_password, SsoError::AuthenticationFailed);
    assert_eq!(unknown_user, SsoError::AuthenticationFailed);
    assert_eq!(wrong_password.to_string(), unknown_user.to_string());
    assert_eq!(wrong_password.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn unreachable_directory_is_opaque_failure() {
    let dir = directory();
    dir.set_unreachable(true);
    let err = provider(dir)
        .authenticate(&Credentials::new("jdoe", "correct-horse"))
        .await
        .unwrap_err();
    assert_eq!(err, SsoError::AuthenticationFailed);
}

#[tokio::test]
async fn service_account_mismatch_is_opaque_failure() {
    let dir = Arc::new(InMemoryDirectory::new().with_service_account(SERVICE_DN, "rotated"));
    let err = provider(dir)
        .authenticate(&Credentials::new("jdoe", "correct-horse"))
        .await
        .unwrap_err();
    assert_eq!(err, SsoError::AuthenticationFailed);
}

#[tokio::test]
async fn empty_password_never_reaches_directory() {
    let dir = directory();
    let err = provider(dir.clone())
        .authenticate(&Credentials::new("jdoe", ""))
        .await
        .unwrap_err();
    assert_eq!(err, SsoError::AuthenticationFailed);
    assert!(dir.filters().is_empty());
    assert!(dir.binds().is_empty());
}

#[tokio::test]
async fn wildcard_username_is_escaped() {
    let dir = directory();
    let err = provider(dir.clone())
        .authenticate(&Credentials::new("*", "correct-horse"))
        .await
        .unwrap_err();
    assert_eq!(err, SsoError::AuthenticationFailed);
    assert_eq!(dir.filters(), vec!["(&(objectClass=person)(uid=\\2a))"]);
    assert!(dir.binds().is_empty());
}

#[tokio::test]
async fn hanging_directory_times_out_as_failure() {
    let p = LdapProvider::new(
        config(),
        Arc::new(HangingDirectory),
        Duration::from_millis(50),
        Arc::new(NoopAuditSink),
    )
    .unwrap();
    let err = p
        .authenticate(&Credentials::new("jdoe", "correct-horse"))
        .await
        .unwrap_err();
    assert_eq!(err, SsoError::AuthenticationFailed);
}

// ── Construction / logout ───────────────────────────────────────

#[test]
fn construction_requires_ldap_block() {
    let mut cfg = config();
    cfg.ldap = None;
    let err = LdapProvider::new(
        cfg,
        directory(),
        Duration::from_secs(1),
        Arc::new(NoopAuditSink),
    )
    .unwrap_err();
    assert!(matches!(err, SsoError::InvalidConfiguration(_)));
}

#[tokio::test]
async fn logout_writes_audit_entry() {
    let sink = Arc::new(RecordingSink::default());
    let p = LdapProvider::new(config(), directory(), Duration::from_secs(1), sink.clone()).unwrap();

    p.logout(&session("sess-3", "user-3", "cfg-ldap")).await.unwrap();

    let events = sink.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, AuditAction::Logout);
    assert_eq!(events[0].tenant_id.as_deref(), Some("tenant-1"));
    assert_eq!(events[0].user_id.as_deref(), Some("user-3"));
}
