//! Shared harness for the façade integration suites.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};

use sso_bridge::SsoManager;
use sso_bridge_core::clock::ManualClock;
use sso_bridge_core::config::{LdapSettings, NewConfiguration, OAuthSettings, SamlSettings};
use sso_bridge_core::options::SsoOptions;
use sso_bridge_core::types::ProviderUserInfo;
use sso_bridge_ldap::InMemoryDirectory;
use sso_bridge_memory::{MemoryAdapter, MemoryIdentityStore};
use sso_bridge_saml::fixtures::{
    SigningFixture, FIXTURE_ACS_URL, FIXTURE_IDP_ENTITY_ID, FIXTURE_IDP_SSO_URL,
    FIXTURE_SP_ENTITY_ID,
};

pub const TENANT: &str = "tenant-1";
pub const SERVICE_DN: &str = "cn=svc,dc=example,dc=com";
pub const SERVICE_PW: &str = "svc-secret";
pub const JDOE_DN: &str = "uid=jdoe,ou=people,dc=example,dc=com";

pub struct Harness {
    pub manager: Arc<SsoManager>,
    pub adapter: MemoryAdapter,
    pub identity: MemoryIdentityStore,
    pub clock: Arc<ManualClock>,
    pub directory: Arc<InMemoryDirectory>,
}

pub fn options() -> SsoOptions {
    SsoOptions {
        sp_entity_id: Some(FIXTURE_SP_ENTITY_ID.into()),
        request_timeout_secs: 5,
        ..Default::default()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(options())
    }

    pub fn with_options(options: SsoOptions) -> Self {
        let adapter = MemoryAdapter::new();
        let identity = MemoryIdentityStore::new();
        // Rows store milliseconds; start on a whole millisecond so values
        // read back compare equal to the clock.
        let start = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let directory = Arc::new(directory());

        let manager = SsoManager::new(
            Arc::new(adapter.clone()),
            Arc::new(identity.clone()),
            clock.clone(),
            options,
        )
        .unwrap()
        .with_directory(directory.clone());

        Self {
            manager: Arc::new(manager),
            adapter,
            identity,
            clock,
            directory,
        }
    }
}

pub fn oauth_settings(base: &str) -> OAuthSettings {
    OAuthSettings {
        client_id: "client-abc".into(),
        client_secret: "shh".into(),
        authorize_url: format!("{base}/authorize"),
        token_url: format!("{base}/token"),
        userinfo_url: format!("{base}/userinfo"),
        scope: "openid email profile".into(),
        redirect_uri: "https://app.example.com/sso/callback".into(),
    }
}

pub fn oauth_input(base: &str) -> NewConfiguration {
    NewConfiguration::oauth(TENANT, "Okta", oauth_settings(base))
        .with_role_mapping("admin", "owner")
        .with_group_mapping("engineering", "eng")
}

pub fn saml_input(signer: &SigningFixture) -> NewConfiguration {
    NewConfiguration::saml(
        TENANT,
        "Corporate IdP",
        SamlSettings {
            entity_id: FIXTURE_IDP_ENTITY_ID.into(),
            sso_url: FIXTURE_IDP_SSO_URL.into(),
            certificate: signer.certificate_pem(),
            acs_url: FIXTURE_ACS_URL.into(),
            ..Default::default()
        },
    )
}

pub fn ldap_settings() -> LdapSettings {
    LdapSettings {
        server_url: "ldap://ldap.example.com:389".into(),
        bind_dn: SERVICE_DN.into(),
        bind_password: SERVICE_PW.into(),
        base_dn: "dc=example,dc=com".into(),
        user_search_filter: "(uid={username})".into(),
        ..Default::default()
    }
}

pub fn ldap_input() -> NewConfiguration {
    NewConfiguration::ldap(TENANT, "Corporate LDAP", ldap_settings())
        .with_group_mapping("cn=engineering,ou=groups,dc=example,dc=com", "eng")
}

pub fn directory() -> InMemoryDirectory {
    let dir = InMemoryDirectory::new().with_service_account(SERVICE_DN, SERVICE_PW);
    dir.add_user(
        JDOE_DN,
        "correct-horse",
        &[
            ("uid", &["jdoe"]),
            ("mail", &["jdoe@example.com"]),
            ("givenName", &["John"]),
            ("sn", &["Doe"]),
            ("memberOf", &["cn=engineering,ou=groups,dc=example,dc=com"]),
        ],
    );
    dir
}

pub fn user_info(id: &str, email: &str) -> ProviderUserInfo {
    ProviderUserInfo {
        id: id.into(),
        email: Some(email.into()),
        first_name: Some("Jane".into()),
        last_name: Some("Doe".into()),
        ..Default::default()
    }
}
