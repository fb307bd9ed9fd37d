// Table names, unique constraints and reference DDL for the SSO tables.

/// Tenant-scoped identity provider configurations.
pub const CONFIGURATIONS_TABLE: &str = "sso_configurations";
/// Issued sessions.
pub const SESSIONS_TABLE: &str = "sso_sessions";
/// Append-only audit trail.
pub const AUDIT_LOG_TABLE: &str = "sso_audit_log";
/// External identity → internal user links.
pub const USER_IDENTITIES_TABLE: &str = "sso_user_identities";

/// A set of columns whose combined values must be unique within a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub table: &'static str,
    pub name: &'static str,
    pub fields: &'static [&'static str],
}

/// Unique constraints every adapter must enforce.
pub const UNIQUE_CONSTRAINTS: &[UniqueConstraint] = &[
    UniqueConstraint {
        table: CONFIGURATIONS_TABLE,
        name: "sso_configurations_pkey",
        fields: &["id"],
    },
    UniqueConstraint {
        table: SESSIONS_TABLE,
        name: "sso_sessions_pkey",
        fields: &["id"],
    },
    UniqueConstraint {
        table: AUDIT_LOG_TABLE,
        name: "sso_audit_log_pkey",
        fields: &["id"],
    },
    UniqueConstraint {
        table: USER_IDENTITIES_TABLE,
        name: "sso_user_identities_pkey",
        fields: &["id"],
    },
    UniqueConstraint {
        table: USER_IDENTITIES_TABLE,
        name: "sso_user_identities_config_provider_user_key",
        fields: &["configId", "providerUserId"],
    },
];

/// Constraints declared for `table`.
pub fn unique_constraints_for(table: &str) -> impl Iterator<Item = &'static UniqueConstraint> + '_ {
    UNIQUE_CONSTRAINTS.iter().filter(move |c| c.table == table)
}

/// Reference PostgreSQL schema, including the two session procedures.
pub const POSTGRES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS sso_configurations (
    "id"                TEXT PRIMARY KEY,
    "tenantId"          TEXT NOT NULL,
    "name"              TEXT NOT NULL,
    "providerType"      TEXT NOT NULL,
    "enabled"           BOOLEAN NOT NULL DEFAULT TRUE,
    "oauth"             JSONB,
    "saml"              JSONB,
    "ldap"              JSONB,
    "attributeMapping"  JSONB NOT NULL DEFAULT '{}',
    "roleMapping"       JSONB NOT NULL DEFAULT '{}',
    "groupMapping"      JSONB NOT NULL DEFAULT '{}',
    "createdAt"         BIGINT NOT NULL,
    "updatedAt"         BIGINT NOT NULL,
    "createdBy"         TEXT
);
CREATE INDEX IF NOT EXISTS sso_configurations_tenant_idx ON sso_configurations ("tenantId");

CREATE TABLE IF NOT EXISTS sso_sessions (
    "id"              TEXT PRIMARY KEY,
    "userId"          TEXT NOT NULL,
    "configId"        TEXT NOT NULL REFERENCES sso_configurations ("id") ON DELETE CASCADE,
    "providerUserId"  TEXT NOT NULL,
    "sessionData"     JSONB,
    "expiresAt"       BIGINT NOT NULL,
    "createdAt"       BIGINT NOT NULL,
    "lastUsedAt"      BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS sso_sessions_user_idx ON sso_sessions ("userId");
CREATE INDEX IF NOT EXISTS sso_sessions_expires_idx ON sso_sessions ("expiresAt");

CREATE TABLE IF NOT EXISTS sso_audit_log (
    "id"            TEXT PRIMARY KEY,
    "tenantId"      TEXT,
    "configId"      TEXT,
    "userId"        TEXT,
    "action"        TEXT NOT NULL,
    "success"       BOOLEAN NOT NULL,
    "errorMessage"  TEXT,
    "details"       JSONB,
    "createdAt"     BIGINT NOT NULL,
    "sequence"      BIGINT NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS sso_audit_log_created_idx ON sso_audit_log ("createdAt" DESC, "sequence" DESC);

CREATE TABLE IF NOT EXISTS sso_user_identities (
    "id"              TEXT PRIMARY KEY,
    "configId"        TEXT NOT NULL REFERENCES sso_configurations ("id") ON DELETE CASCADE,
    "providerUserId"  TEXT NOT NULL,
    "userId"          TEXT NOT NULL,
    "email"           TEXT,
    "createdAt"       BIGINT NOT NULL,
    CONSTRAINT sso_user_identities_config_provider_user_key UNIQUE ("configId", "providerUserId")
);

CREATE OR REPLACE FUNCTION create_sso_session(session JSONB) RETURNS sso_sessions AS $$
    INSERT INTO sso_sessions
    SELECT * FROM jsonb_populate_record(NULL::sso_sessions, session)
    RETURNING *;
$$ LANGUAGE sql;

CREATE OR REPLACE FUNCTION cleanup_expired_sessions(now_ms BIGINT) RETURNS BIGINT AS $$
    WITH deleted AS (
        DELETE FROM sso_sessions WHERE "expiresAt" <= now_ms RETURNING 1
    )
    SELECT count(*) FROM deleted;
$$ LANGUAGE sql;
"#;
