// Claim, attribute, role and group mapping shared by all three protocols.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::config::MappingTable;

/// Claim names that carry membership lists.
pub const MEMBERSHIP_CLAIMS: &[&str] = &["roles", "groups", "memberOf"];

/// Default claim candidates for each internal profile field.
pub const FIRST_NAME_CLAIMS: &[&str] = &[
    "first_name",
    "firstName",
    "given_name",
    "givenName",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/givenname",
];
pub const LAST_NAME_CLAIMS: &[&str] = &[
    "last_name",
    "lastName",
    "family_name",
    "familyName",
    "sn",
    "surname",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/surname",
];
pub const EMAIL_CLAIMS: &[&str] = &[
    "email",
    "mail",
    "emailAddress",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress",
];
pub const USERNAME_CLAIMS: &[&str] = &["preferred_username", "username", "uid", "login"];

/// Loose truthiness for claim flags: `true`, non-zero numbers and
/// `"true"` / `"1"` / `"yes"` strings.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        Value::Array(items) => items.first().is_some_and(is_truthy),
        _ => false,
    }
}

/// First string carried by a claim value (a string or the first element of an array).
pub fn first_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(first_string),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Look up a profile field: the configured attribute mapping wins, then the
/// default candidates in order.
pub fn resolve_attribute(
    claims: &HashMap<String, Value>,
    attribute_mapping: &MappingTable,
    field: &str,
    candidates: &[&str],
) -> Option<String> {
    if let Some(mapped) = attribute_mapping.get(field) {
        if let Some(v) = claims.get(mapped).and_then(first_string) {
            return Some(v);
        }
    }
    candidates
        .iter()
        .find_map(|c| claims.get(*c).and_then(first_string))
}

/// Resolve internal roles from a role mapping table.
pub fn map_roles(claims: &HashMap<String, Value>, role_mapping: &MappingTable) -> Vec<String> {
    apply_mapping(claims, role_mapping)
}

/// Resolve internal groups from a group mapping table.
pub fn map_groups(claims: &HashMap<String, Value>, group_mapping: &MappingTable) -> Vec<String> {
    apply_mapping(claims, group_mapping)
}

/// A mapping key matches when the claim of that name is truthy, or when it
/// appears in one of the membership claims. Results are sorted and unique.
fn apply_mapping(claims: &HashMap<String, Value>, mapping: &MappingTable) -> Vec<String> {
    let memberships = collect_memberships(claims);

    let mut out = BTreeSet::new();
    for (external, internal) in mapping {
        let flagged = claims.get(external).is_some_and(is_truthy);
        let member = memberships.iter().any(|m| membership_matches(m, external));
        if flagged || member {
            out.insert(internal.clone());
        }
    }
    out.into_iter().collect()
}

fn collect_memberships(claims: &HashMap<String, Value>) -> Vec<String> {
    let mut out = Vec::new();
    for name in MEMBERSHIP_CLAIMS {
        match claims.get(*name) {
            Some(Value::Array(items)) => {
                out.extend(items.iter().filter_map(|v| v.as_str().map(str::to_string)))
            }
            Some(Value::String(s)) => out.push(s.clone()),
            _ => {}
        }
    }
    out
}

/// Exact match, or a DN whose leading RDN value matches (`cn=admins,ou=...`).
fn membership_matches(membership: &str, key: &str) -> bool {
    if membership.eq_ignore_ascii_case(key) {
        return true;
    }
    membership
        .split(',')
        .next()
        .and_then(|rdn| rdn.split_once('='))
        .is_some_and(|(_, value)| value.trim().eq_ignore_ascii_case(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(v: Value) -> HashMap<String, Value> {
        serde_json::from_value(v).unwrap()
    }

    fn table(pairs: &[(&str, &str)]) -> MappingTable {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_truthy_flag_maps_role() {
        let roles = map_roles(&claims(json!({"admin": true})), &table(&[("admin", "owner")]));
        assert_eq!(roles, vec!["owner"]);
    }

    #[test]
    fn test_falsy_flag_does_not_map() {
        let roles = map_roles(&claims(json!({"admin": false})), &table(&[("admin", "owner")]));
        assert!(roles.is_empty());
    }

    #[test]
    fn test_membership_array_maps_group() {
        let groups = map_groups(
            &claims(json!({"groups": ["engineering", "sales"]})),
            &table(&[("engineering", "eng"), ("finance", "fin")]),
        );
        assert_eq!(groups, vec!["eng"]);
    }

    #[test]
    fn test_member_of_dn_maps_by_cn() {
        let roles = map_roles(
            &claims(json!({"memberOf": ["cn=Admins,ou=groups,dc=example,dc=com"]})),
            &table(&[("admins", "admin")]),
        );
        assert_eq!(roles, vec!["admin"]);
    }

    #[test]
    fn test_string_truthiness() {
        assert!(is_truthy(&json!("true")));
        assert!(is_truthy(&json!("1")));
        assert!(is_truthy(&json!(1)));
        assert!(!is_truthy(&json!("no")));
        assert!(!is_truthy(&json!(null)));
    }

    #[test]
    fn test_attribute_mapping_overrides_defaults() {
        let c = claims(json!({"fname": "Jane", "first_name": "Ignored"}));
        let m = table(&[("firstName", "fname")]);
        assert_eq!(
            resolve_attribute(&c, &m, "firstName", FIRST_NAME_CLAIMS).as_deref(),
            Some("Jane")
        );
        assert_eq!(
            resolve_attribute(&c, &MappingTable::new(), "firstName", FIRST_NAME_CLAIMS).as_deref(),
            Some("Ignored")
        );
    }

    #[test]
    fn test_first_string_from_array() {
        assert_eq!(first_string(&json!(["a", "b"])).as_deref(), Some("a"));
        assert_eq!(first_string(&json!("")), None);
    }
}
