// Search filter construction.

use sso_bridge_core::config::USERNAME_PLACEHOLDER;

/// Escape a value for use inside an LDAP search filter (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

/// Substitute the escaped username into every `{username}` in `template`.
pub fn build_user_filter(template: &str, username: &str) -> String {
    template.replace(USERNAME_PLACEHOLDER, &escape_filter_value(username))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_filter_value() {
        assert_eq!(escape_filter_value("John Doe"), "John Doe");
        assert_eq!(escape_filter_value("John*"), "John\\2a");
        assert_eq!(escape_filter_value("(admin)"), "\\28admin\\29");
        assert_eq!(escape_filter_value("a\\b"), "a\\5cb");
        assert_eq!(escape_filter_value("nul\0"), "nul\\00");
    }

    #[test]
    fn test_build_user_filter() {
        assert_eq!(build_user_filter("(uid={username})", "jdoe"), "(uid=jdoe)");
        assert_eq!(
            build_user_filter("(|(uid={username})(mail={username}))", "j*"),
            "(|(uid=j\\2a)(mail=j\\2a))"
        );
    }

    #[test]
    fn test_injection_is_neutralised() {
        let filter = build_user_filter("(uid={username})", "x)(uid=*");
        assert_eq!(filter, "(uid=x\\29\\28uid=\\2a)");
    }
}
