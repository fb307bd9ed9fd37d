// Nanoid-based identifiers for configurations, sessions and audit rows.

/// Generate a 21-character unique id.
pub fn generate_id() -> String {
    nanoid::nanoid!()
}

/// Generate an id with a custom length (SAML request ids use a longer one).
pub fn generate_id_with_length(len: usize) -> String {
    nanoid::nanoid!(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_length() {
        assert_eq!(generate_id().len(), 21);
        assert_eq!(generate_id_with_length(32).len(), 32);
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(generate_id(), generate_id());
    }
}
