//! Utility functions for ADCM
//!
//! Name validation helpers shared by the object graph and the bundle loader.

use std::sync::LazyLock;

/// One DNS label: alphanumeric ends, hyphens inside, at most 63 chars
static FQDN_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("Invalid fqdn regex pattern")
});

/// Object names: start alphanumeric, then alphanumeric, space, dot, underscore, hyphen
static NAME_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9 ._-]*$").expect("Invalid name regex pattern")
});

/// Maximum fqdn length
pub const MAX_FQDN_LENGTH: usize = 253;

/// Maximum object name length
pub const MAX_NAME_LENGTH: usize = 150;

/// Validate a host fqdn against DNS label syntax
///
/// # Examples
///
/// ```
/// use adcm_common::is_valid_fqdn;
///
/// assert!(is_valid_fqdn("node-1.example.com"));
/// assert!(!is_valid_fqdn("-node"));
/// assert!(!is_valid_fqdn("under_score"));
/// ```
pub fn is_valid_fqdn(fqdn: &str) -> bool {
    !fqdn.is_empty() && fqdn.len() <= MAX_FQDN_LENGTH && FQDN_PATTERN.is_match(fqdn)
}

/// Validate a cluster/provider/group name
///
/// # Examples
///
/// ```
/// use adcm_common::is_valid_name;
///
/// assert!(is_valid_name("Main cluster_01"));
/// assert!(!is_valid_name(" leading space"));
/// assert!(!is_valid_name("trailing "));
/// ```
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LENGTH
        && !name.ends_with(' ')
        && NAME_PATTERN.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fqdn_valid() {
        assert!(is_valid_fqdn("h1"));
        assert!(is_valid_fqdn("host-01.dc1.example.com"));
        assert!(is_valid_fqdn("A1"));
    }

    #[test]
    fn test_fqdn_invalid() {
        assert!(!is_valid_fqdn(""));
        assert!(!is_valid_fqdn("host-"));
        assert!(!is_valid_fqdn("host..com"));
        assert!(!is_valid_fqdn("host name"));
        assert!(!is_valid_fqdn(&"a".repeat(64)));
        assert!(!is_valid_fqdn(&format!("{}com", "a.".repeat(127))));
    }

    #[test]
    fn test_name() {
        assert!(is_valid_name("c1"));
        assert!(is_valid_name("cluster.v2-prod"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("_hidden"));
        assert!(!is_valid_name("bad/name"));
        assert!(!is_valid_name(&"n".repeat(151)));
    }

    proptest! {
        #[test]
        fn prop_dotted_labels_are_valid(labels in proptest::collection::vec("[a-z0-9]{1,20}", 1..6)) {
            prop_assert!(is_valid_fqdn(&labels.join(".")));
        }

        #[test]
        fn prop_underscore_never_valid(prefix in "[a-z]{1,10}", suffix in "[a-z]{1,10}") {
            let fqdn = format!("{}_{}", prefix, suffix);
            prop_assert!(!is_valid_fqdn(&fqdn));
        }
    }
}
