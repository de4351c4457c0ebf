//! PEP 503 package-name canonicalization.

use std::sync::OnceLock;

use regex::Regex;

/// Collapse runs of `-`, `_` and `.` to a single `-` and lowercase.
///
/// This is the PEP 503 normal form; the publisher uses it to decide
/// whether a package directory needs a canonical-name alias beside it.
pub fn canonicalize_name(name: &str) -> String {
    static CANONICALIZE: OnceLock<Regex> = OnceLock::new();
    let re = CANONICALIZE.get_or_init(|| Regex::new(r"[-_.]+").expect("canonicalization regex"));
    re.replace_all(name, "-").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn collapses_separator_runs() {
        assert_eq!(canonicalize_name("Foo_Bar"), "foo-bar");
        assert_eq!(canonicalize_name("foo.bar"), "foo-bar");
        assert_eq!(canonicalize_name("foo--bar"), "foo-bar");
        assert_eq!(canonicalize_name("foo-_.bar"), "foo-bar");
    }

    #[test]
    fn already_canonical_names_are_unchanged() {
        assert_eq!(canonicalize_name("foo-bar"), "foo-bar");
        assert_eq!(canonicalize_name("numpy"), "numpy");
    }

    proptest! {
        #[test]
        fn canonicalization_is_idempotent(name in "[A-Za-z0-9._-]{1,40}") {
            let once = canonicalize_name(&name);
            prop_assert_eq!(canonicalize_name(&once), once);
        }

        #[test]
        fn output_never_contains_underscores_or_dots(name in "[A-Za-z0-9._-]{1,40}") {
            let canon = canonicalize_name(&name);
            prop_assert!(!canon.contains('_'));
            prop_assert!(!canon.contains('.'));
            prop_assert!(!canon.contains("--"));
        }
    }
}
