//! Wheel filename grammar.
//!
//! Artifact filenames obey `{pkg}-{ver}-{py}-{abi}-{plat}.whl`; the five
//! tags are recovered by splitting on `-` from the right, so only the
//! package tag may itself contain a hyphen.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to parse a wheel filename.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WheelNameError {
    #[error("wheel filename {0:?} does not end in .whl")]
    MissingExtension(String),
    #[error("wheel filename {0:?} does not have five dash-separated tags")]
    BadTagCount(String),
    #[error("wheel filename {0:?} contains an empty tag")]
    EmptyTag(String),
}

/// The five tags of a wheel filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelName {
    pub package_tag: String,
    pub version_tag: String,
    pub py_version_tag: String,
    pub abi_tag: String,
    pub platform_tag: String,
}

impl WheelName {
    /// Parse `filename`, splitting the stem on `-` from the right.
    pub fn parse(filename: &str) -> Result<Self, WheelNameError> {
        let stem = filename
            .strip_suffix(".whl")
            .ok_or_else(|| WheelNameError::MissingExtension(filename.to_owned()))?;
        // rsplitn yields the last three tags individually and leaves the
        // package tag free to contain hyphens of its own.
        let mut parts = stem.rsplitn(5, '-');
        let platform_tag = parts.next().unwrap_or_default().to_owned();
        let abi_tag = parts.next().unwrap_or_default().to_owned();
        let py_version_tag = parts.next().unwrap_or_default().to_owned();
        let version_tag = parts.next().unwrap_or_default().to_owned();
        let package_tag = parts
            .next()
            .ok_or_else(|| WheelNameError::BadTagCount(filename.to_owned()))?
            .to_owned();
        let name = Self {
            package_tag,
            version_tag,
            py_version_tag,
            abi_tag,
            platform_tag,
        };
        if [
            &name.package_tag,
            &name.version_tag,
            &name.py_version_tag,
            &name.abi_tag,
            &name.platform_tag,
        ]
        .iter()
        .any(|tag| tag.is_empty())
        {
            return Err(WheelNameError::EmptyTag(filename.to_owned()));
        }
        Ok(name)
    }

    /// Reassemble the canonical filename.
    pub fn filename(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}.whl",
            self.package_tag,
            self.version_tag,
            self.py_version_tag,
            self.abi_tag,
            self.platform_tag
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_simple_name() {
        let name = WheelName::parse("foo-0.1-cp34-cp34m-linux_armv7l.whl").expect("parse");
        assert_eq!(name.package_tag, "foo");
        assert_eq!(name.version_tag, "0.1");
        assert_eq!(name.py_version_tag, "cp34");
        assert_eq!(name.abi_tag, "cp34m");
        assert_eq!(name.platform_tag, "linux_armv7l");
    }

    #[test]
    fn hyphenated_package_tag_stays_with_package() {
        let name = WheelName::parse("foo-bar-0.1-py3-none-any.whl").expect("parse");
        assert_eq!(name.package_tag, "foo-bar");
        assert_eq!(name.version_tag, "0.1");
    }

    #[test]
    fn rejects_wrong_extension() {
        assert!(matches!(
            WheelName::parse("foo-0.1-cp34-cp34m-linux_armv7l.tar.gz"),
            Err(WheelNameError::MissingExtension(_))
        ));
    }

    #[test]
    fn rejects_too_few_tags() {
        assert!(matches!(
            WheelName::parse("foo-0.1-cp34.whl"),
            Err(WheelNameError::BadTagCount(_))
        ));
    }

    #[test]
    fn rejects_empty_tags() {
        assert!(matches!(
            WheelName::parse("foo-0.1--cp34m-linux_armv7l.whl"),
            Err(WheelNameError::EmptyTag(_))
        ));
    }

    proptest! {
        #[test]
        fn filename_roundtrips(
            pkg in "[a-zA-Z0-9_]{1,20}(-[a-zA-Z0-9_]{1,10}){0,2}",
            ver in "[0-9]{1,3}(\\.[0-9]{1,3}){0,2}",
            py in "(cp3[0-9]|py3)",
            abi in "(cp3[0-9]m|none|abi3)",
            plat in "(linux_armv7l|linux_armv6l|any)",
        ) {
            let filename = format!("{pkg}-{ver}-{py}-{abi}-{plat}.whl");
            let name = WheelName::parse(&filename).expect("parse");
            prop_assert_eq!(name.filename(), filename);
        }
    }
}
