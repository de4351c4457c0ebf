//! HTML generation for the machine-readable indexes and the landing page.
//!
//! The index documents are deliberately minimal: installers parse them
//! with regexes as often as with HTML parsers, so the shape is kept
//! byte-stable and free of styling.

use std::collections::BTreeMap;

use crate::writer::IndexEntry;

/// Escape text for element content and double-quoted attributes.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

/// The root index: one anchor per known package, in insertion order.
pub(crate) fn root_index(packages: &[String]) -> String {
    let mut doc = String::from(
        "<!DOCTYPE html>\n<html>\n<head>\n<title>Wheelhouse Simple Index</title>\n\
         <meta name=\"api-version\" value=\"2\" />\n</head>\n<body>\n",
    );
    for package in packages {
        let name = escape(package);
        doc.push_str(&format!("<a href=\"{name}\">{name}</a><br />\n"));
    }
    doc.push_str("</body>\n</html>\n");
    doc
}

/// One package's index: anchors carrying the content hash in the
/// fragment, the form installers verify downloads against.
pub(crate) fn package_index(package: &str, files: &[IndexEntry]) -> String {
    let title = escape(&format!("Links for {package}"));
    let mut doc = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<title>{title}</title>\n</head>\n<body>\n\
         <h1>{title}</h1>\n"
    );
    for entry in files {
        let filename = escape(&entry.filename);
        let hash = escape(&entry.filehash);
        doc.push_str(&format!(
            "<a href=\"{filename}#sha256={hash}\" rel=\"internal\">{filename}</a><br />\n"
        ));
    }
    doc.push_str("</body>\n</html>\n");
    doc
}

/// Substitute `{key}` placeholders in the landing-page template.
///
/// Unknown placeholders are left verbatim so a stale template degrades
/// visibly rather than erroring the publisher.
pub(crate) fn render_template(template: &str, values: &BTreeMap<&str, String>) -> String {
    let mut out = template.to_owned();
    for (key, value) in values {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html_metacharacters() {
        assert_eq!(escape("a<b&\"c\">"), "a&lt;b&amp;&quot;c&quot;&gt;");
    }

    #[test]
    fn root_index_orders_and_links() {
        let doc = root_index(&["zebra".to_owned(), "alpha".to_owned()]);
        let zebra = doc.find("zebra").expect("zebra present");
        let alpha = doc.find("alpha").expect("alpha present");
        assert!(zebra < alpha, "insertion order must be preserved");
        assert!(doc.contains("<a href=\"zebra\">zebra</a>"));
    }

    #[test]
    fn package_index_carries_hash_fragments() {
        let doc = package_index("foo", &[IndexEntry {
            filename: "foo-0.1-cp34-cp34m-linux_armv7l.whl".to_owned(),
            filehash: "cafebabe".to_owned(),
        }]);
        assert!(doc.contains("foo-0.1-cp34-cp34m-linux_armv7l.whl#sha256=cafebabe"));
        assert!(doc.contains("rel=\"internal\""));
    }

    #[test]
    fn template_substitution_replaces_known_keys_only() {
        let values = BTreeMap::from([("packages_built", "42".to_owned())]);
        let out = render_template("built: {packages_built}, other: {unknown}", &values);
        assert_eq!(out, "built: 42, other: {unknown}");
    }
}
