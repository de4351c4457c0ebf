//! The repository writer used by the publisher task.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use wheelhouse_types::MasterStats;

use crate::html;
use crate::{canonicalize_name, mkdir_override_symlink, write_atomic};

/// One anchor of a package index. Hashes come from the catalog, never
/// from re-reading the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub filename: String,
    pub filehash: String,
}

/// Owns all index and landing-page writes under the repository root.
#[derive(Debug, Clone)]
pub struct IndexWriter {
    root: PathBuf,
}

impl IndexWriter {
    /// Open (creating if necessary) the repository skeleton.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("simple"))
            .with_context(|| format!("failed to create repository at {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn simple_dir(&self) -> PathBuf {
        self.root.join("simple")
    }

    pub fn package_dir(&self, package: &str) -> PathBuf {
        self.simple_dir().join(package)
    }

    /// Rewrite the root index listing every known package.
    pub fn write_root_index(&self, packages: &[String]) -> Result<()> {
        let doc = html::root_index(packages);
        write_atomic(&self.simple_dir().join("index.html"), doc.as_bytes(), 0o644)
    }

    /// Rewrite one package's index and maintain its canonical-name
    /// alias. The package directory replaces any symlink squatting on
    /// its name first, so a package whose literal name is some other
    /// package's canonical form always wins the directory.
    pub fn write_package_index(&self, package: &str, files: &[IndexEntry]) -> Result<()> {
        let pkg_dir = self.package_dir(package);
        mkdir_override_symlink(&pkg_dir)?;
        let doc = html::package_index(package, files);
        write_atomic(&pkg_dir.join("index.html"), doc.as_bytes(), 0o644)?;
        self.write_canonical_alias(package)
    }

    /// Create `simple/{canonical}` -> `{package}` when the names differ.
    /// An existing entry at the canonical path, symlink or real
    /// directory, is left alone: aliases never clobber.
    fn write_canonical_alias(&self, package: &str) -> Result<()> {
        let canonical = canonicalize_name(package);
        if canonical == package {
            return Ok(());
        }
        let alias = self.simple_dir().join(&canonical);
        match symlink(package, &alias) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to create canonical alias {}", alias.display())),
        }
    }

    /// Rewrite the landing page from a statistics sample.
    pub fn write_homepage(&self, stats: &MasterStats) -> Result<()> {
        let values = homepage_values(stats);
        let doc = html::render_template(include_str!("index.template.html"), &values);
        write_atomic(&self.root.join("index.html"), doc.as_bytes(), 0o664)
    }

    /// Remove a package's directory and any canonical alias pointing at
    /// it. Missing entries are not an error; deletion is idempotent.
    pub fn delete_package(&self, package: &str) -> Result<()> {
        let canonical = canonicalize_name(package);
        if canonical != package {
            let alias = self.simple_dir().join(&canonical);
            if alias.is_symlink()
                && fs::read_link(&alias).is_ok_and(|target| target == Path::new(package))
            {
                match fs::remove_file(&alias) {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => {
                        return Err(err).with_context(|| {
                            format!("failed to remove alias {}", alias.display())
                        });
                    }
                }
            }
        }
        match fs::remove_dir_all(self.package_dir(package)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to remove package directory {package:?}")),
        }
    }
}

fn homepage_values(stats: &MasterStats) -> BTreeMap<&'static str, String> {
    let total_secs = stats.builds_time.as_secs();
    let (days, rem) = (total_secs / 86_400, total_secs % 86_400);
    let hours = rem / 3_600;
    BTreeMap::from([
        ("timestamp", stats.timestamp.to_rfc2822()),
        ("packages_built", stats.packages_built.to_string()),
        ("builds_last_hour", stats.builds_last_hour.to_string()),
        ("builds_time", format!("{days} days {hours} hours")),
        (
            "builds_size_mb",
            (stats.builds_size / (1024 * 1024)).to_string(),
        ),
        ("builds_pending", stats.total_pending().to_string()),
        ("new_last_hour", stats.new_last_hour.to_string()),
        ("files_count", stats.files_count.to_string()),
        (
            "disk_free_gb",
            (stats.disk_free / (1024 * 1024 * 1024)).to_string(),
        ),
        (
            "disk_size_gb",
            (stats.disk_size / (1024 * 1024 * 1024)).to_string(),
        ),
        ("load_average", format!("{:.2}", stats.load_average)),
        ("cpu_temp", format!("{:.1}", stats.cpu_temp)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn writer() -> (tempfile::TempDir, IndexWriter) {
        let td = tempfile::tempdir().expect("tempdir");
        let writer = IndexWriter::new(td.path().join("www")).expect("writer");
        (td, writer)
    }

    fn entry(filename: &str, hash: &str) -> IndexEntry {
        IndexEntry {
            filename: filename.to_owned(),
            filehash: hash.to_owned(),
        }
    }

    fn sample_stats() -> MasterStats {
        MasterStats {
            timestamp: chrono::Utc.with_ymd_and_hms(2018, 3, 1, 12, 0, 0).unwrap(),
            packages_built: 12_345,
            builds_last_hour: 42,
            builds_time: Duration::from_secs(90 * 3600),
            builds_size: 7 << 30,
            builds_pending: BTreeMap::from([("cp34m".to_owned(), 17u64)]),
            new_last_hour: 3,
            files_count: 23_456,
            downloads_last_hour: None,
            downloads_last_month: None,
            downloads_all: None,
            disk_size: 200 << 30,
            disk_free: 120 << 30,
            mem_size: 1 << 30,
            mem_free: 1 << 29,
            swap_size: 0,
            swap_free: 0,
            load_average: 1.25,
            cpu_temp: 47.8,
        }
    }

    #[test]
    fn package_index_snapshot() {
        let files = vec![
            entry("foo-0.1-cp34-cp34m-linux_armv6l.whl", "aaaa"),
            entry("foo-0.1-cp34-cp34m-linux_armv7l.whl", "aaaa"),
        ];
        insta::assert_snapshot!(html::package_index("foo", &files), @r###"
<!DOCTYPE html>
<html>
<head>
<title>Links for foo</title>
</head>
<body>
<h1>Links for foo</h1>
<a href="foo-0.1-cp34-cp34m-linux_armv6l.whl#sha256=aaaa" rel="internal">foo-0.1-cp34-cp34m-linux_armv6l.whl</a><br />
<a href="foo-0.1-cp34-cp34m-linux_armv7l.whl#sha256=aaaa" rel="internal">foo-0.1-cp34-cp34m-linux_armv7l.whl</a><br />
</body>
</html>
"###);
    }

    #[test]
    fn root_index_snapshot() {
        insta::assert_snapshot!(
            html::root_index(&["numpy".to_owned(), "Foo_Bar".to_owned()]),
            @r###"
<!DOCTYPE html>
<html>
<head>
<title>Wheelhouse Simple Index</title>
<meta name="api-version" value="2" />
</head>
<body>
<a href="numpy">numpy</a><br />
<a href="Foo_Bar">Foo_Bar</a><br />
</body>
</html>
"###
        );
    }

    #[test]
    fn writes_package_index_and_alias() {
        let (_td, writer) = writer();
        writer
            .write_package_index("Foo_Bar", &[entry("x-1-py3-none-any.whl", "ff")])
            .expect("write");
        assert!(writer.package_dir("Foo_Bar").join("index.html").is_file());
        let alias = writer.simple_dir().join("foo-bar");
        assert!(alias.is_symlink());
        assert_eq!(
            fs::read_link(&alias).expect("read link"),
            PathBuf::from("Foo_Bar")
        );
    }

    #[test]
    fn canonical_package_needs_no_alias() {
        let (_td, writer) = writer();
        writer.write_package_index("numpy", &[]).expect("write");
        // Only the package directory and its index exist.
        let entries: Vec<_> = fs::read_dir(writer.simple_dir())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("numpy")]);
    }

    #[test]
    fn alias_collision_leaves_first_claim_standing() {
        // Both Foo_Bar and foo-bar canonicalize to foo-bar. Whoever
        // publishes first claims the canonical path; the literal package
        // later replaces the symlink with its real directory and the
        // first package keeps its own directory untouched.
        let (_td, writer) = writer();
        writer
            .write_package_index("Foo_Bar", &[entry("a-1-py3-none-any.whl", "aa")])
            .expect("write first");
        assert!(writer.simple_dir().join("foo-bar").is_symlink());

        writer
            .write_package_index("foo-bar", &[entry("b-1-py3-none-any.whl", "bb")])
            .expect("write second");
        let canonical = writer.simple_dir().join("foo-bar");
        assert!(canonical.is_dir() && !canonical.is_symlink());
        assert!(writer.package_dir("Foo_Bar").join("index.html").is_file());
    }

    #[test]
    fn root_index_is_written_atomically_in_place() {
        let (_td, writer) = writer();
        writer
            .write_root_index(&["foo".to_owned()])
            .expect("write");
        let doc = fs::read_to_string(writer.simple_dir().join("index.html")).expect("read");
        assert!(doc.contains("<a href=\"foo\">foo</a>"));
    }

    #[test]
    fn homepage_substitutes_stats() {
        let (_td, writer) = writer();
        writer.write_homepage(&sample_stats()).expect("write");
        let doc = fs::read_to_string(writer.root().join("index.html")).expect("read");
        assert!(doc.contains("12345"));
        assert!(doc.contains("3 days 18 hours"));
        assert!(!doc.contains("{packages_built}"));
    }

    #[test]
    fn delete_package_removes_directory_and_alias() {
        let (_td, writer) = writer();
        writer
            .write_package_index("Foo_Bar", &[entry("a-1-py3-none-any.whl", "aa")])
            .expect("write");
        writer.delete_package("Foo_Bar").expect("delete");
        assert!(!writer.package_dir("Foo_Bar").exists());
        assert!(!writer.simple_dir().join("foo-bar").is_symlink());
    }

    #[test]
    fn delete_package_is_idempotent() {
        let (_td, writer) = writer();
        writer.delete_package("ghost").expect("first");
        writer.delete_package("ghost").expect("second");
    }

    #[test]
    fn delete_package_keeps_foreign_alias_target() {
        // foo-bar's canonical alias points at Foo_Bar; deleting the
        // unrelated package foo.bar must not remove it.
        let (_td, writer) = writer();
        writer
            .write_package_index("Foo_Bar", &[entry("a-1-py3-none-any.whl", "aa")])
            .expect("write");
        writer
            .write_package_index("foo.bar", &[entry("b-1-py3-none-any.whl", "bb")])
            .expect("write");
        writer.delete_package("foo.bar").expect("delete");
        let alias = writer.simple_dir().join("foo-bar");
        assert!(alias.is_symlink());
        assert_eq!(
            fs::read_link(&alias).expect("read link"),
            PathBuf::from("Foo_Bar")
        );
    }
}
