//! Atomic repository writing.
//!
//! The repository layout is:
//!
//! ```text
//! {root}/index.html                  landing page
//! {root}/simple/index.html           root index (all packages)
//! {root}/simple/{pkg}/index.html     per-package index
//! {root}/simple/{pkg}/{artifact}     wheels, committed by the receiver
//! {root}/simple/{canonical(pkg)}     symlink -> {pkg}, when different
//! ```
//!
//! Two disciplines hold everywhere. Every write lands in a temporary file
//! in the destination directory, is chmod'd, then renamed over the
//! destination, so readers never observe a partial file. And a canonical
//! name symlink never clobbers a real directory; the reverse replacement
//! (a real package claiming a name currently held by a symlink) is
//! handled by [`mkdir_override_symlink`].

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};

mod canonical;
mod html;
mod writer;

pub use canonical::canonicalize_name;
pub use writer::{IndexEntry, IndexWriter};

/// Write `contents` to `path` atomically with the given mode.
///
/// The temporary file lives in `path`'s directory so the final rename
/// never crosses filesystems. On any error the temporary is unlinked and
/// the destination left untouched.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("no parent directory for {}", path.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to chmod temp file for {}", path.display()))?;
    // NamedTempFile unlinks itself on drop, which covers every error
    // path above; persist() is the rename-into-place.
    tmp.persist(path)
        .with_context(|| format!("failed to rename into {}", path.display()))?;
    Ok(())
}

/// Create `dir`, replacing any symlink squatting on the name.
///
/// Racing writers are possible (receiver commit vs. publisher index
/// write), so the symlink replacement loops: mkdir, and on EEXIST unlink
/// the symlink and try again, bounded. A real directory already in place
/// is success.
pub fn mkdir_override_symlink(dir: &Path) -> Result<()> {
    // Two iterations suffice: one to remove the symlink, one to create
    // the directory; the bound guards against pathological racing.
    for _ in 0..4 {
        match fs::create_dir(dir) {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if dir.is_symlink() {
                    match fs::remove_file(dir) {
                        Ok(()) => continue,
                        // Lost the race to another replacer; if it made a
                        // real directory we are done.
                        Err(_) if dir.is_dir() && !dir.is_symlink() => return Ok(()),
                        Err(err) => {
                            return Err(err).with_context(|| {
                                format!("failed to unlink symlink {}", dir.display())
                            });
                        }
                    }
                }
                return Ok(());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to create directory {}", dir.display()));
            }
        }
    }
    anyhow::bail!("gave up replacing symlink at {}", dir.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn write_atomic_creates_file_with_mode() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = td.path().join("index.html");
        write_atomic(&path, b"<html></html>", 0o644).expect("write");
        assert_eq!(fs::read(&path).expect("read"), b"<html></html>");
        let mode = fs::metadata(&path).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn write_atomic_replaces_existing_file() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = td.path().join("index.html");
        write_atomic(&path, b"old", 0o644).expect("write");
        write_atomic(&path, b"new", 0o644).expect("write");
        assert_eq!(fs::read(&path).expect("read"), b"new");
    }

    #[test]
    fn write_atomic_leaves_no_temp_files_behind() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = td.path().join("index.html");
        write_atomic(&path, b"x", 0o644).expect("write");
        let entries: Vec<_> = fs::read_dir(td.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("index.html")]);
    }

    #[test]
    fn mkdir_override_symlink_creates_fresh_directory() {
        let td = tempfile::tempdir().expect("tempdir");
        let dir = td.path().join("pkg");
        mkdir_override_symlink(&dir).expect("mkdir");
        assert!(dir.is_dir());
    }

    #[test]
    fn mkdir_override_symlink_replaces_symlink() {
        let td = tempfile::tempdir().expect("tempdir");
        let real = td.path().join("real");
        fs::create_dir(&real).expect("mkdir");
        let link = td.path().join("alias");
        symlink("real", &link).expect("symlink");
        mkdir_override_symlink(&link).expect("replace");
        assert!(link.is_dir());
        assert!(!link.is_symlink());
    }

    #[test]
    fn mkdir_override_symlink_keeps_existing_directory() {
        let td = tempfile::tempdir().expect("tempdir");
        let dir = td.path().join("pkg");
        fs::create_dir(&dir).expect("mkdir");
        fs::write(dir.join("marker"), b"keep").expect("write");
        mkdir_override_symlink(&dir).expect("noop");
        assert!(dir.join("marker").exists());
    }
}
