//! Collision-free destination paths.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Returns `desired` if nothing exists there, otherwise the first free
/// `stem (n).ext` sibling, counting from 1.
///
/// Existence is re-checked for every candidate. The result is not reserved:
/// a concurrent creator can still take the name before the caller uses it.
///
/// # Examples
///
/// ```no_run
/// use dropsift::destination::resolve;
/// use std::path::Path;
///
/// // With "report.pdf" and "report (1).pdf" already present:
/// let path = resolve(Path::new("/docs/report.pdf"));
/// assert_eq!(path, Path::new("/docs/report (2).pdf"));
/// ```
pub fn resolve(desired: &Path) -> PathBuf {
    if !exists(desired) {
        return desired.to_path_buf();
    }

    let parent = desired.parent().unwrap_or_else(|| Path::new(""));
    let stem = desired.file_stem().unwrap_or_default();
    let extension = desired.extension();

    let mut n: u64 = 1;
    loop {
        let mut name = OsString::from(stem);
        name.push(format!(" ({})", n));
        if let Some(ext) = extension {
            name.push(".");
            name.push(ext);
        }

        let candidate = parent.join(name);
        if !exists(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

// A dangling symlink still occupies the name.
fn exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}
