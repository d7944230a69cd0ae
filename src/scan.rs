//! Finding the largest files under a directory.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{DropsiftError, DropsiftResult};

/// A file and its size in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSize {
    pub path: PathBuf,
    pub size: u64,
}

/// Counts the regular files under `root`, for sizing a progress bar.
pub fn count_files(root: &Path) -> usize {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .count()
}

/// Returns the `top_n` largest regular files under `root`, biggest first.
///
/// Entries that cannot be read are skipped. `on_file` is called once per file
/// visited. Ties are broken by path so the output is stable.
pub fn largest_files<F>(root: &Path, top_n: usize, mut on_file: F) -> DropsiftResult<Vec<FileSize>>
where
    F: FnMut(),
{
    if !root.is_dir() {
        return Err(DropsiftError::invalid_input(format!(
            "invalid directory: {}",
            root.display()
        )));
    }

    let mut files: Vec<FileSize> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|entry| {
            on_file();
            let size = entry.metadata().ok()?.len();
            Some(FileSize {
                path: entry.into_path(),
                size,
            })
        })
        .collect();

    files.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
    files.truncate(top_n);
    Ok(files)
}

/// Formats a byte count with binary units, e.g. `1.50 KB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} PB", size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0.00 B");
        assert_eq!(human_size(1023), "1023.00 B");
        assert_eq!(human_size(1536), "1.50 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(human_size(1024u64.pow(5)), "1.00 PB");
    }

    #[test]
    fn test_largest_files_recursive_and_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::create_dir_all(base.join("deep/er")).unwrap();
        fs::write(base.join("small.txt"), vec![0u8; 10]).unwrap();
        fs::write(base.join("deep/mid.bin"), vec![0u8; 200]).unwrap();
        fs::write(base.join("deep/er/big.iso"), vec![0u8; 3000]).unwrap();

        let mut visited = 0;
        let top = largest_files(base, 2, || visited += 1).unwrap();

        assert_eq!(visited, 3);
        assert_eq!(count_files(base), 3);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].path, base.join("deep/er/big.iso"));
        assert_eq!(top[0].size, 3000);
        assert_eq!(top[1].path, base.join("deep/mid.bin"));
    }

    #[test]
    fn test_largest_files_rejects_missing_root() {
        assert!(largest_files(Path::new("/non/existent"), 5, || {}).is_err());
    }
}
