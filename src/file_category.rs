/// Extension-based file categorization.
///
/// This module maps file extensions to category folder names (e.g. "Images",
/// "Docs"). The mapping is an ordered table: when an extension appears under
/// more than one category, the first category wins. Anything unmatched goes to
/// the [`FALLBACK_CATEGORY`].
///
/// # Examples
///
/// ```
/// use dropsift::file_category::ExtensionMapping;
///
/// let mapping = ExtensionMapping::default();
/// assert_eq!(mapping.category_for("JPG"), "Images");
/// assert_eq!(mapping.category_for(".pdf"), "Docs");
/// assert_eq!(mapping.category_for("xyz"), "Others");
/// ```
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;

use crate::error::{DropsiftError, DropsiftResult};

/// Category used for extensions that no mapping entry claims.
pub const FALLBACK_CATEGORY: &str = "Others";

const DEFAULT_TABLE: &[(&str, &[&str])] = &[
    (
        "Images",
        &["jpg", "jpeg", "png", "gif", "webp", "heic", "tif", "tiff", "svg"],
    ),
    (
        "Docs",
        &[
            "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "csv", "txt", "md", "rtf",
        ],
    ),
    ("Audio", &["mp3", "flac", "wav", "aac", "m4a", "ogg", "aiff"]),
    ("Video", &["mp4", "mkv", "mov", "avi", "webm", "m4v"]),
    ("Archives", &["zip", "rar", "7z", "tar", "gz", "bz2", "xz"]),
    (
        "Code",
        &[
            "py", "ipynb", "js", "ts", "json", "yml", "yaml", "sh", "html", "css", "c", "cpp",
            "rs", "go", "java", "kt",
        ],
    ),
    ("Images.RAW", &["cr2", "nef", "arw", "rw2", "orf", "dng"]),
];

/// A single category and the extensions it claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryEntry {
    /// Folder name the category's files are moved into.
    pub name: String,
    /// Lowercase extensions without a leading dot.
    pub extensions: HashSet<String>,
}

/// Ordered mapping from category names to file extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionMapping {
    entries: Vec<CategoryEntry>,
}

/// Lowercases an extension and strips any leading dots.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}

impl ExtensionMapping {
    /// Creates an empty mapping. Every lookup falls back to [`FALLBACK_CATEGORY`].
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends a category with its extensions. Extensions are normalized.
    pub fn add_category<I, S>(&mut self, name: &str, extensions: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|e| normalize_extension(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        self.entries.push(CategoryEntry {
            name: name.to_string(),
            extensions,
        });
    }

    /// Returns the category entries in lookup order.
    pub fn entries(&self) -> &[CategoryEntry] {
        &self.entries
    }

    /// Returns the category name for an extension.
    ///
    /// The lookup ignores case and leading dots, so `.JPG`, `jpg` and `.jpg`
    /// resolve identically.
    pub fn category_for(&self, ext: &str) -> &str {
        let ext = normalize_extension(ext);
        self.entries
            .iter()
            .find(|entry| entry.extensions.contains(&ext))
            .map(|entry| entry.name.as_str())
            .unwrap_or(FALLBACK_CATEGORY)
    }

    /// Returns the category name for a file path, based on its extension.
    pub fn category_for_path(&self, path: &Path) -> &str {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.category_for(&ext)
    }

    /// Loads a mapping from a JSON or TOML file.
    ///
    /// Files ending in `.toml` are parsed as TOML, everything else as JSON.
    /// Either format is a table from category name to a list of extensions;
    /// the table's key order becomes the lookup order.
    ///
    /// ```json
    /// { "Images": ["jpg", ".PNG"], "Books": ["epub"] }
    /// ```
    pub fn load(path: &Path) -> DropsiftResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            DropsiftError::invalid_input(format!(
                "cannot read mapping file {}: {}",
                path.display(),
                e
            ))
        })?;

        let is_toml = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let parsed = if is_toml {
            Self::parse_toml(&text)
        } else {
            Self::parse_json(&text)
        };

        parsed.map_err(|reason| {
            DropsiftError::invalid_input(format!(
                "invalid mapping file {}: {}",
                path.display(),
                reason
            ))
        })
    }

    /// Parses a JSON object of `category -> [extensions]`.
    pub fn parse_json(text: &str) -> Result<Self, String> {
        let table: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(text).map_err(|e| e.to_string())?;
        let mut pairs = Vec::with_capacity(table.len());
        for (name, value) in table {
            let exts = Vec::<RawExtension>::deserialize(value)
                .map_err(|e| format!("category '{}': {}", name, e))?;
            pairs.push((name, exts));
        }
        Ok(Self::from_raw(pairs))
    }

    /// Parses a TOML table of `category = [extensions]`.
    pub fn parse_toml(text: &str) -> Result<Self, String> {
        let table: toml::Table = toml::from_str(text).map_err(|e| e.to_string())?;
        let mut pairs = Vec::with_capacity(table.len());
        for (name, value) in table {
            let exts = Vec::<RawExtension>::deserialize(value)
                .map_err(|e| format!("category '{}': {}", name, e))?;
            pairs.push((name, exts));
        }
        Ok(Self::from_raw(pairs))
    }

    fn from_raw(pairs: Vec<(String, Vec<RawExtension>)>) -> Self {
        let mut mapping = Self::empty();
        for (name, exts) in pairs {
            // Sorted and deduplicated, like a hand-maintained table.
            let normalized: BTreeSet<String> = exts
                .into_iter()
                .map(|e| normalize_extension(&e.into_string()))
                .collect();
            mapping.add_category(&name, normalized);
        }
        mapping
    }
}

/// Mapping files sometimes list bare numbers (`7z` written as `7`); accept
/// any scalar and stringify it.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawExtension {
    Text(String),
    Integer(i64),
}

impl RawExtension {
    fn into_string(self) -> String {
        match self {
            RawExtension::Text(s) => s,
            RawExtension::Integer(n) => n.to_string(),
        }
    }
}

impl Default for ExtensionMapping {
    fn default() -> Self {
        let mut mapping = Self::empty();
        for (name, exts) in DEFAULT_TABLE {
            mapping.add_category(name, exts.iter());
        }
        mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_categories_in_order() {
        let mapping = ExtensionMapping::default();
        let names: Vec<_> = mapping.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Images",
                "Docs",
                "Audio",
                "Video",
                "Archives",
                "Code",
                "Images.RAW"
            ]
        );
    }

    #[test]
    fn test_category_for_known_extensions() {
        let mapping = ExtensionMapping::default();
        assert_eq!(mapping.category_for("png"), "Images");
        assert_eq!(mapping.category_for("mp3"), "Audio");
        assert_eq!(mapping.category_for("rs"), "Code");
        assert_eq!(mapping.category_for("nef"), "Images.RAW");
    }

    #[test]
    fn test_category_for_ignores_case_and_dots() {
        let mapping = ExtensionMapping::default();
        assert_eq!(mapping.category_for(".JPG"), "Images");
        assert_eq!(mapping.category_for("jpg"), "Images");
        assert_eq!(mapping.category_for(".jpg"), "Images");
        assert_eq!(mapping.category_for("Jpg"), "Images");
    }

    #[test]
    fn test_unknown_extension_falls_back() {
        let mapping = ExtensionMapping::default();
        assert_eq!(mapping.category_for("xyz"), FALLBACK_CATEGORY);
        assert_eq!(mapping.category_for(""), FALLBACK_CATEGORY);
        assert_eq!(mapping.category_for("..."), FALLBACK_CATEGORY);
        assert_eq!(ExtensionMapping::empty().category_for("jpg"), FALLBACK_CATEGORY);
    }

    #[test]
    fn test_first_match_wins_on_duplicates() {
        let mut mapping = ExtensionMapping::empty();
        mapping.add_category("First", ["dup"]);
        mapping.add_category("Second", ["dup", "other"]);
        assert_eq!(mapping.category_for("dup"), "First");
        assert_eq!(mapping.category_for("other"), "Second");
    }

    #[test]
    fn test_category_for_path() {
        let mapping = ExtensionMapping::default();
        assert_eq!(mapping.category_for_path(Path::new("/x/photo.JPEG")), "Images");
        assert_eq!(mapping.category_for_path(Path::new("/x/README")), "Others");
        assert_eq!(mapping.category_for_path(Path::new("archive.tar.gz")), "Archives");
    }

    #[test]
    fn test_parse_json_preserves_order_and_normalizes() {
        let mapping =
            ExtensionMapping::parse_json(r#"{"Zeta": [".ZZ", "zz"], "Alpha": ["aa", 7]}"#)
                .unwrap();
        let names: Vec<_> = mapping.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "Alpha"]);
        assert_eq!(mapping.entries()[0].extensions.len(), 1);
        assert_eq!(mapping.category_for("zz"), "Zeta");
        assert_eq!(mapping.category_for("7"), "Alpha");
    }

    #[test]
    fn test_parse_json_rejects_bad_shape() {
        assert!(ExtensionMapping::parse_json(r#"["jpg"]"#).is_err());
        assert!(ExtensionMapping::parse_json(r#"{"Images": "jpg"}"#).is_err());
        assert!(ExtensionMapping::parse_json("{not json").is_err());
    }

    #[test]
    fn test_parse_toml() {
        let mapping = ExtensionMapping::parse_toml("Books = [\"epub\", \".MOBI\"]\n").unwrap();
        assert_eq!(mapping.category_for("mobi"), "Books");
    }

    #[test]
    fn test_load_mapping_file() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        write!(file, r#"{{"Images": ["jpg"]}}"#).unwrap();
        let mapping = ExtensionMapping::load(file.path()).unwrap();
        assert_eq!(mapping.category_for("jpg"), "Images");
        assert_eq!(mapping.category_for("png"), FALLBACK_CATEGORY);
    }

    #[test]
    fn test_load_missing_file_is_invalid_input() {
        let result = ExtensionMapping::load(Path::new("/non/existent/map.json"));
        assert!(matches!(result, Err(DropsiftError::InvalidInput { .. })));
    }
}
