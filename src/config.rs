//! Run settings and the ignore policy.
//!
//! Settings are read from an optional TOML file. Every key has a default, so
//! an empty file (or no file at all) gives the stock behavior:
//!
//! ```toml
//! [watch]
//! debounce_ms = 2000
//! settle_ms = 500
//! probe_ms = 400
//! recursive = false
//!
//! [ignore]
//! extensions = [".part", ".crdownload", ".tmp"]
//! prefixes = ["~$"]
//! patterns = ["*.partial.*"]
//! regex = []
//! enable_hidden_files = true
//! ```
//!
//! The `[ignore]` table compiles into an [`IgnorePolicy`], which the mover
//! consults before touching a file.

use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Extensions of in-progress downloads and scratch files.
pub const DEFAULT_IGNORE_EXTENSIONS: &[&str] = &[".part", ".crdownload", ".tmp"];

/// Office lock files start with this prefix.
pub const LOCK_FILE_PREFIX: &str = "~$";

/// Errors raised while loading or compiling settings.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid glob pattern '{0}'")]
    InvalidGlobPattern(String),

    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern { pattern: String, reason: String },

    #[error("IO error reading configuration: {0}")]
    Io(String),
}

/// Top-level settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub watch: WatchSettings,

    #[serde(default)]
    pub ignore: IgnoreRules,
}

/// Timing windows and scope of watch mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Idle time after the last event before a batch is evaluated.
    pub debounce_ms: u64,
    /// Pause before the first size probe of a batch.
    pub settle_ms: u64,
    /// Gap between the two size probes.
    pub probe_ms: u64,
    /// Also watch subdirectories of the source directory.
    pub recursive: bool,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            settle_ms: 500,
            probe_ms: 400,
            recursive: false,
        }
    }
}

/// The three fixed windows used by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchTimings {
    pub debounce: Duration,
    pub settle: Duration,
    pub probe: Duration,
}

impl Default for WatchTimings {
    fn default() -> Self {
        WatchSettings::default().timings()
    }
}

impl WatchSettings {
    pub fn timings(&self) -> WatchTimings {
        WatchTimings {
            debounce: Duration::from_millis(self.debounce_ms),
            settle: Duration::from_millis(self.settle_ms),
            probe: Duration::from_millis(self.probe_ms),
        }
    }
}

/// Raw ignore rules as written in the settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreRules {
    /// Extensions never moved, with or without a leading dot.
    pub extensions: Vec<String>,
    /// File name prefixes never moved.
    pub prefixes: Vec<String>,
    /// Glob patterns matched against the file name.
    pub patterns: Vec<String>,
    /// Regular expressions matched against the file name.
    pub regex: Vec<String>,
    /// Whether dotfiles are eligible for moving. Set to false to leave them
    /// in place.
    pub enable_hidden_files: bool,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_IGNORE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            prefixes: vec![LOCK_FILE_PREFIX.to_string()],
            patterns: Vec::new(),
            regex: Vec::new(),
            enable_hidden_files: true,
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file, or returns defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parses settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// Adds a leading dot when missing and lowercases.
pub fn dotted_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

/// Compiled ignore rules.
///
/// A file is ignored when any rule matches; there is no whitelist override.
#[derive(Debug, Clone)]
pub struct IgnorePolicy {
    enable_hidden_files: bool,
    extensions: HashSet<String>,
    prefixes: Vec<String>,
    patterns: Vec<Pattern>,
    regexes: Vec<Regex>,
    protected: HashSet<PathBuf>,
}

impl IgnorePolicy {
    /// Compiles raw rules, validating globs and regexes.
    pub fn compile(rules: &IgnoreRules) -> Result<Self, ConfigError> {
        let patterns = rules
            .patterns
            .iter()
            .map(|p| Pattern::new(p).map_err(|_| ConfigError::InvalidGlobPattern(p.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let regexes = rules
            .regex
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            extensions: rules.extensions.iter().map(|e| dotted_extension(e)).collect(),
            prefixes: rules.prefixes.clone(),
            patterns,
            regexes,
            protected: HashSet::new(),
        })
    }

    /// Adds extra extensions (e.g. from `--ignore-ext`).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions
            .extend(extensions.into_iter().map(|e| dotted_extension(e.as_ref())));
        self
    }

    /// Marks a path that must never be moved, such as the active action log.
    pub fn protect(mut self, path: impl Into<PathBuf>) -> Self {
        self.protected.insert(path.into());
        self
    }

    /// Returns true if the file must be left where it is.
    pub fn is_ignored(&self, file_path: &Path) -> bool {
        if self.protected.contains(file_path) {
            return true;
        }

        let Some(file_name) = file_path.file_name().map(|n| n.to_string_lossy()) else {
            return true;
        };

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return true;
        }

        if self
            .prefixes
            .iter()
            .any(|prefix| file_name.starts_with(prefix.as_str()))
        {
            return true;
        }

        if let Some(ext) = file_path.extension() {
            let dotted = format!(".{}", ext.to_string_lossy().to_lowercase());
            if self.extensions.contains(&dotted) {
                return true;
            }
        }

        if self.patterns.iter().any(|p| p.matches(&file_name)) {
            return true;
        }

        self.regexes.iter().any(|r| r.is_match(&file_name))
    }
}

impl Default for IgnorePolicy {
    fn default() -> Self {
        Self {
            enable_hidden_files: true,
            extensions: DEFAULT_IGNORE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            prefixes: vec![LOCK_FILE_PREFIX.to_string()],
            patterns: Vec::new(),
            regexes: Vec::new(),
            protected: HashSet::new(),
        }
    }
}
