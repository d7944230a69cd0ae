/// Moving files into their category directories.
///
/// [`Mover`] handles a single file: it classifies it, picks a free
/// destination inside `<source>/<Category>/`, performs (or simulates) the
/// move and records it in the action log. [`organize_directory`] runs the
/// mover over the top-level files of the source directory.
///
/// Per-file problems come back as a [`MoveOutcome`] rather than an error, so
/// a file that vanished or could not be moved never stops its siblings.
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::action_log::{ActionLog, LogRecord};
use crate::config::IgnorePolicy;
use crate::destination;
use crate::error::{DropsiftError, DropsiftResult};
use crate::file_category::ExtensionMapping;

/// Why a file was left where it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SkipReason {
    /// The path no longer exists or is not a regular file.
    Vanished,
    /// The ignore policy excludes the file.
    Ignored,
    /// The file already sits in its category directory.
    AlreadyPlaced,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Vanished => "vanished",
            SkipReason::Ignored => "ignored",
            SkipReason::AlreadyPlaced => "already-placed",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A move that could not be carried out or recorded.
#[derive(Error, Debug)]
pub enum MoveFailure {
    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to move {} to {}: {source}", from.display(), to.display())]
    Relocate {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The log cannot represent this move, so the file was left in place.
    #[error("Cannot record a move of {}: {source}", path.display())]
    Unrecordable {
        path: PathBuf,
        #[source]
        source: DropsiftError,
    },

    /// The file was moved but the log row could not be written, so this
    /// move cannot be undone from the log.
    #[error("Moved {} to {} but could not record it: {source}", from.display(), to.display())]
    Unrecorded {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: DropsiftError,
    },
}

impl MoveFailure {
    /// The file the failed move was about.
    pub fn path(&self) -> &Path {
        match self {
            MoveFailure::CreateDir { path, .. } | MoveFailure::Unrecordable { path, .. } => path,
            MoveFailure::Relocate { from, .. } | MoveFailure::Unrecorded { from, .. } => from,
        }
    }
}

/// A single relocation: where a file came from and where it lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveAction {
    pub source: PathBuf,
    pub destination_dir: PathBuf,
    pub destination: PathBuf,
}

/// Result of running the mover on one file.
#[derive(Debug)]
pub enum MoveOutcome {
    /// The file was moved, or would have been in a dry run.
    Moved {
        action: MoveAction,
        category: String,
        /// True in dry-run mode: nothing on disk changed.
        simulated: bool,
    },
    Skipped {
        path: PathBuf,
        reason: SkipReason,
    },
    Failed(MoveFailure),
}

impl MoveOutcome {
    /// Whether the file was (or would have been) moved.
    pub fn moved(&self) -> bool {
        matches!(self, MoveOutcome::Moved { .. })
    }

    /// Short machine-readable reason, e.g. `already-placed` or `move-failed`.
    pub fn reason(&self) -> &'static str {
        match self {
            MoveOutcome::Moved { .. } => "moved",
            MoveOutcome::Skipped { reason, .. } => reason.as_str(),
            MoveOutcome::Failed(_) => "move-failed",
        }
    }
}

/// Classifies and relocates single files inside a source directory.
#[derive(Debug)]
pub struct Mover {
    source_dir: PathBuf,
    mapping: ExtensionMapping,
    ignore: IgnorePolicy,
    dry_run: bool,
    log: Option<ActionLog>,
}

impl Mover {
    /// Creates a mover for `source_dir`.
    ///
    /// Fails with [`DropsiftError::InvalidInput`] if the directory does not
    /// exist, before anything is touched.
    pub fn new(
        source_dir: &Path,
        mapping: ExtensionMapping,
        ignore: IgnorePolicy,
    ) -> DropsiftResult<Self> {
        if !source_dir.is_dir() {
            return Err(DropsiftError::invalid_input(format!(
                "folder does not exist: {}",
                source_dir.display()
            )));
        }

        Ok(Self {
            source_dir: source_dir.to_path_buf(),
            mapping,
            ignore,
            dry_run: false,
            log: None,
        })
    }

    /// Simulate moves instead of performing them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Record committed moves in `log`. The log file itself is never moved.
    pub fn with_log(mut self, log: ActionLog) -> Self {
        self.ignore = self.ignore.protect(log.path());
        self.log = Some(log);
        self
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Moves one file into its category directory.
    ///
    /// Checks, in order: the path is still a regular file, the ignore policy
    /// does not exclude it, and it is not already in its category directory.
    /// In dry-run mode the destination is computed but the filesystem is left
    /// untouched. Otherwise the log row is encoded before anything changes on
    /// disk, and written after the move and before this returns.
    pub fn move_one(&self, file_path: &Path) -> MoveOutcome {
        let skipped = |reason| MoveOutcome::Skipped {
            path: file_path.to_path_buf(),
            reason,
        };

        match fs::metadata(file_path) {
            Ok(meta) if meta.is_file() => {}
            _ => {
                debug!("Skipping {}: vanished", file_path.display());
                return skipped(SkipReason::Vanished);
            }
        }

        if self.ignore.is_ignored(file_path) {
            debug!("Skipping {}: ignored", file_path.display());
            return skipped(SkipReason::Ignored);
        }

        let category = self.mapping.category_for_path(file_path).to_string();
        let target_dir = self.source_dir.join(&category);

        if file_path.parent() == Some(target_dir.as_path()) {
            debug!("Skipping {}: already in {}", file_path.display(), category);
            return skipped(SkipReason::AlreadyPlaced);
        }

        let Some(file_name) = file_path.file_name() else {
            return skipped(SkipReason::Vanished);
        };

        let destination = destination::resolve(&target_dir.join(file_name));
        let action = MoveAction {
            source: file_path.to_path_buf(),
            destination_dir: target_dir,
            destination,
        };

        if self.dry_run {
            info!(
                "[dry-run] would move {} -> {}",
                action.source.display(),
                action.destination.display()
            );
            return MoveOutcome::Moved {
                action,
                category,
                simulated: true,
            };
        }

        // Encode the log row first: a move that cannot be recorded must not happen.
        let row = match &self.log {
            Some(log) => {
                let record = LogRecord::moved(&action.source, &action.destination);
                match log.prepare(&record) {
                    Ok(row) => Some((log, row)),
                    Err(source) => {
                        return self.failed(MoveFailure::Unrecordable {
                            path: action.source,
                            source,
                        });
                    }
                }
            }
            None => None,
        };

        if let Err(source) = fs::create_dir_all(&action.destination_dir) {
            return self.failed(MoveFailure::CreateDir {
                path: action.destination_dir,
                source,
            });
        }

        if let Err(source) = relocate(&action.source, &action.destination) {
            return self.failed(MoveFailure::Relocate {
                from: action.source,
                to: action.destination,
                source,
            });
        }

        if let Some((log, row)) = &row
            && let Err(source) = log.commit(row)
        {
            return self.failed(MoveFailure::Unrecorded {
                from: action.source,
                to: action.destination,
                source,
            });
        }

        info!(
            "Moved {} -> {}",
            action.source.display(),
            action.destination.display()
        );
        MoveOutcome::Moved {
            action,
            category,
            simulated: false,
        }
    }

    fn failed(&self, failure: MoveFailure) -> MoveOutcome {
        warn!("{}", failure);
        MoveOutcome::Failed(failure)
    }
}

/// Renames `from` to `to`, copying across filesystems when a rename cannot.
pub(crate) fn relocate(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(from, to)?;
            if let Err(e) = fs::remove_file(from) {
                let _ = fs::remove_file(to);
                return Err(e);
            }
            Ok(())
        }
        other => other,
    }
}

/// Summary of a batch run.
#[derive(Debug, Default)]
pub struct OrganizeReport {
    /// Files moved (or simulated), with their category.
    pub moved: Vec<(MoveAction, String)>,
    pub skipped: Vec<(PathBuf, SkipReason)>,
    pub failed: Vec<MoveFailure>,
}

impl OrganizeReport {
    fn record(&mut self, outcome: MoveOutcome) {
        match outcome {
            MoveOutcome::Moved {
                action, category, ..
            } => self.moved.push((action, category)),
            MoveOutcome::Skipped { path, reason } => self.skipped.push((path, reason)),
            MoveOutcome::Failed(failure) => self.failed.push(failure),
        }
    }

    pub fn moved_count(&self) -> usize {
        self.moved.len()
    }

    /// Number of moved files per category, sorted by category name.
    pub fn category_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for (_, category) in &self.moved {
            *counts.entry(category.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn skipped_count(&self, reason: SkipReason) -> usize {
        self.skipped.iter().filter(|(_, r)| *r == reason).count()
    }
}

/// Lists the regular files directly inside `dir`, sorted by path.
pub fn scan_files(dir: &Path) -> DropsiftResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| DropsiftError::io(dir, e))?;

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Runs the mover over every top-level file of its source directory.
///
/// `on_outcome` is called after each file, for progress reporting.
pub fn organize_directory<F>(mover: &Mover, mut on_outcome: F) -> DropsiftResult<OrganizeReport>
where
    F: FnMut(&MoveOutcome),
{
    let files = scan_files(mover.source_dir())?;
    debug!(
        "Found {} files in {}",
        files.len(),
        mover.source_dir().display()
    );

    let mut report = OrganizeReport::default();
    for file in &files {
        let outcome = mover.move_one(file);
        on_outcome(&outcome);
        report.record(outcome);
    }
    Ok(report)
}
