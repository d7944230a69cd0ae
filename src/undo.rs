/// Reverting moves recorded in the action log.
///
/// Records are replayed most recent first. Later moves may have landed where
/// an earlier reversal would otherwise collide, so the order matters. Each
/// file goes back to its original directory under its original name, or a
/// disambiguated one if that name has since been taken.
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::action_log::{ActionKind, ActionLog};
use crate::destination;
use crate::error::DropsiftResult;
use crate::file_organizer::relocate;

/// A file put back by undo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reversal {
    /// Where the file was found (the recorded destination).
    pub from: PathBuf,
    /// Where it was restored to.
    pub to: PathBuf,
}

/// What an undo run did.
#[derive(Debug, Default)]
pub struct UndoReport {
    pub reverted: Vec<Reversal>,
    /// Recorded destinations that no longer exist.
    pub missing: Vec<PathBuf>,
    /// Files that exist but could not be moved back.
    pub failed: Vec<(PathBuf, String)>,
}

impl UndoReport {
    /// Number of files restored.
    pub fn reverted_count(&self) -> usize {
        self.reverted.len()
    }

    /// Returns true if nothing was skipped or failed.
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty() && self.missing.is_empty()
    }
}

/// Undoes recorded moves, newest first.
///
/// At most `limit` files are reverted when a limit is given; records whose
/// file has gone missing do not count towards it. The log itself is left
/// unchanged.
///
/// # Errors
///
/// Returns [`crate::DropsiftError::LogUnavailable`] when the log file does not
/// exist. Per-file problems are collected in the report instead.
///
/// # Examples
///
/// ```no_run
/// use dropsift::undo::undo;
/// use std::path::Path;
///
/// let report = undo(Path::new("/home/me/Downloads/moves.csv"), Some(10))?;
/// println!("Reverted {} files", report.reverted_count());
/// # Ok::<(), dropsift::DropsiftError>(())
/// ```
pub fn undo(log_path: &Path, limit: Option<usize>) -> DropsiftResult<UndoReport> {
    let records = ActionLog::read_all(log_path)?;
    let mut report = UndoReport::default();

    for record in records
        .iter()
        .rev()
        .filter(|r| r.action == ActionKind::Move)
    {
        if limit.is_some_and(|limit| report.reverted.len() >= limit) {
            break;
        }

        if record.dst.symlink_metadata().is_err() {
            debug!("Missing moved file, skipping: {}", record.dst.display());
            report.missing.push(record.dst.clone());
            continue;
        }

        match restore(&record.dst, &record.src) {
            Ok(to) => {
                info!("Undone: {} -> {}", record.dst.display(), to.display());
                report.reverted.push(Reversal {
                    from: record.dst.clone(),
                    to,
                });
            }
            Err(reason) => {
                warn!("Could not restore {}: {}", record.dst.display(), reason);
                report.failed.push((record.dst.clone(), reason));
            }
        }
    }

    Ok(report)
}

/// Moves `current` back to a free path at `original`.
fn restore(current: &Path, original: &Path) -> Result<PathBuf, String> {
    let target = destination::resolve(original);

    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Could not create {}: {}", parent.display(), e))?;
    }

    relocate(current, &target).map_err(|e| format!("Failed to restore file: {}", e))?;
    Ok(target)
}
