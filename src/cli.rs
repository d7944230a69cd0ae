//! Command-line interface.
//!
//! Parses arguments with `clap`, wires the settings, mapping, ignore policy
//! and action log together, then runs one of four modes: batch organize,
//! watch, undo, or the largest-files report.
//!
//! Exit codes: [`EXIT_OK`] on success, [`EXIT_FAILURE`] when some files could
//! not be moved or restored, [`EXIT_USAGE`] for bad arguments or missing
//! prerequisites.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::action_log::ActionLog;
use crate::config::{IgnorePolicy, Settings};
use crate::error::{DropsiftError, DropsiftResult};
use crate::file_category::ExtensionMapping;
use crate::file_organizer::{MoveOutcome, Mover, SkipReason, organize_directory, scan_files};
use crate::output::OutputFormatter;
use crate::scan;
use crate::undo::undo;
use crate::watcher::{NotifyEventSource, SettledFileHandler, StabilityWatcher, WatchSession};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

/// Sort the files of a folder into category subfolders by extension.
#[derive(Parser, Debug, Clone)]
#[command(name = "dropsift", version, about)]
pub struct Cli {
    /// Source folder (e.g. ~/Downloads)
    #[arg(long, value_name = "DIR")]
    pub src: PathBuf,

    /// Mapping file (JSON or TOML): category -> [extensions]
    #[arg(long, value_name = "FILE")]
    pub map: Option<PathBuf>,

    /// Settings file (TOML) with watch timings and ignore rules
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Show what would be moved without touching any file
    #[arg(long)]
    pub dry_run: bool,

    /// CSV log recording every move (required for --undo)
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Keep running and organize new files once they stop changing
    #[arg(long, conflicts_with_all = ["undo", "largest"])]
    pub watch: bool,

    /// In watch mode, also watch subfolders
    #[arg(long, requires = "watch")]
    pub recursive: bool,

    /// Undo previous moves using the log
    #[arg(long, conflicts_with = "largest")]
    pub undo: bool,

    /// Maximum number of moves to revert
    #[arg(long, value_name = "N", requires = "undo")]
    pub undo_limit: Option<usize>,

    /// Extra extension to ignore (repeatable, e.g. --ignore-ext .download)
    #[arg(long = "ignore-ext", value_name = "EXT")]
    pub ignore_ext: Vec<String>,

    /// List the N largest files under the source folder instead of organizing
    #[arg(long, value_name = "N")]
    pub largest: Option<usize>,
}

/// Runs the command and returns the process exit code.
pub fn run(cli: Cli) -> i32 {
    match execute(&cli) {
        Ok(code) => code,
        Err(e) => {
            OutputFormatter::error(&e.to_string());
            if e.is_usage_error() {
                EXIT_USAGE
            } else {
                EXIT_FAILURE
            }
        }
    }
}

fn execute(cli: &Cli) -> DropsiftResult<i32> {
    if cli.undo {
        let Some(log_file) = &cli.log_file else {
            return Err(DropsiftError::invalid_input("--undo requires --log-file"));
        };
        return undo_moves(&absolute_path(log_file)?, cli.undo_limit, cli.verbose);
    }

    let source = cli.src.canonicalize().map_err(|_| {
        DropsiftError::invalid_input(format!("folder does not exist: {}", cli.src.display()))
    })?;

    if let Some(top_n) = cli.largest {
        return largest(&source, top_n);
    }

    let settings = Settings::load(cli.config.as_deref())?;
    let mapping = match &cli.map {
        Some(path) => ExtensionMapping::load(path)?,
        None => ExtensionMapping::default(),
    };

    let mut ignore = IgnorePolicy::compile(&settings.ignore)?.with_extensions(&cli.ignore_ext);
    let log_path = cli.log_file.as_deref().map(absolute_path).transpose()?;
    if let Some(path) = &log_path {
        ignore = ignore.protect(path);
    }

    let mut mover = Mover::new(&source, mapping, ignore)?.with_dry_run(cli.dry_run);
    // A dry run records nothing, so the log is not even created.
    if let Some(path) = &log_path
        && !cli.dry_run
    {
        mover = mover.with_log(ActionLog::open(path)?);
    }

    if cli.watch {
        let recursive = cli.recursive || settings.watch.recursive;
        watch(mover, &settings, recursive, cli.verbose)
    } else {
        organize(&mover, cli.verbose)
    }
}

/// Resolves `path` to an absolute path; the file itself need not exist yet.
fn absolute_path(path: &Path) -> DropsiftResult<PathBuf> {
    if let Ok(resolved) = path.canonicalize() {
        return Ok(resolved);
    }

    let file_name = path.file_name().ok_or_else(|| {
        DropsiftError::invalid_input(format!("not a file path: {}", path.display()))
    })?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let parent = parent.canonicalize().map_err(|_| {
        DropsiftError::invalid_input(format!("folder does not exist: {}", parent.display()))
    })?;
    Ok(parent.join(file_name))
}

fn organize(mover: &Mover, verbose: bool) -> DropsiftResult<i32> {
    let base = mover.source_dir();
    if mover.is_dry_run() {
        OutputFormatter::dry_run_notice(&format!("Analyzing contents of: {}", base.display()));
    } else {
        OutputFormatter::info(&format!("Organizing contents of: {}", base.display()));
    }

    let total = scan_files(base)?.len();
    if total == 0 {
        OutputFormatter::plain("No files found to organize.");
        return Ok(EXIT_OK);
    }

    let progress = (!verbose).then(|| OutputFormatter::create_progress_bar(total as u64));
    let report = organize_directory(mover, |outcome| match &progress {
        Some(pb) => pb.inc(1),
        None => OutputFormatter::move_outcome(outcome, base),
    })?;
    if let Some(pb) = progress {
        pb.finish_and_clear();
        for failure in &report.failed {
            OutputFormatter::error(&failure.to_string());
        }
    }

    OutputFormatter::summary_table(&report.category_counts(), report.moved_count());

    let skipped: Vec<String> = [
        SkipReason::Ignored,
        SkipReason::AlreadyPlaced,
        SkipReason::Vanished,
    ]
    .into_iter()
    .filter_map(|reason| match report.skipped_count(reason) {
        0 => None,
        n => Some(format!("{} {}", n, reason)),
    })
    .collect();
    if !skipped.is_empty() {
        OutputFormatter::plain(&format!("Skipped: {}", skipped.join(", ")));
    }

    if mover.is_dry_run() {
        OutputFormatter::dry_run_notice("Dry run complete. No files were modified.");
    }

    if report.failed.is_empty() {
        Ok(EXIT_OK)
    } else {
        OutputFormatter::warning(&format!(
            "{} file(s) could not be organized. Please review errors above.",
            report.failed.len()
        ));
        Ok(EXIT_FAILURE)
    }
}

/// Runs the mover on settled files and tells the user about it.
struct ReportingHandler {
    mover: Mover,
    verbose: bool,
}

impl SettledFileHandler for ReportingHandler {
    fn on_settled(&self, path: &Path) {
        let outcome = self.mover.move_one(path);
        if self.verbose || !matches!(outcome, MoveOutcome::Skipped { .. }) {
            OutputFormatter::move_outcome(&outcome, self.mover.source_dir());
        }
    }
}

fn watch(mover: Mover, settings: &Settings, recursive: bool, verbose: bool) -> DropsiftResult<i32> {
    let source = mover.source_dir().to_path_buf();
    if mover.is_dry_run() {
        OutputFormatter::dry_run_notice("Watching without moving any file.");
    }

    let handler = Arc::new(ReportingHandler { mover, verbose });
    let watcher = StabilityWatcher::new(settings.watch.timings(), handler);
    debug!("Watch timings: {:?}", watcher.timings());

    let session = WatchSession::start(&source, recursive, watcher, NotifyEventSource::new())?;
    OutputFormatter::info(&format!(
        "Watching {} (recursive={}). Press Ctrl+C to stop.",
        source.display(),
        recursive
    ));

    let signal = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .and_then(|runtime| runtime.block_on(tokio::signal::ctrl_c()));

    OutputFormatter::plain("Stopping watcher...");
    session.stop();

    signal.map_err(|e| DropsiftError::io(&source, e))?;
    Ok(EXIT_OK)
}

fn undo_moves(log_path: &Path, limit: Option<usize>, verbose: bool) -> DropsiftResult<i32> {
    OutputFormatter::info(&format!("Undoing moves recorded in {}", log_path.display()));
    let report = undo(log_path, limit)?;

    if verbose {
        for reversal in &report.reverted {
            OutputFormatter::success(&format!(
                "restored: {}  ->  {}",
                reversal.from.display(),
                reversal.to.display()
            ));
        }
    }
    for missing in &report.missing {
        OutputFormatter::warning(&format!("missing, not restored: {}", missing.display()));
    }
    for (path, reason) in &report.failed {
        OutputFormatter::error(&format!("{}: {}", path.display(), reason));
    }

    OutputFormatter::success(&format!("Reverted {} move(s).", report.reverted_count()));
    if report.failed.is_empty() {
        Ok(EXIT_OK)
    } else {
        Ok(EXIT_FAILURE)
    }
}

fn largest(root: &Path, top_n: usize) -> DropsiftResult<i32> {
    let progress = OutputFormatter::create_progress_bar(scan::count_files(root) as u64);
    let files = scan::largest_files(root, top_n, || progress.inc(1))?;
    progress.finish_and_clear();

    OutputFormatter::header(&format!("Largest files under {}", root.display()));
    if files.is_empty() {
        OutputFormatter::plain("No files found.");
    }
    for (rank, file) in files.iter().enumerate() {
        OutputFormatter::plain(&format!(
            "{:>3}. {:>12}  {}",
            rank + 1,
            scan::human_size(file.size),
            file.path.display()
        ));
    }
    Ok(EXIT_OK)
}
