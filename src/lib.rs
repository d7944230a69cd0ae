//! dropsift - sort the files dropped into a folder by extension.
//!
//! A one-shot run moves every top-level file of the source folder into a
//! category subfolder (`Images/`, `Docs/`, ... or `Others/`). Watch mode does
//! the same for new files as they arrive, waiting until each one has stopped
//! growing. Every committed move is appended to a CSV action log so that it
//! can be undone later.

pub mod action_log;
pub mod cli;
pub mod config;
pub mod destination;
pub mod error;
pub mod file_category;
pub mod file_organizer;
pub mod logging;
pub mod output;
pub mod scan;
pub mod undo;
pub mod watcher;

pub use action_log::{ActionKind, ActionLog, LogRecord};
pub use config::{ConfigError, IgnorePolicy, Settings, WatchTimings};
pub use error::{DropsiftError, DropsiftResult};
pub use file_category::{ExtensionMapping, FALLBACK_CATEGORY};
pub use file_organizer::{MoveOutcome, Mover, OrganizeReport, SkipReason, organize_directory};
pub use undo::{UndoReport, undo};
pub use watcher::{StabilityWatcher, WatchSession};
