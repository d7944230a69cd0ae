//! Filesystem event sources.
//!
//! The watcher only needs a stream of "something happened to this path"
//! notifications. [`EventSource`] is the seam: production code uses
//! [`NotifyEventSource`], tests drive an [`EventSink`] directly.

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::DropsiftResult;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Created,
    Modified,
    /// A rename finished; the path is the new name.
    Moved,
}

/// A raw filesystem notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
    pub is_directory: bool,
}

impl FsEvent {
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            is_directory: false,
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(FsEventKind::Created, path)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(FsEventKind::Modified, path)
    }

    pub fn moved(path: impl Into<PathBuf>) -> Self {
        Self::new(FsEventKind::Moved, path)
    }

    pub fn directory(mut self) -> Self {
        self.is_directory = true;
        self
    }

    /// Translates a `notify` event.
    ///
    /// Creations, content or metadata changes and completed renames are
    /// kept; removals, accesses and the "from" half of a rename are not.
    pub fn from_notify(event: &Event) -> Vec<FsEvent> {
        let (kind, folder_hint, paths): (FsEventKind, bool, &[PathBuf]) = match event.kind {
            EventKind::Create(create) => (
                FsEventKind::Created,
                create == CreateKind::Folder,
                event.paths.as_slice(),
            ),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => return Vec::new(),
            // [from, to]: only the destination matters
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => (
                FsEventKind::Moved,
                false,
                event.paths.last().map(std::slice::from_ref).unwrap_or(&[]),
            ),
            EventKind::Modify(ModifyKind::Name(_)) => {
                (FsEventKind::Moved, false, event.paths.as_slice())
            }
            EventKind::Modify(_) => (FsEventKind::Modified, false, event.paths.as_slice()),
            _ => return Vec::new(),
        };

        paths
            .iter()
            .map(|path| FsEvent {
                kind,
                path: path.clone(),
                is_directory: folder_hint || path.is_dir(),
            })
            .collect()
    }
}

/// Receiver of filesystem events.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: FsEvent);
}

/// Something that delivers filesystem events for a directory.
pub trait EventSource {
    /// Starts delivering events under `root` to `sink`.
    fn start(
        &mut self,
        root: &Path,
        recursive: bool,
        sink: Arc<dyn EventSink>,
    ) -> DropsiftResult<()>;

    /// Stops delivering events. No event reaches the sink afterwards.
    fn stop(&mut self);
}

/// Event source backed by the platform's native watcher.
#[derive(Default)]
pub struct NotifyEventSource {
    watcher: Option<RecommendedWatcher>,
}

impl NotifyEventSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSource for NotifyEventSource {
    fn start(
        &mut self,
        root: &Path,
        recursive: bool,
        sink: Arc<dyn EventSink>,
    ) -> DropsiftResult<()> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for fs_event in FsEvent::from_notify(&event) {
                    sink.on_event(fs_event);
                }
            }
            Err(e) => error!("Watch error: {}", e),
        })?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(root, mode)?;
        debug!("Started watching {} ({:?})", root.display(), mode);

        self.watcher = Some(watcher);
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the native watcher ends its event thread.
        self.watcher = None;
    }
}
