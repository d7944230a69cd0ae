//! Watch mode: turning a noisy event stream into settled-file moves.
//!
//! Every event for a file puts its path in a pending set and re-arms one
//! shared debounce timer. When the timer finally fires (no event on any path
//! for the whole window) the pending set is drained as one batch. After a
//! short settle delay each file's size is read twice, a probe interval apart.
//! Files whose size changed go back to pending and re-arm the timer. Files
//! that vanished are dropped. The rest are handed to the
//! [`SettledFileHandler`], normally the [`Mover`].
//!
//! The pending set, timer handle and stop flag share one lock. Size probes
//! and moves run outside it, on the timer's single thread, so ingestion never
//! waits on disk I/O and flushes never overlap.
//!
//! Size equality over a short interval is a heuristic: a writer that pauses
//! longer than the probe interval will be seen as finished. Partial-download
//! extensions are excluded by the ignore policy for that reason.

pub mod source;
pub mod timer;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use crate::config::WatchTimings;
use crate::error::DropsiftResult;
use crate::file_organizer::Mover;

pub use source::{EventSink, EventSource, FsEvent, FsEventKind, NotifyEventSource};
pub use timer::DebounceTimer;

/// Reads the current size of a file.
pub trait SizeProbe: Send + Sync {
    fn size(&self, path: &Path) -> io::Result<u64>;
}

/// Size probe backed by file metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSizeProbe;

impl SizeProbe for FsSizeProbe {
    fn size(&self, path: &Path) -> io::Result<u64> {
        fs::metadata(path).map(|meta| meta.len())
    }
}

/// Receives files that have stopped changing.
pub trait SettledFileHandler: Send + Sync {
    fn on_settled(&self, path: &Path);
}

impl SettledFileHandler for Mover {
    fn on_settled(&self, path: &Path) {
        self.move_one(path);
    }
}

/// Counters describing what the watcher has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    /// Batches drained by a timer fire.
    pub flush_cycles: u64,
    /// Files handed to the handler.
    pub settled: u64,
    /// Files put back to pending because their size changed.
    pub requeued: u64,
    /// Files dropped because they could not be read.
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    flush_cycles: AtomicU64,
    settled: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct WatchState {
    pending: HashSet<PathBuf>,
    /// Started on the first arm and dropped on stop.
    timer: Option<DebounceTimer>,
    armed: bool,
    /// Identifies the latest arm; a fire with an older value is stale.
    generation: u64,
    /// Dropped on stop, which wakes every interruptible wait.
    stop_signal: Option<Sender<()>>,
}

impl WatchState {
    fn is_stopped(&self) -> bool {
        self.stop_signal.is_none()
    }
}

struct Inner {
    timings: WatchTimings,
    handler: Arc<dyn SettledFileHandler>,
    probe: Arc<dyn SizeProbe>,
    state: Mutex<WatchState>,
    stopped: Receiver<()>,
    counters: Counters,
}

/// Debouncing, stability-checking front end for a [`SettledFileHandler`].
///
/// Cloning gives another handle to the same watcher.
#[derive(Clone)]
pub struct StabilityWatcher {
    inner: Arc<Inner>,
}

impl StabilityWatcher {
    /// Creates a watcher that probes real file sizes.
    pub fn new(timings: WatchTimings, handler: Arc<dyn SettledFileHandler>) -> Self {
        Self::with_probe(timings, handler, Arc::new(FsSizeProbe))
    }

    /// Creates a watcher with a custom size probe.
    pub fn with_probe(
        timings: WatchTimings,
        handler: Arc<dyn SettledFileHandler>,
        probe: Arc<dyn SizeProbe>,
    ) -> Self {
        let (stop_signal, stopped) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                timings,
                handler,
                probe,
                state: Mutex::new(WatchState {
                    pending: HashSet::new(),
                    timer: None,
                    armed: false,
                    generation: 0,
                    stop_signal: Some(stop_signal),
                }),
                stopped,
                counters: Counters::default(),
            }),
        }
    }

    pub fn timings(&self) -> WatchTimings {
        self.inner.timings
    }

    /// Paths currently waiting for the next flush, sorted.
    pub fn pending_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.inner.state.lock().pending.iter().cloned().collect();
        paths.sort();
        paths
    }

    /// Whether a debounce timer is armed.
    pub fn is_timer_armed(&self) -> bool {
        self.inner.state.lock().armed
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().is_stopped()
    }

    pub fn stats(&self) -> WatcherStats {
        let c = &self.inner.counters;
        WatcherStats {
            flush_cycles: c.flush_cycles.load(Ordering::Relaxed),
            settled: c.settled.load(Ordering::Relaxed),
            requeued: c.requeued.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stops the watcher.
    ///
    /// The armed timer is cancelled and pending paths are forgotten. A flush
    /// in progress stops before its next file; a move already under way
    /// completes. Events arriving afterwards are ignored.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        state.armed = false;
        let dropped = state.pending.len();
        state.pending.clear();
        state.stop_signal = None;
        debug!("Watcher stopped, {} pending paths dropped", dropped);
    }
}

impl EventSink for StabilityWatcher {
    fn on_event(&self, event: FsEvent) {
        self.inner.ingest(event);
    }
}

impl Inner {
    fn ingest(self: &Arc<Self>, event: FsEvent) {
        if event.is_directory {
            trace!("Ignoring directory event: {}", event.path.display());
            return;
        }
        debug!("(event) {:?}: {}", event.kind, event.path.display());

        let mut state = self.state.lock();
        if state.is_stopped() {
            return;
        }
        state.pending.insert(event.path);
        self.arm_timer(&mut state);
    }

    /// Moves the debounce deadline out and supersedes any earlier fire.
    fn arm_timer(self: &Arc<Self>, state: &mut WatchState) {
        state.generation = state.generation.wrapping_add(1);

        if state.timer.is_none() {
            let weak: Weak<Inner> = Arc::downgrade(self);
            let spawned = DebounceTimer::spawn(move |generation| {
                if let Some(inner) = weak.upgrade() {
                    inner.fire(generation);
                }
            });
            match spawned {
                Ok(timer) => state.timer = Some(timer),
                // Paths stay pending; the next event retries.
                Err(e) => {
                    error!("Failed to start debounce timer: {}", e);
                    return;
                }
            }
        }

        let armed = state
            .timer
            .as_ref()
            .is_some_and(|timer| timer.arm(self.timings.debounce, state.generation));
        if !armed {
            // The thread is gone; start a fresh one on the next arm.
            warn!("Debounce timer thread exited, restarting on next event");
            state.timer = None;
        }
        state.armed = armed;
    }

    fn fire(self: &Arc<Self>, generation: u64) {
        let batch: Vec<PathBuf> = {
            let mut state = self.state.lock();
            if state.is_stopped() || state.generation != generation {
                return;
            }
            state.armed = false;
            state.pending.drain().collect()
        };
        self.flush(batch);
    }

    fn flush(self: &Arc<Self>, mut batch: Vec<PathBuf>) {
        if batch.is_empty() {
            return;
        }
        Counters::bump(&self.counters.flush_cycles);
        batch.sort();
        debug!("Evaluating {} pending paths", batch.len());

        if !self.pause(self.timings.settle) {
            return;
        }

        // First probe for the whole batch, one shared wait, then the second.
        let first: Vec<(PathBuf, u64)> = batch
            .into_iter()
            .filter_map(|path| match self.probe.size(&path) {
                Ok(size) => Some((path, size)),
                Err(e) => {
                    self.drop_path(&path, &e);
                    None
                }
            })
            .collect();

        if first.is_empty() || !self.pause(self.timings.probe) {
            return;
        }

        for (path, before) in first {
            if self.state.lock().is_stopped() {
                return;
            }
            match self.probe.size(&path) {
                Err(e) => self.drop_path(&path, &e),
                Ok(after) if after != before => {
                    debug!(
                        "Still being written ({} -> {} bytes): {}",
                        before,
                        after,
                        path.display()
                    );
                    Counters::bump(&self.counters.requeued);
                    self.requeue(path);
                }
                Ok(_) => {
                    Counters::bump(&self.counters.settled);
                    self.handler.on_settled(&path);
                }
            }
        }
    }

    fn requeue(self: &Arc<Self>, path: PathBuf) {
        let mut state = self.state.lock();
        if state.is_stopped() {
            return;
        }
        state.pending.insert(path);
        self.arm_timer(&mut state);
    }

    fn drop_path(&self, path: &Path, cause: &io::Error) {
        debug!("Dropping {}: {}", path.display(), cause);
        Counters::bump(&self.counters.dropped);
    }

    /// Sleeps for `duration` unless stopped first. Returns false if stopped.
    fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.state.lock().is_stopped();
        }
        matches!(
            self.stopped.recv_timeout(duration),
            Err(RecvTimeoutError::Timeout)
        )
    }
}

/// A running watch: an event source feeding a [`StabilityWatcher`].
pub struct WatchSession<S: EventSource> {
    watcher: StabilityWatcher,
    source: S,
}

impl<S: EventSource> WatchSession<S> {
    /// Connects `source` to `watcher` and starts delivering events for `root`.
    pub fn start(
        root: &Path,
        recursive: bool,
        watcher: StabilityWatcher,
        mut source: S,
    ) -> DropsiftResult<Self> {
        let sink: Arc<dyn EventSink> = Arc::new(watcher.clone());
        source.start(root, recursive, sink)?;
        Ok(Self { watcher, source })
    }

    pub fn watcher(&self) -> &StabilityWatcher {
        &self.watcher
    }

    /// Stops the event source, then the watcher.
    pub fn stop(mut self) {
        self.source.stop();
        self.watcher.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::thread;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingHandler {
        settled: Mutex<Vec<PathBuf>>,
    }

    impl RecordingHandler {
        fn settled(&self) -> Vec<PathBuf> {
            let mut paths = self.settled.lock().clone();
            paths.sort();
            paths
        }
    }

    impl SettledFileHandler for RecordingHandler {
        fn on_settled(&self, path: &Path) {
            self.settled.lock().push(path.to_path_buf());
        }
    }

    /// Replays a fixed sequence of sizes per path, repeating the last one.
    /// Unknown paths read as missing.
    #[derive(Default)]
    struct ScriptedProbe {
        sizes: Mutex<HashMap<PathBuf, Vec<u64>>>,
    }

    impl ScriptedProbe {
        fn with(self, path: &str, sizes: &[u64]) -> Self {
            self.sizes.lock().insert(PathBuf::from(path), sizes.to_vec());
            self
        }
    }

    impl SizeProbe for ScriptedProbe {
        fn size(&self, path: &Path) -> io::Result<u64> {
            let mut sizes = self.sizes.lock();
            match sizes.get_mut(path) {
                Some(seq) if seq.len() > 1 => Ok(seq.remove(0)),
                Some(seq) if !seq.is_empty() => Ok(seq[0]),
                _ => Err(io::Error::new(io::ErrorKind::NotFound, "missing")),
            }
        }
    }

    fn timings(debounce_ms: u64) -> WatchTimings {
        WatchTimings {
            debounce: Duration::from_millis(debounce_ms),
            settle: Duration::from_millis(10),
            probe: Duration::from_millis(10),
        }
    }

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    fn watcher_with(
        debounce_ms: u64,
        probe: ScriptedProbe,
    ) -> (StabilityWatcher, Arc<RecordingHandler>) {
        let handler = Arc::new(RecordingHandler::default());
        let watcher = StabilityWatcher::with_probe(
            timings(debounce_ms),
            handler.clone(),
            Arc::new(probe),
        );
        (watcher, handler)
    }

    #[test]
    fn test_burst_is_coalesced_into_one_flush() {
        let probe = ScriptedProbe::default()
            .with("/w/a.jpg", &[5])
            .with("/w/b.pdf", &[7])
            .with("/w/c.zip", &[9]);
        let (watcher, handler) = watcher_with(100, probe);

        watcher.on_event(FsEvent::created("/w/a.jpg"));
        watcher.on_event(FsEvent::modified("/w/a.jpg"));
        watcher.on_event(FsEvent::created("/w/b.pdf"));
        watcher.on_event(FsEvent::moved("/w/c.zip"));
        watcher.on_event(FsEvent::modified("/w/b.pdf"));
        assert_eq!(watcher.pending_paths().len(), 3);
        assert!(watcher.is_timer_armed());

        assert!(wait_until(Duration::from_secs(5), || handler.settled().len() == 3));
        thread::sleep(Duration::from_millis(200));

        assert_eq!(
            handler.settled(),
            vec![
                PathBuf::from("/w/a.jpg"),
                PathBuf::from("/w/b.pdf"),
                PathBuf::from("/w/c.zip")
            ]
        );
        assert_eq!(watcher.stats().flush_cycles, 1);
        assert!(watcher.pending_paths().is_empty());
        assert!(!watcher.is_timer_armed());
    }

    #[test]
    fn test_directory_events_are_dropped() {
        let (watcher, _handler) = watcher_with(100, ScriptedProbe::default());
        watcher.on_event(FsEvent::created("/w/subdir").directory());
        assert!(watcher.pending_paths().is_empty());
        assert!(!watcher.is_timer_armed());
    }

    #[test]
    fn test_new_event_resets_the_window() {
        let probe = ScriptedProbe::default().with("/w/a.jpg", &[1]);
        let (watcher, handler) = watcher_with(600, probe);

        watcher.on_event(FsEvent::created("/w/a.jpg"));
        thread::sleep(Duration::from_millis(300));
        watcher.on_event(FsEvent::modified("/w/a.jpg"));

        // Past the first deadline, before the re-armed one.
        thread::sleep(Duration::from_millis(450));
        assert!(handler.settled().is_empty());
        assert_eq!(watcher.pending_paths(), vec![PathBuf::from("/w/a.jpg")]);

        assert!(wait_until(Duration::from_secs(5), || handler.settled().len() == 1));
        assert_eq!(watcher.stats().flush_cycles, 1);
    }

    #[test]
    fn test_growing_file_is_requeued_then_moved_once() {
        // Cycle one reads 10 then 20; cycle two reads 20 twice.
        let probe = ScriptedProbe::default().with("/w/x.bin", &[10, 20, 20]);
        let (watcher, handler) = watcher_with(100, probe);

        for _ in 0..3 {
            watcher.on_event(FsEvent::created("/w/x.bin"));
            thread::sleep(Duration::from_millis(20));
        }

        assert!(wait_until(Duration::from_secs(5), || handler.settled().len() == 1));
        thread::sleep(Duration::from_millis(300));

        assert_eq!(handler.settled(), vec![PathBuf::from("/w/x.bin")]);
        let stats = watcher.stats();
        assert_eq!(stats.requeued, 1);
        assert_eq!(stats.flush_cycles, 2);
        assert_eq!(stats.settled, 1);
    }

    #[test]
    fn test_unstable_file_not_handled_in_that_cycle() {
        // Keeps growing: never settles.
        let probe = ScriptedProbe::default()
            .with("/w/grow.iso", &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12])
            .with("/w/done.txt", &[3]);
        let (watcher, handler) = watcher_with(50, probe);

        watcher.on_event(FsEvent::created("/w/grow.iso"));
        watcher.on_event(FsEvent::created("/w/done.txt"));

        assert!(wait_until(Duration::from_secs(5), || watcher.stats().requeued >= 2));
        assert_eq!(handler.settled(), vec![PathBuf::from("/w/done.txt")]);
        watcher.stop();
    }

    #[test]
    fn test_vanished_file_is_dropped_silently() {
        let (watcher, handler) = watcher_with(50, ScriptedProbe::default());

        watcher.on_event(FsEvent::created("/w/ghost.jpg"));

        assert!(wait_until(Duration::from_secs(5), || watcher.stats().dropped == 1));
        assert!(handler.settled().is_empty());
        assert!(watcher.pending_paths().is_empty());
        assert!(!watcher.is_timer_armed());
    }

    #[test]
    fn test_stop_drops_pending_paths() {
        let probe = ScriptedProbe::default().with("/w/a.jpg", &[1]);
        let (watcher, handler) = watcher_with(150, probe);

        watcher.on_event(FsEvent::created("/w/a.jpg"));
        watcher.stop();
        thread::sleep(Duration::from_millis(400));

        assert!(watcher.is_stopped());
        assert!(handler.settled().is_empty());
        assert!(watcher.pending_paths().is_empty());
        assert!(!watcher.is_timer_armed());
        assert_eq!(watcher.stats().flush_cycles, 0);

        watcher.on_event(FsEvent::created("/w/a.jpg"));
        assert!(watcher.pending_paths().is_empty());
    }

    #[test]
    fn test_stop_interrupts_settle_delay() {
        let probe = ScriptedProbe::default().with("/w/a.jpg", &[1]);
        let handler = Arc::new(RecordingHandler::default());
        let watcher = StabilityWatcher::with_probe(
            WatchTimings {
                debounce: Duration::from_millis(20),
                settle: Duration::from_secs(2),
                probe: Duration::from_millis(10),
            },
            handler.clone(),
            Arc::new(probe),
        );

        watcher.on_event(FsEvent::created("/w/a.jpg"));
        assert!(wait_until(Duration::from_secs(5), || watcher.stats().flush_cycles == 1));
        watcher.stop();
        thread::sleep(Duration::from_millis(300));

        assert!(handler.settled().is_empty());
    }

    #[test]
    fn test_events_during_flush_start_a_new_cycle() {
        struct SlowHandler {
            inner: RecordingHandler,
        }
        impl SettledFileHandler for SlowHandler {
            fn on_settled(&self, path: &Path) {
                thread::sleep(Duration::from_millis(200));
                self.inner.on_settled(path);
            }
        }

        let probe = ScriptedProbe::default()
            .with("/w/first.jpg", &[1])
            .with("/w/second.jpg", &[2]);
        let handler = Arc::new(SlowHandler {
            inner: RecordingHandler::default(),
        });
        let watcher =
            StabilityWatcher::with_probe(timings(50), handler.clone(), Arc::new(probe));

        watcher.on_event(FsEvent::created("/w/first.jpg"));
        assert!(wait_until(Duration::from_secs(5), || watcher.stats().flush_cycles == 1));
        watcher.on_event(FsEvent::created("/w/second.jpg"));

        assert!(wait_until(Duration::from_secs(5), || handler.inner.settled().len() == 2));
        assert_eq!(watcher.stats().flush_cycles, 2);
    }

    #[test]
    fn test_rearms_reuse_one_timer_thread() {
        #[derive(Default)]
        struct ThreadRecorder {
            threads: Mutex<Vec<thread::ThreadId>>,
        }
        impl SettledFileHandler for ThreadRecorder {
            fn on_settled(&self, _path: &Path) {
                self.threads.lock().push(thread::current().id());
            }
        }

        let mut probe = ScriptedProbe::default();
        for i in 0..3 {
            probe = probe.with(&format!("/w/{}.jpg", i), &[1]);
        }
        let handler = Arc::new(ThreadRecorder::default());
        let watcher =
            StabilityWatcher::with_probe(timings(30), handler.clone(), Arc::new(probe));

        for i in 0..3 {
            // Many re-arms per cycle.
            for _ in 0..50 {
                watcher.on_event(FsEvent::modified(format!("/w/{}.jpg", i)));
            }
            assert!(wait_until(Duration::from_secs(5), || {
                handler.threads.lock().len() == i + 1
            }));
        }

        let threads = handler.threads.lock();
        assert!(threads.iter().all(|id| *id == threads[0]));
        assert_eq!(watcher.stats().flush_cycles, 3);
    }

    #[test]
    fn test_session_routes_source_events() {
        #[derive(Default)]
        struct ManualSource {
            sink: Option<Arc<dyn EventSink>>,
            stopped: bool,
        }
        impl EventSource for ManualSource {
            fn start(
                &mut self,
                _root: &Path,
                _recursive: bool,
                sink: Arc<dyn EventSink>,
            ) -> DropsiftResult<()> {
                self.sink = Some(sink);
                Ok(())
            }
            fn stop(&mut self) {
                self.stopped = true;
            }
        }

        let (watcher, _handler) = watcher_with(1_000, ScriptedProbe::default());
        let session =
            WatchSession::start(Path::new("/w"), false, watcher, ManualSource::default()).unwrap();

        let sink = session.source.sink.clone().unwrap();
        sink.on_event(FsEvent::created("/w/a.jpg"));
        assert_eq!(session.watcher().pending_paths(), vec![PathBuf::from("/w/a.jpg")]);

        let watcher = session.watcher().clone();
        session.stop();
        assert!(watcher.is_stopped());
        assert!(watcher.pending_paths().is_empty());
    }
}
