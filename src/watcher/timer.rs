//! Re-armable debounce timer backed by one long-lived thread.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::io;
use std::thread;
use std::time::{Duration, Instant};

enum Command {
    Arm { deadline: Instant, generation: u64 },
    Cancel,
}

/// A timer whose thread waits for the latest deadline and then runs a callback.
///
/// Each [`arm`](Self::arm) replaces the previous deadline, so at most one
/// fire is outstanding. The callback receives the generation it was armed
/// with and runs on the timer thread; commands sent meanwhile are handled
/// once it returns. Dropping the timer ends the thread. A deadline that has
/// already passed is committed to fire, so callers that must reject a late
/// fire check the generation inside the callback.
#[derive(Debug)]
pub struct DebounceTimer {
    commands: Sender<Command>,
}

impl DebounceTimer {
    /// Starts the timer thread. Nothing fires until the timer is armed.
    pub fn spawn<F>(callback: F) -> io::Result<Self>
    where
        F: FnMut(u64) + Send + 'static,
    {
        let (commands, received) = unbounded();

        thread::Builder::new()
            .name("dropsift-debounce".to_string())
            .spawn(move || run(received, callback))?;

        Ok(Self { commands })
    }

    /// Schedules a fire after `delay`, replacing any earlier deadline.
    ///
    /// Returns false if the timer thread has exited.
    pub fn arm(&self, delay: Duration, generation: u64) -> bool {
        let deadline = Instant::now() + delay;
        self.commands
            .send(Command::Arm {
                deadline,
                generation,
            })
            .is_ok()
    }

    /// Forgets the pending deadline, if any.
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel);
    }
}

fn run<F: FnMut(u64)>(commands: Receiver<Command>, mut callback: F) {
    let mut armed: Option<(Instant, u64)> = None;
    loop {
        let command = match armed {
            None => match commands.recv() {
                Ok(command) => command,
                Err(_) => return,
            },
            Some((deadline, generation)) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                match commands.recv_timeout(wait) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => {
                        armed = None;
                        callback(generation);
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        };

        armed = match command {
            Command::Arm {
                deadline,
                generation,
            } => Some((deadline, generation)),
            Command::Cancel => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::thread::ThreadId;

    fn recording_timer() -> (DebounceTimer, Arc<Mutex<Vec<u64>>>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&fired);
        let timer = DebounceTimer::spawn(move |generation| log.lock().push(generation)).unwrap();
        (timer, fired)
    }

    #[test]
    fn test_fires_after_delay() {
        let (timer, fired) = recording_timer();
        assert!(timer.arm(Duration::from_millis(20), 7));

        thread::sleep(Duration::from_millis(300));
        assert_eq!(*fired.lock(), vec![7]);
    }

    #[test]
    fn test_nothing_fires_until_armed() {
        let (_timer, fired) = recording_timer();
        thread::sleep(Duration::from_millis(100));
        assert!(fired.lock().is_empty());
    }

    #[test]
    fn test_rearm_replaces_earlier_deadline() {
        let (timer, fired) = recording_timer();
        timer.arm(Duration::from_millis(150), 1);
        thread::sleep(Duration::from_millis(50));
        timer.arm(Duration::from_millis(150), 2);

        // The first deadline has passed but was superseded.
        thread::sleep(Duration::from_millis(130));
        assert!(fired.lock().is_empty());

        thread::sleep(Duration::from_millis(300));
        assert_eq!(*fired.lock(), vec![2]);
    }

    #[test]
    fn test_cancel_prevents_fire() {
        let (timer, fired) = recording_timer();
        timer.arm(Duration::from_millis(200), 1);
        timer.cancel();

        thread::sleep(Duration::from_millis(400));
        assert!(fired.lock().is_empty());
    }

    #[test]
    fn test_drop_prevents_fire() {
        let (timer, fired) = recording_timer();
        timer.arm(Duration::from_millis(200), 1);
        drop(timer);

        thread::sleep(Duration::from_millis(400));
        assert!(fired.lock().is_empty());
    }

    #[test]
    fn test_every_fire_runs_on_the_same_thread() {
        let threads: Arc<Mutex<Vec<ThreadId>>> = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&threads);
        let timer = DebounceTimer::spawn(move |_| log.lock().push(thread::current().id())).unwrap();

        for generation in 0..5 {
            for _ in 0..20 {
                timer.arm(Duration::from_millis(10), generation);
            }
            thread::sleep(Duration::from_millis(100));
        }

        let threads = threads.lock();
        assert_eq!(threads.len(), 5);
        assert!(threads.iter().all(|id| *id == threads[0]));
        assert_ne!(threads[0], thread::current().id());
    }
}
