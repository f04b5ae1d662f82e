//! Background polling of the monitor configuration.
//!
//! The [`Watchdog`] takes a snapshot of every monitor on a fixed interval, compares
//! it with the previous one and tells the registered listeners what changed. While
//! it runs, the latest snapshot is also what the query functions of this crate
//! return, so repeated queries do not reach the OS.

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, error, warn};

use crate::{Error, MonitorMap, backend::Backend};

/// Settings of the watchdog.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WatchdogConfig {
    /// Time between two snapshots.
    pub interval: Duration,
    /// How long stopping waits for the background thread to exit.
    pub join_timeout: Duration,
    /// Consecutive failed snapshots after which the failure is logged as an error,
    /// and again every time as many more fail.
    pub failure_threshold: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            join_timeout: Duration::from_secs(2),
            failure_threshold: 10,
        }
    }
}

impl WatchdogConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_join_timeout(mut self, join_timeout: Duration) -> Self {
        self.join_timeout = join_timeout;
        self
    }

    pub fn with_failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold;
        self
    }
}

/// A callback invoked with the names of the affected monitors and the snapshot
/// of every monitor they were found in.
///
/// Listeners are compared by identity: clones of the same `Listener` are equal,
/// two listeners built from identical closures are not.
#[derive(Clone)]
pub struct Listener(Arc<dyn Fn(&[String], &MonitorMap) + Send + Sync + 'static>);

impl Listener {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&[String], &MonitorMap) + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    fn call(&self, names: &[String], monitors: &MonitorMap) {
        if catch_unwind(AssertUnwindSafe(|| (self.0)(names, monitors))).is_err() {
            error!(?names, "monitor listener panicked");
        }
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// What changed between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    /// Monitors that were plugged (listed first) or unplugged.
    pub plugged: SmallVec<[String; 4]>,
    /// Monitors present in both snapshots whose properties differ.
    pub changed: SmallVec<[String; 4]>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.plugged.is_empty() && self.changed.is_empty()
    }
}

/// Remembers the last snapshot and diffs new ones against it.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    previous: MonitorMap,
}

impl ChangeTracker {
    pub fn new(baseline: MonitorMap) -> Self {
        Self { previous: baseline }
    }

    pub fn previous(&self) -> &MonitorMap {
        &self.previous
    }

    /// Replaces the remembered snapshot with `current` and reports the differences.
    pub fn track(&mut self, current: MonitorMap) -> Changes {
        let before = std::mem::replace(&mut self.previous, current);
        let mut changes = Changes::default();

        for (name, after) in &self.previous {
            match before.get(name) {
                Some(before) if before != after => changes.changed.push(name.clone()),
                Some(_) => {}
                None => changes.plugged.push(name.clone()),
            }
        }

        for name in before.keys() {
            if !self.previous.contains_key(name) {
                changes.plugged.push(name.clone());
            }
        }

        changes
    }
}

struct Shared {
    backend: Arc<Backend>,
    interval: Mutex<Duration>,
    plug_listeners: Mutex<Vec<Listener>>,
    change_listeners: Mutex<Vec<Listener>>,
}

impl Shared {
    fn has_listeners(&self) -> bool {
        !self.plug_listeners.lock().is_empty() || !self.change_listeners.lock().is_empty()
    }
}

/// State owned by the polling thread.
struct Poller {
    tracker: ChangeTracker,
    failures: u32,
    failure_threshold: u32,
}

impl Poller {
    /// Takes one snapshot and notifies listeners. A failed snapshot skips the tick
    /// and keeps the previous one.
    fn tick(&mut self, shared: &Shared) -> Option<Changes> {
        let current = match shared.backend.fresh_monitors() {
            Ok(current) => current,
            Err(err) => {
                self.failures += 1;
                if self.failures_are_alarming() {
                    error!(%err, failures = self.failures, "monitor snapshots keep failing");
                } else {
                    warn!(%err, failures = self.failures, "skipping watchdog tick");
                }
                return None;
            }
        };
        self.failures = 0;

        let changes = self.tracker.track(current);
        let monitors = self.tracker.previous();

        if !changes.plugged.is_empty() {
            debug!(names = ?changes.plugged, "monitors plugged or unplugged");
            let listeners = shared.plug_listeners.lock().clone();
            for listener in &listeners {
                listener.call(&changes.plugged, monitors);
            }
        }

        if !changes.changed.is_empty() {
            debug!(names = ?changes.changed, "monitor properties changed");
            let listeners = shared.change_listeners.lock().clone();
            for listener in &listeners {
                listener.call(&changes.changed, monitors);
            }
        }

        Some(changes)
    }

    fn failures_are_alarming(&self) -> bool {
        self.failures % self.failure_threshold.max(1) == 0
    }

    fn run(mut self, shared: Arc<Shared>, stop: Receiver<()>) {
        loop {
            let interval = *shared.interval.lock();
            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }

            self.tick(&shared);
        }

        debug!("watchdog thread exiting");
    }
}

struct Worker {
    stop: Sender<()>,
    exiting: Exiting,
}

/// The polling thread, seen from the side that waits for it to exit.
struct Exiting {
    done: Receiver<()>,
    thread: JoinHandle<()>,
}

impl Exiting {
    /// Waits up to `timeout` for the thread to exit. Hands itself back if the
    /// thread is still running.
    fn join(self, timeout: Duration) -> Result<(), Self> {
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => Err(self),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.thread.join().is_err() {
                    error!("watchdog thread panicked");
                }
                Ok(())
            }
        }
    }

    fn is_current(&self) -> bool {
        self.thread.thread().id() == thread::current().id()
    }
}

#[derive(Default)]
struct Control {
    update_requested: bool,
    worker: Option<Worker>,
    /// A thread told to stop that did not exit within the join timeout. No new
    /// thread starts until it is gone.
    stopping: Option<Exiting>,
}

/// The background thread that keeps monitor information up to date and notifies
/// listeners about changes.
///
/// The thread runs while update caching is enabled or at least one listener is
/// registered, and stops once neither holds. Normally there is one watchdog per
/// process, owned by the [`DisplayManager`](crate::DisplayManager).
pub struct Watchdog {
    shared: Arc<Shared>,
    control: Mutex<Control>,
    join_timeout: Duration,
    failure_threshold: u32,
}

impl Watchdog {
    pub(crate) fn new(backend: Arc<Backend>, config: WatchdogConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                interval: Mutex::new(config.interval),
                plug_listeners: Mutex::new(Vec::new()),
                change_listeners: Mutex::new(Vec::new()),
            }),
            control: Mutex::new(Control::default()),
            join_timeout: config.join_timeout,
            failure_threshold: config.failure_threshold,
        }
    }

    /// Enables update caching and registers the given listeners.
    ///
    /// Starts the background thread if it is not running yet; calling this again
    /// never starts a second one.
    ///
    /// # Errors
    /// Returns [`Error`] if the first snapshot can not be taken or the thread can
    /// not be spawned. Returns [`Error::WatchdogJoinTimeout`] while a previously
    /// stopped thread is still running.
    pub fn enable(
        &self,
        interval: Option<Duration>,
        on_count_changed: Option<Listener>,
        on_props_changed: Option<Listener>,
    ) -> Result<(), Error> {
        if let Some(interval) = interval {
            self.update_interval(interval);
        }

        let mut control = self.control.lock();
        control.update_requested = true;
        if let Some(listener) = on_count_changed {
            push_unique(&self.shared.plug_listeners, listener);
        }
        if let Some(listener) = on_props_changed {
            push_unique(&self.shared.change_listeners, listener);
        }

        self.start(&mut control)
    }

    /// Disables update caching. The thread keeps running while listeners remain.
    pub fn disable(&self) -> Result<(), Error> {
        let mut control = self.control.lock();
        control.update_requested = false;
        self.stop_if_unused(&mut control)
    }

    /// Whether the background thread is alive. This includes a thread that was
    /// told to stop but has not exited yet.
    pub fn is_running(&self) -> bool {
        let control = self.control.lock();
        control.worker.is_some()
            || control
                .stopping
                .as_ref()
                .is_some_and(|exiting| !exiting.thread.is_finished())
    }

    /// Whether update caching was requested with [`Watchdog::enable`].
    pub fn is_update_enabled(&self) -> bool {
        self.control.lock().update_requested
    }

    pub fn interval(&self) -> Duration {
        *self.shared.interval.lock()
    }

    /// Changes the time between two snapshots, from the next tick on.
    /// A zero interval is ignored.
    pub fn update_interval(&self, interval: Duration) {
        if interval.is_zero() {
            warn!("ignoring zero watchdog interval");
            return;
        }
        *self.shared.interval.lock() = interval;
    }

    /// Registers a listener invoked when monitors are plugged or unplugged.
    /// Registering the same listener twice has no effect.
    pub fn register_plug_listener(&self, listener: Listener) -> Result<(), Error> {
        let mut control = self.control.lock();
        push_unique(&self.shared.plug_listeners, listener);
        self.start(&mut control)
    }

    pub fn unregister_plug_listener(&self, listener: &Listener) -> Result<(), Error> {
        let mut control = self.control.lock();
        self.shared.plug_listeners.lock().retain(|other| other != listener);
        self.stop_if_unused(&mut control)
    }

    pub fn is_plug_listener_registered(&self, listener: &Listener) -> bool {
        self.shared.plug_listeners.lock().contains(listener)
    }

    /// Registers a listener invoked when properties (position, size, mode, ...) of
    /// a monitor change. Registering the same listener twice has no effect.
    pub fn register_change_listener(&self, listener: Listener) -> Result<(), Error> {
        let mut control = self.control.lock();
        push_unique(&self.shared.change_listeners, listener);
        self.start(&mut control)
    }

    pub fn unregister_change_listener(&self, listener: &Listener) -> Result<(), Error> {
        let mut control = self.control.lock();
        self.shared.change_listeners.lock().retain(|other| other != listener);
        self.stop_if_unused(&mut control)
    }

    pub fn is_change_listener_registered(&self, listener: &Listener) -> bool {
        self.shared.change_listeners.lock().contains(listener)
    }

    fn start(&self, control: &mut Control) -> Result<(), Error> {
        if control.worker.is_some() {
            return Ok(());
        }
        if let Some(exiting) = control.stopping.take() {
            self.wait_for_exit(control, exiting)?;
        }

        let backend = &self.shared.backend;
        backend.set_caching(true);
        let baseline = match backend.fresh_monitors() {
            Ok(baseline) => baseline,
            Err(err) => {
                backend.set_caching(false);
                return Err(err.into());
            }
        };

        let poller = Poller {
            tracker: ChangeTracker::new(baseline),
            failures: 0,
            failure_threshold: self.failure_threshold,
        };
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let shared = Arc::clone(&self.shared);

        let thread = thread::Builder::new()
            .name("monitor-watchdog".into())
            .spawn(move || {
                // Dropped when the thread exits, which disconnects `done`.
                let _done = done_tx;
                poller.run(shared, stop_rx);
            })
            .map_err(|err| {
                backend.set_caching(false);
                Error::WatchdogSpawn(err)
            })?;

        debug!(interval = ?self.interval(), "watchdog started");
        control.worker = Some(Worker {
            stop: stop_tx,
            exiting: Exiting {
                done: done_rx,
                thread,
            },
        });

        Ok(())
    }

    fn stop_if_unused(&self, control: &mut Control) -> Result<(), Error> {
        if control.update_requested || self.shared.has_listeners() {
            return Ok(());
        }
        self.stop(control)
    }

    /// Tells the thread to stop and waits for it. A thread that does not exit in
    /// time is kept in `stopping`, so stopping again waits for it once more.
    fn stop(&self, control: &mut Control) -> Result<(), Error> {
        let Some(Worker { stop, exiting }) = control.worker.take() else {
            return match control.stopping.take() {
                Some(exiting) => self.wait_for_exit(control, exiting),
                None => Ok(()),
            };
        };
        self.shared.backend.set_caching(false);
        drop(stop);
        self.wait_for_exit(control, exiting)
    }

    fn wait_for_exit(&self, control: &mut Control, exiting: Exiting) -> Result<(), Error> {
        // A listener may stop the watchdog from the watchdog thread itself; it
        // exits on its own once the listener returns.
        if exiting.is_current() {
            return Ok(());
        }
        match exiting.join(self.join_timeout) {
            Ok(()) => {
                debug!("watchdog stopped");
                Ok(())
            }
            Err(exiting) => {
                error!(timeout = ?self.join_timeout, "watchdog thread did not exit in time");
                control.stopping = Some(exiting);
                Err(Error::WatchdogJoinTimeout(self.join_timeout))
            }
        }
    }

    /// Stops the thread regardless of registered listeners and update caching.
    pub fn shutdown(&self) -> Result<(), Error> {
        let mut control = self.control.lock();
        control.update_requested = false;
        self.shared.plug_listeners.lock().clear();
        self.shared.change_listeners.lock().clear();
        self.stop(&mut control)
    }

    #[cfg(test)]
    fn thread_id(&self) -> Option<thread::ThreadId> {
        self.control
            .lock()
            .worker
            .as_ref()
            .map(|worker| worker.exiting.thread.thread().id())
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(%err, "failed to stop the watchdog");
        }
    }
}

fn push_unique(listeners: &Mutex<Vec<Listener>>, listener: Listener) {
    let mut listeners = listeners.lock();
    if !listeners.contains(&listener) {
        listeners.push(listener);
    }
}
