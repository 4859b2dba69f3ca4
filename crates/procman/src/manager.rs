use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::launcher::{LaunchError, LaunchSpec, Launcher, RendererLauncher};
use crate::observer::{LifecycleEvent, LifecycleObserver, TracingObserver};
use crate::queue::{Command, CommandQueue, Debouncer, QueueSender, Received};
use crate::registry::{ManagedProcess, Registry};
use crate::signal::{Delivery, GroupSignal, ProcessGroups, SignalError, UnixProcessGroups};
use crate::types::{
    ChangeRequest, DisplayId, ManagedProcessInfo, ProcessGroupId, WallpaperId,
};

/// Bounded waits used by the lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Wait after SIGTERM before checking whether a renderer exited.
    pub grace: Duration,
    /// Single wait after terminating every display of a batch change.
    pub batch_grace: Duration,
    /// Pause between consecutive launches of a batch change.
    pub launch_spacing: Duration,
    /// How long the worker blocks on an empty queue before re-checking state.
    pub poll_interval: Duration,
    /// Identical requests inside this window are dropped. Zero disables it.
    pub request_cooldown: Duration,
    /// Renderers still alive this long after SIGTERM get SIGKILL.
    pub kill_after: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(100),
            batch_grace: Duration::from_millis(200),
            launch_spacing: Duration::from_millis(100),
            poll_interval: Duration::from_secs(1),
            request_cooldown: Duration::from_secs(1),
            kill_after: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    pub timings: Timings,
    /// Initial silent flag passed to future launches.
    pub silent: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            timings: Timings::default(),
            silent: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Queued,
    /// Same request seen within the cooldown window; nothing was queued.
    Debounced,
}

#[derive(Debug, thiserror::Error)]
pub enum DisplayFailure {
    #[error("display {display}: {source}")]
    Launch {
        display: DisplayId,
        #[source]
        source: LaunchError,
    },
    #[error("display {display}: {source}")]
    Signal {
        display: DisplayId,
        #[source]
        source: SignalError,
    },
}

impl DisplayFailure {
    pub fn display(&self) -> &DisplayId {
        match self {
            DisplayFailure::Launch { display, .. } | DisplayFailure::Signal { display, .. } => {
                display
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("lifecycle manager has shut down")]
    ShutDown,
    #[error("failed to spawn lifecycle worker: {0}")]
    Worker(#[source] io::Error),
    #[error("{} display operation(s) failed", .0.len())]
    Partial(Vec<DisplayFailure>),
}

impl ManagerError {
    pub fn failures(&self) -> &[DisplayFailure] {
        match self {
            ManagerError::Partial(failures) => failures,
            _ => &[],
        }
    }
}

/// Owns one renderer per display.
///
/// Single-display changes go through a FIFO consumed by a dedicated worker
/// thread. Batch changes and teardown run on the caller's thread. All three
/// take the same registry lock, so registry mutations never interleave.
pub struct LifecycleManager {
    shared: Arc<Shared>,
    sender: QueueSender,
    debouncer: Mutex<Debouncer>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    registry: Mutex<Registry>,
    launcher: Box<dyn Launcher>,
    groups: Box<dyn ProcessGroups>,
    observer: Box<dyn LifecycleObserver>,
    silent: AtomicBool,
    running: AtomicBool,
    timings: Timings,
}

impl LifecycleManager {
    pub fn start<L, G, O>(
        config: ManagerConfig,
        launcher: L,
        groups: G,
        observer: O,
    ) -> Result<Self, ManagerError>
    where
        L: Launcher + 'static,
        G: ProcessGroups + 'static,
        O: LifecycleObserver + 'static,
    {
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::new()),
            launcher: Box::new(launcher),
            groups: Box::new(groups),
            observer: Box::new(observer),
            silent: AtomicBool::new(config.silent),
            running: AtomicBool::new(true),
            timings: config.timings,
        });
        let (sender, queue) = CommandQueue::channel();
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("wpectl-lifecycle".into())
            .spawn(move || run_worker(worker_shared, queue))
            .map_err(ManagerError::Worker)?;

        Ok(Self {
            shared,
            sender,
            debouncer: Mutex::new(Debouncer::new(config.timings.request_cooldown)),
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Production wiring: real `killpg` delivery and log-based reporting.
    pub fn with_renderer(
        config: ManagerConfig,
        launcher: RendererLauncher,
    ) -> Result<Self, ManagerError> {
        Self::start(config, launcher, UnixProcessGroups, TracingObserver)
    }

    /// Queues a change for one display and returns immediately.
    pub fn request_change(
        &self,
        display: DisplayId,
        wallpaper: WallpaperId,
    ) -> Result<RequestOutcome, ManagerError> {
        if !self.is_running() {
            return Err(ManagerError::ShutDown);
        }
        let request = ChangeRequest::new(display, wallpaper);
        {
            let mut debouncer = self
                .debouncer
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !debouncer.admit(&request, Instant::now()) {
                debug!(
                    display = %request.display,
                    wallpaper = %request.wallpaper,
                    "dropping repeated change request"
                );
                return Ok(RequestOutcome::Debounced);
            }
        }
        debug!(display = %request.display, wallpaper = %request.wallpaper, "queueing change request");
        if self.sender.push(request) {
            Ok(RequestOutcome::Queued)
        } else {
            Err(ManagerError::ShutDown)
        }
    }

    /// Replaces the renderer of every listed display with `wallpaper`.
    ///
    /// Runs on the calling thread under the registry lock: all old renderers
    /// are terminated first, then new ones are launched one after another.
    /// Every display is attempted; failures are returned together.
    pub fn change_all_displays(
        &self,
        wallpaper: &WallpaperId,
        displays: &[DisplayId],
    ) -> Result<(), ManagerError> {
        if !self.is_running() {
            return Err(ManagerError::ShutDown);
        }
        let mut seen = HashSet::new();
        let displays: Vec<&DisplayId> = displays
            .iter()
            .filter(|display| seen.insert(*display))
            .collect();
        info!(wallpaper = %wallpaper, displays = displays.len(), "changing wallpaper on displays");

        let shared = &self.shared;
        let mut failures = Vec::new();
        let mut registry = shared.lock_registry();
        shared.reap_lingering(&mut registry);

        let mut retiring = Vec::new();
        for display in &displays {
            if let Some(previous) = registry.remove(display) {
                if let Err(failure) = shared.send_terminate(&previous) {
                    failures.push(failure);
                }
                retiring.push(previous);
            }
        }
        if !retiring.is_empty() {
            thread::sleep(shared.timings.batch_grace);
        }
        let terminated_at = Instant::now();
        for previous in retiring {
            shared.settle(&mut registry, previous, terminated_at);
        }

        for (index, display) in displays.iter().enumerate() {
            if index > 0 {
                thread::sleep(shared.timings.launch_spacing);
            }
            if let Err(failure) = shared.launch_into(&mut registry, display, wallpaper) {
                failures.push(failure);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ManagerError::Partial(failures))
        }
    }

    /// Stops the worker and tears down every renderer.
    ///
    /// SIGTERM goes to every group, then after one grace interval anything
    /// still alive gets SIGKILL. Calling this again is a no-op.
    pub fn kill_all(&self) -> Result<(), ManagerError> {
        self.shared.running.store(false, Ordering::SeqCst);
        let _ = self.sender.shutdown();
        self.join_worker();

        let shared = &self.shared;
        let mut registry = shared.lock_registry();
        let mut processes = registry.drain();
        processes.extend(registry.take_lingering().into_iter().map(|entry| entry.process));
        if processes.is_empty() {
            return Ok(());
        }
        info!(renderers = processes.len(), "stopping all renderers");

        let mut failures = Vec::new();
        let mut delivered = false;
        for process in &processes {
            match shared.send_terminate(process) {
                Ok(Delivery::Delivered) => delivered = true,
                Ok(Delivery::NotFound) => {}
                Err(failure) => failures.push(failure),
            }
        }
        if delivered {
            thread::sleep(shared.timings.grace);
        }

        for mut process in processes {
            if let Err(failure) = shared.force_stop(&mut process) {
                failures.push(failure);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ManagerError::Partial(failures))
        }
    }

    /// Flips silent mode for future launches and returns the new value.
    pub fn toggle_silent(&self) -> bool {
        let silent = !self.shared.silent.fetch_xor(true, Ordering::SeqCst);
        info!(silent, "silent mode toggled");
        silent
    }

    pub fn is_silent(&self) -> bool {
        self.shared.silent.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<ManagedProcessInfo> {
        self.shared.lock_registry().snapshot()
    }

    pub fn process_for(&self, display: &DisplayId) -> Option<ProcessGroupId> {
        self.shared
            .lock_registry()
            .get(display)
            .map(|process| process.pgid)
    }

    fn join_worker(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("lifecycle worker panicked");
        }
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        if let Err(err) = self.kill_all() {
            for failure in err.failures() {
                error!(error = %failure, "renderer teardown failed");
            }
        }
    }
}

fn run_worker(shared: Arc<Shared>, queue: CommandQueue) {
    debug!("lifecycle worker started");
    while shared.running.load(Ordering::SeqCst) {
        match queue.recv(shared.timings.poll_interval) {
            Received::Command(Command::Change(request)) => {
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                shared.process_one(&request);
            }
            Received::Command(Command::Shutdown) | Received::Closed => break,
            Received::Idle => {
                let mut registry = shared.lock_registry();
                shared.reap_lingering(&mut registry);
            }
        }
    }
    shared.observer.on_event(&LifecycleEvent::WorkerStopped);
}

impl Shared {
    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn process_one(&self, request: &ChangeRequest) {
        let mut registry = self.lock_registry();
        self.reap_lingering(&mut registry);

        if let Some(previous) = registry.remove(&request.display) {
            // Signal failures are already reported through the observer.
            if let Ok(Delivery::Delivered) = self.send_terminate(&previous) {
                thread::sleep(self.timings.grace);
            }
            self.settle(&mut registry, previous, Instant::now());
        }

        // Launch failures are reported through the observer; the display
        // stays idle until the next request.
        let _ = self.launch_into(&mut registry, &request.display, &request.wallpaper);
    }

    fn launch_into(
        &self,
        registry: &mut Registry,
        display: &DisplayId,
        wallpaper: &WallpaperId,
    ) -> Result<ProcessGroupId, DisplayFailure> {
        let spec = LaunchSpec::new(
            display.clone(),
            wallpaper.clone(),
            self.silent.load(Ordering::SeqCst),
        );
        match self.launcher.launch(&spec) {
            Ok(launched) => {
                let pgid = launched.pgid;
                let process = ManagedProcess::new(display.clone(), wallpaper.clone(), launched);
                if let Some(stale) = registry.set(process) {
                    let _ = self.send_terminate(&stale);
                    self.settle(registry, stale, Instant::now());
                }
                self.observer.on_event(&LifecycleEvent::Launched {
                    display,
                    wallpaper,
                    pgid,
                });
                Ok(pgid)
            }
            Err(source) => {
                self.observer.on_event(&LifecycleEvent::LaunchFailed {
                    display,
                    wallpaper,
                    error: &source,
                });
                Err(DisplayFailure::Launch {
                    display: display.clone(),
                    source,
                })
            }
        }
    }

    fn send_terminate(&self, process: &ManagedProcess) -> Result<Delivery, DisplayFailure> {
        match self.groups.signal(process.pgid, GroupSignal::Terminate) {
            Ok(Delivery::Delivered) => Ok(Delivery::Delivered),
            Ok(Delivery::NotFound) => {
                self.observer.on_event(&LifecycleEvent::AlreadyGone {
                    display: &process.display,
                    pgid: process.pgid,
                });
                Ok(Delivery::NotFound)
            }
            Err(source) => {
                self.observer.on_event(&LifecycleEvent::SignalFailed {
                    display: &process.display,
                    error: &source,
                });
                Err(DisplayFailure::Signal {
                    display: process.display.clone(),
                    source,
                })
            }
        }
    }

    /// Reaps the group leader if it exited, then reports whether any member
    /// of the group is still alive.
    fn group_alive(&self, process: &mut ManagedProcess) -> Result<bool, SignalError> {
        process.try_reap();
        self.groups.is_alive(process.pgid)
    }

    /// Called after the grace interval: forgets the renderer if its group
    /// is gone, otherwise keeps it on the lingering list.
    fn settle(&self, registry: &mut Registry, mut process: ManagedProcess, terminated_at: Instant) {
        match self.group_alive(&mut process) {
            Ok(false) => self.observer.on_event(&LifecycleEvent::Terminated {
                display: &process.display,
                pgid: process.pgid,
            }),
            Ok(true) => {
                debug!(display = %process.display, pgid = process.pgid.raw(), "renderer still exiting");
                registry.retire(process, terminated_at);
            }
            Err(err) => {
                self.observer.on_event(&LifecycleEvent::SignalFailed {
                    display: &process.display,
                    error: &err,
                });
                registry.retire(process, terminated_at);
            }
        }
    }

    fn reap_lingering(&self, registry: &mut Registry) {
        let lingering = registry.take_lingering();
        if lingering.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut remaining = Vec::new();
        for mut entry in lingering {
            match self.group_alive(&mut entry.process) {
                Ok(false) => self.observer.on_event(&LifecycleEvent::Terminated {
                    display: &entry.process.display,
                    pgid: entry.process.pgid,
                }),
                Ok(true) if now.duration_since(entry.terminated_at) >= self.timings.kill_after => {
                    match self.groups.signal(entry.process.pgid, GroupSignal::Kill) {
                        Ok(delivery) => {
                            if delivery == Delivery::Delivered {
                                self.observer.on_event(&LifecycleEvent::ForceKilled {
                                    display: &entry.process.display,
                                    pgid: entry.process.pgid,
                                });
                            }
                            entry.process.reap_within(self.timings.grace);
                            if let Ok(true) = self.group_alive(&mut entry.process) {
                                remaining.push(entry);
                            }
                        }
                        // Undeliverable: give up rather than retry forever.
                        Err(err) => self.observer.on_event(&LifecycleEvent::SignalFailed {
                            display: &entry.process.display,
                            error: &err,
                        }),
                    }
                }
                Ok(true) => remaining.push(entry),
                Err(err) => self.observer.on_event(&LifecycleEvent::SignalFailed {
                    display: &entry.process.display,
                    error: &err,
                }),
            }
        }
        registry.restore_lingering(remaining);
    }

    /// Teardown step after the grace interval: SIGKILL whatever is left of
    /// the group and collect the leader.
    fn force_stop(&self, process: &mut ManagedProcess) -> Result<(), DisplayFailure> {
        let alive = match self.group_alive(process) {
            Ok(alive) => alive,
            Err(source) => {
                return Err(DisplayFailure::Signal {
                    display: process.display.clone(),
                    source,
                })
            }
        };
        if !alive {
            self.observer.on_event(&LifecycleEvent::Terminated {
                display: &process.display,
                pgid: process.pgid,
            });
            return Ok(());
        }
        match self.groups.signal(process.pgid, GroupSignal::Kill) {
            Ok(Delivery::Delivered) => {
                self.observer.on_event(&LifecycleEvent::ForceKilled {
                    display: &process.display,
                    pgid: process.pgid,
                });
                process.reap_within(self.timings.grace);
                Ok(())
            }
            Ok(Delivery::NotFound) => {
                self.observer.on_event(&LifecycleEvent::Terminated {
                    display: &process.display,
                    pgid: process.pgid,
                });
                Ok(())
            }
            Err(source) => Err(DisplayFailure::Signal {
                display: process.display.clone(),
                source,
            }),
        }
    }
}
