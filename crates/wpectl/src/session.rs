//! Foreground session: keeps renderers running until a termination signal
//! arrives, driving the rotation timer and runtime toggles in between.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use procman::{DisplayId, LifecycleManager, ManagerError, WallpaperId};
use scheduler::{Scheduler, SelectionChange};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::flag;
use tracing::{error, info, warn};

const SESSION_TICK: Duration = Duration::from_millis(200);

/// Flags raised by signal handlers and consumed by the session loop.
#[derive(Debug, Clone, Default)]
pub struct SessionSignals {
    stop: Arc<AtomicBool>,
    toggle_silent: Arc<AtomicBool>,
    skip: Arc<AtomicBool>,
}

impl SessionSignals {
    /// SIGINT, SIGTERM and SIGHUP end the session, SIGUSR1 toggles silent
    /// mode, SIGUSR2 skips to the next wallpaper.
    pub fn install() -> Result<Self> {
        let signals = Self::default();
        for signal in [SIGINT, SIGTERM, SIGHUP] {
            flag::register(signal, Arc::clone(&signals.stop))
                .with_context(|| format!("failed to install handler for signal {signal}"))?;
        }
        flag::register(SIGUSR1, Arc::clone(&signals.toggle_silent))
            .context("failed to install SIGUSR1 handler")?;
        flag::register(SIGUSR2, Arc::clone(&signals.skip))
            .context("failed to install SIGUSR2 handler")?;
        Ok(signals)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn request_toggle_silent(&self) {
        self.toggle_silent.store(true, Ordering::SeqCst);
    }

    pub fn request_skip(&self) {
        self.skip.store(true, Ordering::SeqCst);
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Silent mode at the end of the session, if it was toggled.
    pub silent_toggled_to: Option<bool>,
}

/// Runs until `signals` asks to stop. Teardown is left to the caller.
pub fn run_session(
    manager: &LifecycleManager,
    signals: &SessionSignals,
    mut rotation: Option<&mut Scheduler>,
) -> SessionOutcome {
    info!(
        pid = std::process::id(),
        rotating = rotation.is_some(),
        "session running; send SIGINT or SIGTERM to stop"
    );
    let mut outcome = SessionOutcome {
        silent_toggled_to: None,
    };

    while !signals.should_stop() {
        if signals.toggle_silent.swap(false, Ordering::SeqCst) {
            outcome.silent_toggled_to = Some(manager.toggle_silent());
        }

        if let Some(scheduler) = rotation.as_deref_mut() {
            let now = Instant::now();
            let mut changes = if signals.skip.swap(false, Ordering::SeqCst) {
                info!("skipping to the next wallpaper");
                scheduler.skip_all(now)
            } else {
                Vec::new()
            };
            changes.extend(scheduler.tick(now));
            if let Err(ManagerError::ShutDown) = apply_changes(manager, &changes) {
                break;
            }
        } else if signals.skip.swap(false, Ordering::SeqCst) {
            info!("nothing to skip; no rotation is active");
        }

        thread::sleep(pause_before_next_tick(rotation.as_deref(), Instant::now()));
    }

    info!("session ending");
    outcome
}

/// Signals are polled every `SESSION_TICK`; a rotation due sooner wakes the
/// loop early.
fn pause_before_next_tick(rotation: Option<&Scheduler>, now: Instant) -> Duration {
    rotation
        .and_then(|scheduler| scheduler.next_due(now))
        .map_or(SESSION_TICK, |due| due.min(SESSION_TICK))
}

/// Groups changes by wallpaper so displays switching to the same wallpaper
/// go through one batch change.
pub fn group_changes(changes: &[SelectionChange]) -> BTreeMap<String, Vec<DisplayId>> {
    let mut grouped: BTreeMap<String, Vec<DisplayId>> = BTreeMap::new();
    for change in changes {
        grouped
            .entry(change.wallpaper.clone())
            .or_default()
            .push(DisplayId::new(change.target.as_str()));
    }
    grouped
}

/// Applies grouped changes and returns how many displays failed. Failures
/// are logged and do not stop the remaining groups.
pub fn apply_groups(
    manager: &LifecycleManager,
    grouped: BTreeMap<String, Vec<DisplayId>>,
) -> Result<usize, ManagerError> {
    let mut failed = 0;
    for (wallpaper, displays) in grouped {
        let wallpaper = WallpaperId::new(wallpaper);
        match manager.change_all_displays(&wallpaper, &displays) {
            Ok(()) => {}
            Err(ManagerError::Partial(failures)) => {
                failed += failures.len();
                for failure in &failures {
                    warn!(
                        display = %failure.display(),
                        wallpaper = %wallpaper,
                        error = %failure,
                        "wallpaper change failed"
                    );
                }
            }
            Err(err) => {
                error!(error = %err, "wallpaper change rejected");
                return Err(err);
            }
        }
    }
    Ok(failed)
}

pub fn apply_changes(
    manager: &LifecycleManager,
    changes: &[SelectionChange],
) -> Result<usize, ManagerError> {
    if changes.is_empty() {
        return Ok(0);
    }
    apply_groups(manager, group_changes(changes))
}
