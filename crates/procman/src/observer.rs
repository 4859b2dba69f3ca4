use tracing::{debug, error, info, warn};

use crate::launcher::LaunchError;
use crate::signal::SignalError;
use crate::types::{DisplayId, ProcessGroupId, WallpaperId};

/// Notifications emitted by the lifecycle manager. Failures inside the
/// consumer loop only ever surface here.
#[derive(Debug)]
pub enum LifecycleEvent<'a> {
    Launched {
        display: &'a DisplayId,
        wallpaper: &'a WallpaperId,
        pgid: ProcessGroupId,
    },
    LaunchFailed {
        display: &'a DisplayId,
        wallpaper: &'a WallpaperId,
        error: &'a LaunchError,
    },
    Terminated {
        display: &'a DisplayId,
        pgid: ProcessGroupId,
    },
    /// The process group was already gone when we tried to stop it.
    AlreadyGone {
        display: &'a DisplayId,
        pgid: ProcessGroupId,
    },
    SignalFailed {
        display: &'a DisplayId,
        error: &'a SignalError,
    },
    ForceKilled {
        display: &'a DisplayId,
        pgid: ProcessGroupId,
    },
    WorkerStopped,
}

/// Receives lifecycle events. Called with the manager lock held, so
/// implementations must not call back into the manager.
pub trait LifecycleObserver: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent<'_>);
}

/// Default observer: structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl LifecycleObserver for TracingObserver {
    fn on_event(&self, event: &LifecycleEvent<'_>) {
        match event {
            LifecycleEvent::Launched {
                display: shown,
                wallpaper,
                pgid,
            } => info!(display = %shown, wallpaper = %wallpaper, pgid = pgid.raw(), "renderer running"),
            LifecycleEvent::LaunchFailed {
                display: shown,
                wallpaper,
                error: err,
            } => error!(display = %shown, wallpaper = %wallpaper, error = %err, "renderer launch failed"),
            LifecycleEvent::Terminated { display: shown, pgid } => {
                debug!(display = %shown, pgid = pgid.raw(), "renderer terminated")
            }
            LifecycleEvent::AlreadyGone { display: shown, pgid } => {
                debug!(display = %shown, pgid = pgid.raw(), "renderer already exited")
            }
            LifecycleEvent::SignalFailed { display: shown, error: err } => {
                warn!(display = %shown, error = %err, "failed to signal renderer")
            }
            LifecycleEvent::ForceKilled { display: shown, pgid } => {
                warn!(display = %shown, pgid = pgid.raw(), "renderer ignored SIGTERM; killed")
            }
            LifecycleEvent::WorkerStopped => debug!("lifecycle worker stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn every_event_is_logged_with_its_display() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let hdmi = DisplayId::new("HDMI-1");
        let dp = DisplayId::new("DP-2");
        let wallpaper = WallpaperId::new("123");
        let pgid = ProcessGroupId::new(4242);
        let launch_error = LaunchError::ExitedImmediately {
            display: dp.clone(),
            pgid,
            status: ExitStatus::from_raw(3 << 8),
        };
        let signal_error = SignalError::ReservedGroup(1);

        tracing::subscriber::with_default(subscriber, || {
            let observer = TracingObserver;
            observer.on_event(&LifecycleEvent::Launched {
                display: &hdmi,
                wallpaper: &wallpaper,
                pgid,
            });
            observer.on_event(&LifecycleEvent::LaunchFailed {
                display: &dp,
                wallpaper: &wallpaper,
                error: &launch_error,
            });
            observer.on_event(&LifecycleEvent::Terminated { display: &hdmi, pgid });
            observer.on_event(&LifecycleEvent::AlreadyGone { display: &hdmi, pgid });
            observer.on_event(&LifecycleEvent::SignalFailed {
                display: &hdmi,
                error: &signal_error,
            });
            observer.on_event(&LifecycleEvent::ForceKilled { display: &dp, pgid });
            observer.on_event(&LifecycleEvent::WorkerStopped);
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 7, "{output}");
        for (line, display) in lines.iter().zip(["HDMI-1", "DP-2", "HDMI-1", "HDMI-1", "HDMI-1", "DP-2"]) {
            assert!(line.contains(&format!("display={display}")), "{line}");
        }
        assert!(lines[0].contains("pgid=4242"));
        assert!(lines[1].contains("exited immediately"));
        assert!(lines[6].contains("lifecycle worker stopped"));
    }
}
