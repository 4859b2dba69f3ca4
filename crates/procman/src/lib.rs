//! Per-display renderer process lifecycle management.
//!
//! A [`LifecycleManager`] owns one background renderer process per display.
//! Change requests are serialized through a single consumer thread, and every
//! mutation of the [`Registry`] happens under one lock, so a display never has
//! two registered renderers at the same time.

mod launcher;
mod manager;
mod observer;
mod queue;
mod registry;
mod signal;
mod types;

pub use launcher::{
    sweep_strays, LaunchError, LaunchSpec, LaunchedProcess, Launcher, OutputMode,
    RendererLauncher,
};
pub use manager::{
    DisplayFailure, LifecycleManager, ManagerConfig, ManagerError, RequestOutcome, Timings,
};
pub use observer::{LifecycleEvent, LifecycleObserver, TracingObserver};
pub use queue::{Command, CommandQueue, Debouncer, QueueSender, Received};
pub use registry::{ManagedProcess, Registry};
pub use signal::{Delivery, GroupSignal, ProcessGroups, SignalError, UnixProcessGroups};
pub use types::{ChangeRequest, DisplayId, ManagedProcessInfo, ProcessGroupId, WallpaperId};
