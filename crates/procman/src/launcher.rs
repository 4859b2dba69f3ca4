use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::signal::{Delivery, GroupSignal, ProcessGroups, UnixProcessGroups};
use crate::types::{DisplayId, ProcessGroupId, WallpaperId};

/// Everything the renderer needs to paint one display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub display: DisplayId,
    pub wallpaper: WallpaperId,
    pub silent: bool,
}

impl LaunchSpec {
    pub fn new(display: DisplayId, wallpaper: WallpaperId, silent: bool) -> Self {
        Self {
            display,
            wallpaper,
            silent,
        }
    }

    /// Renderer argument list: `[--silent] [extra…] --screen-root <display> <wallpaper>`.
    pub fn arguments(&self, extra: &[String]) -> Vec<String> {
        let mut args = Vec::with_capacity(extra.len() + 4);
        if self.silent {
            args.push("--silent".to_string());
        }
        args.extend(extra.iter().cloned());
        args.push("--screen-root".to_string());
        args.push(self.display.0.clone());
        args.push(self.wallpaper.0.clone());
        args
    }
}

/// A renderer that was started and was still alive when last polled.
#[derive(Debug)]
pub struct LaunchedProcess {
    pub pgid: ProcessGroupId,
    /// OS handle used to reap the renderer once it exits. Absent for
    /// processes the manager cannot wait on.
    pub child: Option<Child>,
}

impl LaunchedProcess {
    pub fn new(pgid: ProcessGroupId, child: Option<Child>) -> Self {
        Self { pgid, child }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to spawn renderer {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("renderer for display {display} exited immediately ({status})")]
    ExitedImmediately {
        display: DisplayId,
        /// Group the renderer ran in; already killed when this is returned.
        pgid: ProcessGroupId,
        status: ExitStatus,
    },
    #[error("failed to poll renderer for display {display}: {source}")]
    Poll {
        display: DisplayId,
        #[source]
        source: io::Error,
    },
    #[error("renderer launch failed: {0}")]
    Other(String),
}

/// Starts renderer processes. Implementations must not touch the registry.
pub trait Launcher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedProcess, LaunchError>;
}

/// What happens to the renderer's stdout/stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Discard,
    Inherit,
}

impl OutputMode {
    fn stdio(self) -> Stdio {
        match self {
            OutputMode::Discard => Stdio::null(),
            OutputMode::Inherit => Stdio::inherit(),
        }
    }
}

/// Launches the external renderer binary detached from our session.
#[derive(Debug, Clone)]
pub struct RendererLauncher {
    binary: PathBuf,
    extra_args: Vec<String>,
    output: OutputMode,
    startup_check: Duration,
}

impl RendererLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
            output: OutputMode::default(),
            startup_check: Duration::from_millis(50),
        }
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    pub fn with_startup_check(mut self, wait: Duration) -> Self {
        self.startup_check = wait;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self, spec: &LaunchSpec) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .args(spec.arguments(&self.extra_args))
            .stdin(Stdio::null())
            .stdout(self.output.stdio())
            .stderr(self.output.stdio());
        // SAFETY: only async-signal-safe calls between fork and exec.
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                libc::signal(libc::SIGINT, libc::SIG_IGN);
                Ok(())
            });
        }
        command
    }
}

impl Launcher for RendererLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedProcess, LaunchError> {
        let mut command = self.command(spec);
        info!(
            display = %spec.display,
            wallpaper = %spec.wallpaper,
            silent = spec.silent,
            command = ?command,
            "launching renderer"
        );
        let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
            binary: self.binary.clone(),
            source,
        })?;

        let Ok(raw) = i32::try_from(child.id()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(LaunchError::Other(format!("pid {} out of range", child.id())));
        };
        // setsid made the child a group leader, so its pid is the group id.
        let pgid = ProcessGroupId::new(raw);

        if !self.startup_check.is_zero() {
            thread::sleep(self.startup_check);
        }
        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                // Anything the renderer forked before dying is still in the group.
                kill_group(pgid);
                return Err(LaunchError::ExitedImmediately {
                    display: spec.display.clone(),
                    pgid,
                    status,
                });
            }
            Err(source) => {
                kill_group(pgid);
                let _ = child.wait();
                return Err(LaunchError::Poll {
                    display: spec.display.clone(),
                    source,
                });
            }
        }

        debug!(display = %spec.display, pgid = raw, "renderer alive after startup check");
        Ok(LaunchedProcess::new(pgid, Some(child)))
    }
}

fn kill_group(pgid: ProcessGroupId) {
    match UnixProcessGroups.signal(pgid, GroupSignal::Kill) {
        Ok(Delivery::Delivered) => debug!(pgid = pgid.raw(), "killed leftovers of failed renderer"),
        Ok(Delivery::NotFound) => {}
        Err(err) => warn!(pgid = pgid.raw(), error = %err, "failed to kill renderer group"),
    }
}

/// Force-kills every process whose command line mentions `binary`, including
/// renderers left behind by a previous run. Our own process and its parent
/// are skipped since their arguments may name the renderer too. Only call
/// while no renderer is registered. Returns how many processes were killed.
pub fn sweep_strays(binary: &Path) -> usize {
    let Some(name) = binary.file_name().and_then(|name| name.to_str()) else {
        return 0;
    };
    let output = match Command::new("pgrep")
        .args(["-f", name])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
    {
        Ok(output) => output,
        Err(err) => {
            warn!(renderer = name, error = %err, "failed to sweep stray renderers");
            return 0;
        }
    };

    let own = i32::try_from(std::process::id()).unwrap_or(-1);
    // SAFETY: getppid has no preconditions.
    let parent = unsafe { libc::getppid() };
    let mut killed = 0;
    for pid in parse_pids(&String::from_utf8_lossy(&output.stdout)) {
        if pid == own || pid == parent || pid <= 1 {
            continue;
        }
        // SAFETY: plain syscall on a pid we just listed; ESRCH is harmless.
        if unsafe { libc::kill(pid, libc::SIGKILL) } == 0 {
            killed += 1;
        }
    }
    if killed > 0 {
        info!(renderer = name, killed, "killed stray renderers");
    } else {
        debug!(renderer = name, "no stray renderers found");
    }
    killed
}

fn parse_pids(listing: &str) -> Vec<i32> {
    listing
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(silent: bool) -> LaunchSpec {
        LaunchSpec::new(DisplayId::new("HDMI-1"), WallpaperId::new("123"), silent)
    }

    #[test]
    fn builds_silent_argument_list() {
        assert_eq!(
            spec(true).arguments(&[]),
            vec!["--silent", "--screen-root", "HDMI-1", "123"]
        );
    }

    #[test]
    fn omits_silent_flag_and_keeps_target_last() {
        let extra = vec!["--fps".to_string(), "30".to_string()];
        assert_eq!(
            spec(false).arguments(&extra),
            vec!["--fps", "30", "--screen-root", "HDMI-1", "123"]
        );
    }

    #[test]
    fn parses_pgrep_listing() {
        assert_eq!(parse_pids("123\n 456\n\nabc\n"), vec![123, 456]);
    }

    #[test]
    fn sweeping_an_unused_name_kills_nothing() {
        assert_eq!(sweep_strays(Path::new("/opt/wpectl-no-such-renderer-9f3a")), 0);
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let launcher = RendererLauncher::new("/nonexistent/wpectl-renderer")
            .with_startup_check(Duration::ZERO);
        let err = launcher.launch(&spec(true)).unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }), "{err:?}");
    }
}
