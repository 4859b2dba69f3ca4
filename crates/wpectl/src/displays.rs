use std::io;
use std::process::{Command, Stdio};

use procman::DisplayId;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayInfo {
    pub name: String,
    /// Geometry token as reported (e.g. `1920x1080+0+0`), or `unknown`.
    pub resolution: String,
    pub primary: bool,
}

impl DisplayInfo {
    pub fn id(&self) -> DisplayId {
        DisplayId::new(self.name.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DisplayQueryError {
    #[error("{0} is not installed; install it with your package manager (x11-xserver-utils on Debian/Ubuntu)")]
    NotInstalled(String),
    #[error("{tool} failed: {reason}")]
    Failed { tool: String, reason: String },
    #[error("no connected displays reported by {0}")]
    NoDisplays(String),
}

pub trait DisplayEnumerator {
    fn list_displays(&self) -> Result<Vec<DisplayInfo>, DisplayQueryError>;
}

/// Queries `xrandr --current`, which reads the server's current state
/// without reprobing outputs.
pub struct XrandrEnumerator {
    executable: String,
}

impl XrandrEnumerator {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl Default for XrandrEnumerator {
    fn default() -> Self {
        Self::new("xrandr")
    }
}

impl DisplayEnumerator for XrandrEnumerator {
    fn list_displays(&self) -> Result<Vec<DisplayInfo>, DisplayQueryError> {
        let output = Command::new(&self.executable)
            .arg("--current")
            .stdin(Stdio::null())
            .output()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => DisplayQueryError::NotInstalled(self.executable.clone()),
                _ => DisplayQueryError::Failed {
                    tool: self.executable.clone(),
                    reason: err.to_string(),
                },
            })?;
        if !output.status.success() {
            return Err(DisplayQueryError::Failed {
                tool: self.executable.clone(),
                reason: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let displays = parse_xrandr(&String::from_utf8_lossy(&output.stdout));
        debug!(count = displays.len(), "enumerated displays");
        if displays.is_empty() {
            return Err(DisplayQueryError::NoDisplays(self.executable.clone()));
        }
        Ok(displays)
    }
}

/// Picks connected outputs out of `xrandr` output. Disconnected outputs and
/// mode lines are skipped.
pub fn parse_xrandr(output: &str) -> Vec<DisplayInfo> {
    output
        .lines()
        .filter(|line| line.contains(" connected"))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            if parts.next() != Some("connected") {
                return None;
            }
            let rest: Vec<&str> = parts.collect();
            let resolution = rest
                .iter()
                .find(|part| part.contains('x') && part.starts_with(|c: char| c.is_ascii_digit()))
                .map(|part| part.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            Some(DisplayInfo {
                name: name.to_string(),
                resolution,
                primary: rest.contains(&"primary"),
            })
        })
        .collect()
}

/// Resolves the `--display`/`--all` selection against connected displays.
///
/// Explicit names are used even when the enumerator is unavailable, so the
/// tool keeps working without `xrandr`; unknown names only produce a warning.
pub fn select_displays(
    enumerator: &dyn DisplayEnumerator,
    requested: &[String],
    all: bool,
) -> anyhow::Result<Vec<DisplayId>> {
    if !requested.is_empty() {
        match enumerator.list_displays() {
            Ok(connected) => {
                for name in requested {
                    if !connected.iter().any(|display| &display.name == name) {
                        warn!(display = %name, "display is not reported as connected");
                    }
                }
            }
            Err(err) => warn!(error = %err, "could not verify requested displays"),
        }
        let mut selected: Vec<DisplayId> = Vec::new();
        for name in requested {
            let id = DisplayId::new(name.clone());
            if !selected.contains(&id) {
                selected.push(id);
            }
        }
        return Ok(selected);
    }

    let connected = enumerator.list_displays()?;
    if all {
        return Ok(connected.iter().map(DisplayInfo::id).collect());
    }
    let primary = connected
        .iter()
        .find(|display| display.primary)
        .or_else(|| connected.first())
        .map(DisplayInfo::id);
    Ok(primary.into_iter().collect())
}
