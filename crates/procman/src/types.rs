use std::fmt;
use std::time::SystemTime;

/// Opaque name of a physical output (e.g. `HDMI-1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayId(pub String);

impl DisplayId {
    pub fn new(id: impl Into<String>) -> Self {
        DisplayId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a wallpaper as assigned by the content source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WallpaperId(pub String);

impl WallpaperId {
    pub fn new(id: impl Into<String>) -> Self {
        WallpaperId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WallpaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-group id of a detached renderer. Equal to the renderer's pid
/// because the renderer is started as a session leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessGroupId(i32);

impl ProcessGroupId {
    pub fn new(raw: i32) -> Self {
        ProcessGroupId(raw)
    }

    pub fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProcessGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    pub display: DisplayId,
    pub wallpaper: WallpaperId,
}

impl ChangeRequest {
    pub fn new(display: DisplayId, wallpaper: WallpaperId) -> Self {
        Self { display, wallpaper }
    }
}

/// Read-only view of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedProcessInfo {
    pub display: DisplayId,
    pub wallpaper: WallpaperId,
    pub pgid: ProcessGroupId,
    pub launched_at: SystemTime,
}
