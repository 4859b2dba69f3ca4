use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use rand::prelude::*;
use wpeconfig::{Playlist, PlaylistMode, Settings};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("playlist '{0}' not found")]
    UnknownPlaylist(String),
    #[error("playlist '{0}' has no wallpapers to rotate")]
    EmptyPlaylist(String),
}

/// A display taking part in the rotation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId(pub String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        TargetId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Wallpapers cycled on a display, with the time each one stays up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotation {
    pub name: String,
    pub mode: PlaylistMode,
    pub interval: Duration,
    pub items: Vec<String>,
}

impl Rotation {
    pub fn new(
        name: impl Into<String>,
        mode: PlaylistMode,
        interval: Duration,
        items: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            mode,
            interval,
            items,
        }
    }

    /// A playlist without items rotates through the whole cache.
    pub fn from_playlist(name: &str, playlist: &Playlist, cached: &[String]) -> Self {
        let items = if playlist.uses_cache() {
            cached.to_vec()
        } else {
            playlist.items.clone()
        };
        Self::new(name, playlist.mode, playlist.interval, items)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionChange {
    pub target: TargetId,
    pub wallpaper: String,
    pub started_at: Instant,
}

pub struct Scheduler {
    playlists: HashMap<String, Rotation>,
    targets: BTreeMap<TargetId, TargetState>,
    rng: StdRng,
}

impl Scheduler {
    /// `cached` is the wallpaper cache in list order; it fills playlists
    /// that name no items.
    pub fn new(settings: &Settings, cached: &[String], seed: u64) -> Self {
        let playlists = settings
            .playlists
            .iter()
            .map(|(name, playlist)| {
                (
                    name.clone(),
                    Rotation::from_playlist(name, playlist, cached),
                )
            })
            .collect();
        Self {
            playlists,
            targets: BTreeMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn set_target(
        &mut self,
        target: TargetId,
        playlist: &str,
        now: Instant,
    ) -> Result<SelectionChange, SchedulerError> {
        let rotation = self
            .playlists
            .get(playlist)
            .ok_or_else(|| SchedulerError::UnknownPlaylist(playlist.to_string()))?
            .clone();
        self.set_rotation(target, rotation, now)
    }

    /// Binds `target` to a rotation that is not part of the settings file.
    pub fn set_rotation(
        &mut self,
        target: TargetId,
        rotation: Rotation,
        now: Instant,
    ) -> Result<SelectionChange, SchedulerError> {
        if rotation.items.is_empty() {
            return Err(SchedulerError::EmptyPlaylist(rotation.name));
        }
        let state = TargetState::new(rotation, now, &mut self.rng);
        let wallpaper = state.current_wallpaper().to_string();
        self.targets.insert(target.clone(), state);
        Ok(SelectionChange {
            target,
            wallpaper,
            started_at: now,
        })
    }

    pub fn skip_target(&mut self, target: &TargetId, now: Instant) -> Option<SelectionChange> {
        let state = self.targets.get_mut(target)?;
        if state.rotation.items.len() <= 1 {
            return None;
        }
        state.advance_to_next(now, &mut self.rng);
        Some(SelectionChange {
            target: target.clone(),
            wallpaper: state.current_wallpaper().to_string(),
            started_at: now,
        })
    }

    pub fn skip_all(&mut self, now: Instant) -> Vec<SelectionChange> {
        let targets: Vec<TargetId> = self.targets.keys().cloned().collect();
        targets
            .iter()
            .filter_map(|target| self.skip_target(target, now))
            .collect()
    }

    /// Advances every target whose interval has elapsed. Results come out in
    /// display-name order.
    pub fn tick(&mut self, now: Instant) -> Vec<SelectionChange> {
        let mut changes = Vec::new();
        for (target, state) in self.targets.iter_mut() {
            if state.advance_if_elapsed(now, &mut self.rng) {
                changes.push(SelectionChange {
                    target: target.clone(),
                    wallpaper: state.current_wallpaper().to_string(),
                    started_at: now,
                });
            }
        }
        changes
    }

    /// Time until the next target is due, or `None` when nothing rotates.
    pub fn next_due(&self, now: Instant) -> Option<Duration> {
        self.targets
            .values()
            .filter(|state| state.rotation.items.len() > 1)
            .map(|state| {
                (state.last_started + state.rotation.interval).saturating_duration_since(now)
            })
            .min()
    }
}

struct TargetState {
    rotation: Rotation,
    order: Vec<usize>,
    cursor: usize,
    last_started: Instant,
}

impl TargetState {
    fn new(rotation: Rotation, now: Instant, rng: &mut StdRng) -> Self {
        let order = build_order(rotation.items.len(), rotation.mode, None, rng);
        Self {
            rotation,
            order,
            cursor: 0,
            last_started: now,
        }
    }

    fn current_index(&self) -> usize {
        self.order[self.cursor]
    }

    fn current_wallpaper(&self) -> &str {
        &self.rotation.items[self.current_index()]
    }

    fn advance_if_elapsed(&mut self, now: Instant, rng: &mut StdRng) -> bool {
        if self.rotation.items.len() <= 1 {
            return false;
        }
        if now.saturating_duration_since(self.last_started) >= self.rotation.interval {
            self.advance_to_next(now, rng);
            true
        } else {
            false
        }
    }

    fn advance_to_next(&mut self, now: Instant, rng: &mut StdRng) {
        if self.rotation.items.len() <= 1 {
            self.last_started = now;
            return;
        }
        self.cursor += 1;
        if self.cursor >= self.order.len() {
            let previous = self.order.last().copied();
            self.order = build_order(self.rotation.items.len(), self.rotation.mode, previous, rng);
            self.cursor = 0;
        }
        self.last_started = now;
    }
}

/// Shuffled orders never start with `previous`, so a reshuffle does not show
/// the same wallpaper twice in a row.
fn build_order(
    len: usize,
    mode: PlaylistMode,
    previous: Option<usize>,
    rng: &mut StdRng,
) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    match mode {
        PlaylistMode::Continuous => {}
        PlaylistMode::Shuffle => {
            order.shuffle(rng);
            if len > 1 && order.first().copied() == previous {
                order.swap(0, len - 1);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
version = 1

[playlists.test]
mode = "continuous"
interval = 1
items = ["one", "two"]

[playlists.cache]
interval = 10
"#;

    fn settings() -> Settings {
        Settings::from_toml_str(CONFIG).unwrap()
    }

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn advances_continuous_playlist() {
        let mut scheduler = Scheduler::new(&settings(), &[], 1);
        let target = TargetId::new("HDMI-1");
        let mut now = Instant::now();
        let first = scheduler.set_target(target.clone(), "test", now).unwrap();
        assert_eq!(first.wallpaper, "one");

        now += Duration::from_millis(500);
        assert!(scheduler.tick(now).is_empty());

        now += Duration::from_millis(500);
        let changes = scheduler.tick(now);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].target, target);
        assert_eq!(changes[0].wallpaper, "two");

        now += Duration::from_secs(1);
        assert_eq!(scheduler.tick(now)[0].wallpaper, "one");
    }

    #[test]
    fn empty_playlist_rotates_through_cache() {
        let cached = ids(&["111", "222", "333"]);
        let mut scheduler = Scheduler::new(&settings(), &cached, 1);
        let target = TargetId::new("DP-1");
        let start = Instant::now();
        let first = scheduler.set_target(target.clone(), "cache", start).unwrap();
        assert_eq!(first.wallpaper, "111");
        assert_eq!(scheduler.next_due(start), Some(Duration::from_secs(10)));
        let changes = scheduler.tick(start + Duration::from_secs(10));
        assert_eq!(changes[0].wallpaper, "222");
    }

    #[test]
    fn empty_cache_rejects_target() {
        let mut scheduler = Scheduler::new(&settings(), &[], 1);
        let err = scheduler
            .set_target(TargetId::new("DP-1"), "cache", Instant::now())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::EmptyPlaylist(name) if name == "cache"));
        assert_eq!(scheduler.next_due(Instant::now()), None);
    }

    #[test]
    fn unknown_playlist_is_an_error() {
        let mut scheduler = Scheduler::new(&settings(), &[], 1);
        let err = scheduler
            .set_target(TargetId::new("DP-1"), "missing", Instant::now())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownPlaylist(_)));
    }

    #[test]
    fn shuffle_visits_every_item_before_repeating() {
        let items = ids(&["a", "b", "c", "d"]);
        let rotation = Rotation::new(
            "adhoc",
            PlaylistMode::Shuffle,
            Duration::from_secs(1),
            items.clone(),
        );
        let mut scheduler = Scheduler::new(&Settings::default(), &[], 42);
        let target = TargetId::new("HDMI-1");
        let mut now = Instant::now();
        let first = scheduler.set_rotation(target.clone(), rotation, now).unwrap();
        let mut seen = vec![first.wallpaper];
        for _ in 1..items.len() {
            now += Duration::from_secs(1);
            seen.push(scheduler.tick(now).remove(0).wallpaper);
        }
        let last = seen[seen.len() - 1].clone();
        seen.sort();
        assert_eq!(seen, items);

        now += Duration::from_secs(1);
        let next = scheduler.tick(now).remove(0).wallpaper;
        assert_ne!(next, last);
    }

    #[test]
    fn single_item_never_rotates() {
        let rotation = Rotation::new(
            "one",
            PlaylistMode::Continuous,
            Duration::from_secs(1),
            ids(&["solo"]),
        );
        let mut scheduler = Scheduler::new(&Settings::default(), &[], 3);
        let target = TargetId::new("HDMI-1");
        let now = Instant::now();
        scheduler.set_rotation(target.clone(), rotation, now).unwrap();
        assert!(scheduler.tick(now + Duration::from_secs(5)).is_empty());
        assert!(scheduler.skip_target(&target, now).is_none());
        assert_eq!(scheduler.next_due(now), None);
    }

    #[test]
    fn skip_advances_and_restarts_interval() {
        let mut scheduler = Scheduler::new(&settings(), &[], 11);
        let target = TargetId::new("HDMI-1");
        let start = Instant::now();
        scheduler.set_target(target.clone(), "test", start).unwrap();

        let skip_at = start + Duration::from_millis(900);
        let skipped = scheduler.skip_target(&target, skip_at).expect("skip result");
        assert_eq!(skipped.wallpaper, "two");
        assert!(scheduler.tick(start + Duration::from_secs(1)).is_empty());
        assert_eq!(scheduler.next_due(skip_at), Some(Duration::from_secs(1)));
    }

    #[test]
    fn skip_all_moves_every_display() {
        let mut scheduler = Scheduler::new(&settings(), &[], 5);
        let now = Instant::now();
        scheduler.set_target(TargetId::new("HDMI-1"), "test", now).unwrap();
        scheduler.set_target(TargetId::new("DP-1"), "test", now).unwrap();

        let changes = scheduler.skip_all(now);
        let targets: Vec<&str> = changes.iter().map(|c| c.target.as_str()).collect();
        assert_eq!(targets, vec!["DP-1", "HDMI-1"]);
        assert!(changes.iter().all(|c| c.wallpaper == "two"));
    }
}
