use std::collections::BTreeMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use procman::{sweep_strays, DisplayId, LifecycleManager, WallpaperId};
use scheduler::{Rotation, Scheduler, TargetId};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use workshop::{
    wallpaper_ids, SessionCredentials, SteamWorkshopClient, WallpaperCache, WallpaperSource,
};
use wpeconfig::{default_interval, PlaylistMode, Settings};

use crate::bootstrap::{bootstrap_filesystem, load_settings, resolve_silent, start_manager};
use crate::cli::{
    Cli, Command, DisplaySelection, GlobalArgs, RotateArgs, SetArgs, WallpapersArgs,
};
use crate::displays::{select_displays, DisplayEnumerator, XrandrEnumerator};
use crate::paths::AppPaths;
use crate::session::{apply_changes, apply_groups, run_session, SessionOutcome, SessionSignals};
use crate::state::AppState;

pub fn run(cli: Cli) -> Result<()> {
    let paths = AppPaths::discover()?;
    debug!(
        config = %paths.config_dir().display(),
        cache = %paths.cache_dir().display(),
        "resolved wpectl paths"
    );

    match cli.command {
        Command::Displays => run_displays(),
        Command::Wallpapers(args) => run_wallpapers(&paths, &cli.global, &args),
        Command::Set(args) => run_set(&paths, &cli.global, args),
        Command::Rotate(args) => run_rotate(&paths, &cli.global, &args),
        Command::Restore => run_restore(&paths, &cli.global),
        Command::Where => run_where(&paths, &cli.global),
    }
}

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run_displays() -> Result<()> {
    let displays = XrandrEnumerator::default().list_displays()?;
    for display in displays {
        let marker = if display.primary { '*' } else { ' ' };
        println!("{marker} {:<12} {}", display.name, display.resolution);
    }
    Ok(())
}

fn run_wallpapers(paths: &AppPaths, global: &GlobalArgs, args: &WallpapersArgs) -> Result<()> {
    let mut state = bootstrap_filesystem(paths)?;
    let cache = WallpaperCache::new(paths.wallpaper_cache_file());

    if args.refresh {
        let settings = load_settings(paths, global)?;
        let username = args
            .user
            .clone()
            .or_else(|| settings.steam.username.clone())
            .context("no Steam username; pass --user or set steam.username in the settings")?;
        let credentials = session_credentials(args)?;
        let client = SteamWorkshopClient::new(username, settings.steam.max_pages)?;
        let wallpapers = client
            .list_wallpapers(&credentials)
            .with_context(|| format!("failed to list subscriptions of {}", client.username()))?;
        cache.store(&wallpapers)?;
        state.mark_refreshed();
        state.persist(&paths.state_file())?;
        info!(count = wallpapers.len(), "refreshed wallpaper subscriptions");
    }

    let wallpapers = cache.load();
    if wallpapers.is_empty() {
        println!(
            "No cached wallpapers at {}. Run `wpectl wallpapers --refresh` to fetch them.",
            cache.path().display()
        );
        return Ok(());
    }
    for wallpaper in wallpapers {
        println!("{}  {}", wallpaper.id, wallpaper.preview_url);
    }
    Ok(())
}

fn session_credentials(args: &WallpapersArgs) -> Result<SessionCredentials> {
    if let Some(header) = &args.cookies {
        return SessionCredentials::from_cookie_header(header).context("invalid Steam cookie header");
    }
    match (&args.session_id, &args.login_secure) {
        (Some(session_id), Some(login_secure)) => {
            SessionCredentials::new(session_id.clone(), login_secure.clone())
                .context("invalid Steam session cookies")
        }
        _ => bail!(
            "Steam session cookies are required; set STEAM_SESSIONID and STEAM_LOGIN_SECURE \
             (or STEAM_COOKIES) from a logged-in browser"
        ),
    }
}

fn run_set(paths: &AppPaths, global: &GlobalArgs, args: SetArgs) -> Result<()> {
    let mut state = bootstrap_filesystem(paths)?;
    let settings = load_settings(paths, global)?;
    let displays = selected_displays(&args.selection)?;
    let wallpaper = WallpaperId::new(args.wallpaper);

    let foreground = Foreground::start(&settings, global, &mut state)?;
    if let [target] = displays.as_slice() {
        info!(display = %target, wallpaper = %wallpaper, "showing wallpaper");
        foreground
            .manager
            .request_change(target.clone(), wallpaper)?;
    } else {
        let mut grouped = BTreeMap::new();
        grouped.insert(wallpaper.as_str().to_string(), displays.clone());
        let failed = apply_groups(&foreground.manager, grouped)?;
        ensure_any_started(failed, displays.len())?;
    }

    let outcome = run_session(&foreground.manager, &foreground.signals, None);
    foreground.finish(outcome, &settings, &mut state, paths)
}

fn run_rotate(paths: &AppPaths, global: &GlobalArgs, args: &RotateArgs) -> Result<()> {
    let mut state = bootstrap_filesystem(paths)?;
    let settings = load_settings(paths, global)?;
    let cached = wallpaper_ids(&WallpaperCache::new(paths.wallpaper_cache_file()).load());
    let displays = selected_displays(&args.selection)?;

    let mut scheduler = Scheduler::new(&settings, &cached, rotation_seed());
    let now = Instant::now();
    let mut initial = Vec::with_capacity(displays.len());
    for target in &displays {
        let rotation = rotation_for(&settings, args, target, &cached)?;
        info!(
            display = %target,
            rotation = %rotation.name,
            wallpapers = rotation.items.len(),
            interval = ?rotation.interval,
            "rotating wallpapers"
        );
        let change = scheduler
            .set_rotation(TargetId::new(target.as_str()), rotation, now)
            .context("nothing to rotate; pass wallpaper ids or run `wpectl wallpapers --refresh`")?;
        initial.push(change);
    }

    let foreground = Foreground::start(&settings, global, &mut state)?;
    let failed = apply_changes(&foreground.manager, &initial)?;
    ensure_any_started(failed, initial.len())?;

    let outcome = run_session(&foreground.manager, &foreground.signals, Some(&mut scheduler));
    foreground.finish(outcome, &settings, &mut state, paths)
}

/// Ids on the command line win over a named playlist, which wins over the
/// playlist bound to the display. With none of those the whole cache
/// rotates.
fn rotation_for(
    settings: &Settings,
    args: &RotateArgs,
    display: &DisplayId,
    cached: &[String],
) -> Result<Rotation> {
    let mut rotation = if !args.wallpapers.is_empty() {
        Rotation::new(
            "command line",
            PlaylistMode::Continuous,
            default_interval(),
            args.wallpapers.clone(),
        )
    } else if let Some(name) = args
        .playlist
        .as_deref()
        .or_else(|| settings.playlist_for_display(display.as_str()))
    {
        let playlist = settings
            .playlist(name)
            .with_context(|| format!("playlist `{name}` is not defined in the settings"))?;
        Rotation::from_playlist(name, playlist, cached)
    } else {
        Rotation::new(
            "cache",
            PlaylistMode::Continuous,
            default_interval(),
            cached.to_vec(),
        )
    };

    if let Some(interval) = args.interval {
        rotation.interval = interval;
    }
    if args.shuffle {
        rotation.mode = PlaylistMode::Shuffle;
    }
    Ok(rotation)
}

fn rotation_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default()
}

fn run_restore(paths: &AppPaths, global: &GlobalArgs) -> Result<()> {
    let mut state = bootstrap_filesystem(paths)?;
    if state.assignments.is_empty() {
        bail!("no saved assignments in {}", paths.state_file().display());
    }
    let settings = load_settings(paths, global)?;

    let mut grouped: BTreeMap<String, Vec<DisplayId>> = BTreeMap::new();
    for (display, wallpaper) in &state.assignments {
        grouped
            .entry(wallpaper.clone())
            .or_default()
            .push(DisplayId::new(display.clone()));
    }
    let total = state.assignments.len();
    info!(displays = total, "restoring saved wallpapers");

    let foreground = Foreground::start(&settings, global, &mut state)?;
    let failed = apply_groups(&foreground.manager, grouped)?;
    ensure_any_started(failed, total)?;

    let outcome = run_session(&foreground.manager, &foreground.signals, None);
    foreground.finish(outcome, &settings, &mut state, paths)
}

fn run_where(paths: &AppPaths, global: &GlobalArgs) -> Result<()> {
    let settings_file = global
        .config
        .clone()
        .unwrap_or_else(|| paths.settings_file());
    println!("Configuration:");
    println!("  config:     {}", paths.config_dir().display());
    println!("  cache:      {}", paths.cache_dir().display());
    println!("  settings:   {}", settings_file.display());
    println!("  state:      {}", paths.state_file().display());
    println!("  wallpapers: {}", paths.wallpaper_cache_file().display());
    Ok(())
}

fn selected_displays(selection: &DisplaySelection) -> Result<Vec<DisplayId>> {
    let displays = select_displays(
        &XrandrEnumerator::default(),
        &selection.displays,
        selection.all,
    )?;
    if displays.is_empty() {
        bail!("no display selected");
    }
    Ok(displays)
}

fn ensure_any_started(failed: usize, attempted: usize) -> Result<()> {
    if attempted > 0 && failed >= attempted {
        bail!("no renderer could be started; check renderer.binary and its output");
    }
    Ok(())
}

/// A running lifecycle manager plus the signal flags of the session that
/// owns it.
struct Foreground {
    manager: LifecycleManager,
    signals: SessionSignals,
}

impl Foreground {
    fn start(settings: &Settings, global: &GlobalArgs, state: &mut AppState) -> Result<Self> {
        if let Some(silent) = global.silent {
            state.silent = Some(silent);
        }
        let silent = resolve_silent(global, state, settings);
        if settings.renderer.sweep_strays {
            sweep_strays(&settings.renderer.binary);
        }
        let signals = SessionSignals::install()?;
        let manager = start_manager(settings, silent)?;
        info!(
            renderer = %settings.renderer.binary.display(),
            silent,
            "lifecycle manager started"
        );
        Ok(Self { manager, signals })
    }

    /// Records what was showing, tears every renderer down and saves state.
    fn finish(
        self,
        outcome: SessionOutcome,
        settings: &Settings,
        state: &mut AppState,
        paths: &AppPaths,
    ) -> Result<()> {
        state.record_assignments(&self.manager.snapshot());
        if let Some(silent) = outcome.silent_toggled_to {
            state.silent = Some(silent);
        }
        if let Err(err) = self.manager.kill_all() {
            for failure in err.failures() {
                error!(error = %failure, "renderer teardown failed");
            }
        }
        drop(self.manager);
        if settings.renderer.sweep_strays {
            sweep_strays(&settings.renderer.binary);
        }
        state.persist(&paths.state_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn rotate_args(argv: &[&str]) -> RotateArgs {
        use clap::Parser;
        let mut full = vec!["wpectl", "rotate"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Rotate(args) => args,
            other => panic!("expected rotate, got {other:?}"),
        }
    }

    fn settings() -> Settings {
        Settings::from_toml_str(
            r#"
version = 1

[defaults]
playlist = "calm"

[playlists.calm]
interval = "10m"
items = ["11", "12"]

[playlists.everything]
mode = "shuffle"

[targets]
"DP-1" = "everything"
"#,
        )
        .unwrap()
    }

    #[test]
    fn command_line_ids_take_precedence() {
        let args = rotate_args(&["1", "2", "--interval", "30s"]);
        let rotation =
            rotation_for(&settings(), &args, &DisplayId::new("HDMI-1"), &[]).unwrap();
        assert_eq!(rotation.items, vec!["1", "2"]);
        assert_eq!(rotation.interval, Duration::from_secs(30));
        assert_eq!(rotation.mode, PlaylistMode::Continuous);
    }

    #[test]
    fn display_binding_falls_back_to_default_playlist() {
        let args = rotate_args(&[]);
        let cached = vec!["7".to_string(), "8".to_string()];

        let bound = rotation_for(&settings(), &args, &DisplayId::new("DP-1"), &cached).unwrap();
        assert_eq!(bound.name, "everything");
        assert_eq!(bound.items, cached);
        assert_eq!(bound.mode, PlaylistMode::Shuffle);

        let default = rotation_for(&settings(), &args, &DisplayId::new("HDMI-1"), &cached).unwrap();
        assert_eq!(default.name, "calm");
        assert_eq!(default.items, vec!["11", "12"]);
        assert_eq!(default.interval, Duration::from_secs(600));
    }

    #[test]
    fn unknown_playlist_is_an_error() {
        let args = rotate_args(&["--playlist", "missing"]);
        assert!(rotation_for(&settings(), &args, &DisplayId::new("HDMI-1"), &[]).is_err());
    }

    #[test]
    fn shuffle_flag_overrides_playlist_mode() {
        let args = rotate_args(&["--shuffle"]);
        let rotation =
            rotation_for(&Settings::default(), &args, &DisplayId::new("HDMI-1"), &["5".into()])
                .unwrap();
        assert_eq!(rotation.name, "cache");
        assert_eq!(rotation.mode, PlaylistMode::Shuffle);
    }

    #[test]
    fn cookie_header_beats_individual_cookies() {
        let args = WallpapersArgs {
            cookies: Some("sessionid=abc; steamLoginSecure=def".into()),
            ..WallpapersArgs::default()
        };
        let credentials = session_credentials(&args).unwrap();
        assert_eq!(credentials, SessionCredentials::new("abc", "def").unwrap());
        assert!(session_credentials(&WallpapersArgs::default()).is_err());
    }

    #[test]
    fn all_failed_launches_abort_the_session() {
        assert!(ensure_any_started(2, 2).is_err());
        assert!(ensure_any_started(1, 2).is_ok());
        assert!(ensure_any_started(0, 0).is_ok());
    }
}
