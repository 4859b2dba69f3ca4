//! Prepares a run: creates directories, loads settings and state, and turns
//! them into a configured lifecycle manager.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use procman::{LifecycleManager, ManagerConfig, OutputMode, RendererLauncher, Timings};
use tracing::debug;
use wpeconfig::{LifecycleSettings, OutputSetting, Settings};

use crate::cli::GlobalArgs;
use crate::paths::AppPaths;
use crate::state::AppState;

pub fn bootstrap_filesystem(paths: &AppPaths) -> Result<AppState> {
    for dir in [paths.config_dir(), paths.cache_dir()] {
        ensure_directory(dir)?;
    }
    AppState::load_or_default(&paths.state_file())
}

fn ensure_directory(path: &Path) -> Result<()> {
    if path.exists() {
        if path.is_dir() {
            debug!(path = %path.display(), "reusing existing directory");
            Ok(())
        } else {
            bail!("filesystem entry at {} is not a directory", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create wpectl directory at {}", path.display()))?;
        debug!(path = %path.display(), "created wpectl directory");
        Ok(())
    }
}

pub fn load_settings(paths: &AppPaths, global: &GlobalArgs) -> Result<Settings> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(|| paths.settings_file());
    if global.config.is_some() && !path.exists() {
        bail!("settings file {} does not exist", path.display());
    }
    let mut settings = Settings::load(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    if let Some(binary) = &global.renderer {
        settings.renderer.binary = binary.clone();
    }
    debug!(path = %path.display(), renderer = %settings.renderer.binary.display(), "loaded settings");
    Ok(settings)
}

/// Command line beats the value remembered from the last session, which
/// beats the settings file.
pub fn resolve_silent(global: &GlobalArgs, state: &AppState, settings: &Settings) -> bool {
    global
        .silent
        .or(state.silent)
        .unwrap_or(settings.renderer.silent)
}

pub fn timings(lifecycle: &LifecycleSettings) -> Timings {
    Timings {
        grace: lifecycle.grace,
        batch_grace: lifecycle.batch_grace,
        launch_spacing: lifecycle.launch_spacing,
        poll_interval: lifecycle.poll_interval,
        request_cooldown: lifecycle.request_cooldown,
        kill_after: lifecycle.kill_after,
    }
}

pub fn renderer_launcher(settings: &Settings) -> RendererLauncher {
    let output = match settings.renderer.output {
        OutputSetting::Discard => OutputMode::Discard,
        OutputSetting::Inherit => OutputMode::Inherit,
    };
    RendererLauncher::new(settings.renderer.binary.clone())
        .with_extra_args(settings.renderer.extra_args.clone())
        .with_output(output)
        .with_startup_check(settings.lifecycle.startup_check)
}

pub fn start_manager(settings: &Settings, silent: bool) -> Result<LifecycleManager> {
    let config = ManagerConfig {
        timings: timings(&settings.lifecycle),
        silent,
    };
    LifecycleManager::with_renderer(config, renderer_launcher(settings))
        .context("failed to start the renderer lifecycle manager")
}
