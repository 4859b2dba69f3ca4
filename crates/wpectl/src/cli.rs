use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "wpectl",
    author,
    version,
    about = "Run Steam Workshop wallpapers on X11 displays through linux-wallpaperengine"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Settings file to use instead of `<config>/settings.toml`.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Renderer binary; overrides `renderer.binary` from the settings.
    #[arg(long, global = true, value_name = "BIN")]
    pub renderer: Option<PathBuf>,

    /// Pass `--silent` to the renderer (`true` by default).
    #[arg(long, global = true, value_name = "BOOL")]
    pub silent: Option<bool>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List connected displays (`*` marks the primary one).
    Displays,
    /// Print cached wallpaper subscriptions, optionally refreshing them from Steam.
    Wallpapers(WallpapersArgs),
    /// Show a wallpaper on one or more displays until interrupted.
    Set(SetArgs),
    /// Cycle wallpapers on the selected displays at a fixed interval.
    Rotate(RotateArgs),
    /// Re-apply the wallpapers recorded by the previous session.
    Restore,
    /// Print resolved directories and files.
    Where,
}

#[derive(Args, Debug, Default)]
pub struct WallpapersArgs {
    /// Scrape the subscription list from Steam and overwrite the cache.
    #[arg(long)]
    pub refresh: bool,

    /// Steam profile name; overrides `steam.username`.
    #[arg(long, value_name = "NAME")]
    pub user: Option<String>,

    /// Value of the `sessionid` cookie.
    #[arg(long, env = "STEAM_SESSIONID", hide_env_values = true)]
    pub session_id: Option<String>,

    /// Value of the `steamLoginSecure` cookie.
    #[arg(long, env = "STEAM_LOGIN_SECURE", hide_env_values = true)]
    pub login_secure: Option<String>,

    /// Full `Cookie:` header copied from the browser, as an alternative to
    /// the two cookie flags.
    #[arg(long, env = "STEAM_COOKIES", hide_env_values = true)]
    pub cookies: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DisplaySelection {
    /// Display to use (repeatable). Defaults to the primary display.
    #[arg(long = "display", short = 'd', value_name = "NAME")]
    pub displays: Vec<String>,

    /// Use every connected display.
    #[arg(long, conflicts_with = "displays")]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Workshop id of the wallpaper.
    #[arg(value_name = "WALLPAPER")]
    pub wallpaper: String,

    #[command(flatten)]
    pub selection: DisplaySelection,
}

#[derive(Args, Debug, Default)]
pub struct RotateArgs {
    /// Wallpaper ids to cycle through. Without ids the playlist (or the
    /// whole cache) is used.
    #[arg(value_name = "WALLPAPER")]
    pub wallpapers: Vec<String>,

    /// Playlist from the settings file.
    #[arg(long, value_name = "NAME", conflicts_with = "wallpapers")]
    pub playlist: Option<String>,

    /// Time each wallpaper stays up (`300`, `5m`, `1h 30m`).
    #[arg(long, value_name = "DURATION", value_parser = parse_interval)]
    pub interval: Option<Duration>,

    /// Randomise the order.
    #[arg(long)]
    pub shuffle: bool,

    #[command(flatten)]
    pub selection: DisplaySelection,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_interval(value: &str) -> Result<Duration, String> {
    let duration = wpeconfig::parse_duration(value)?;
    if duration.is_zero() {
        return Err("interval must be greater than zero".into());
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set_with_repeated_displays() {
        let cli = Cli::try_parse_from([
            "wpectl", "--silent", "false", "set", "123", "-d", "HDMI-1", "--display", "DP-1",
        ])
        .unwrap();
        assert_eq!(cli.global.silent, Some(false));
        let Command::Set(args) = cli.command else {
            panic!("expected set command");
        };
        assert_eq!(args.wallpaper, "123");
        assert_eq!(args.selection.displays, vec!["HDMI-1", "DP-1"]);
        assert!(!args.selection.all);
    }

    #[test]
    fn all_conflicts_with_explicit_displays() {
        assert!(Cli::try_parse_from(["wpectl", "set", "1", "--all", "-d", "HDMI-1"]).is_err());
    }

    #[test]
    fn parses_rotate_options() {
        let cli = Cli::try_parse_from([
            "wpectl", "rotate", "--interval", "90s", "--shuffle", "--all", "1", "2",
        ])
        .unwrap();
        let Command::Rotate(args) = cli.command else {
            panic!("expected rotate command");
        };
        assert_eq!(args.wallpapers, vec!["1", "2"]);
        assert_eq!(args.interval, Some(Duration::from_secs(90)));
        assert!(args.shuffle);
        assert!(args.selection.all);
    }

    #[test]
    fn rejects_zero_interval() {
        assert!(parse_interval("0").is_err());
        assert_eq!(parse_interval("300").unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn global_flags_are_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from(["wpectl", "where", "--renderer", "/opt/lwpe"]).unwrap();
        assert_eq!(cli.global.renderer, Some(PathBuf::from("/opt/lwpe")));
        assert!(matches!(cli.command, Command::Where));
    }
}
