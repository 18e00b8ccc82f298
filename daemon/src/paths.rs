/// Canonical file paths for LaunchWatch data files.
///
/// Both files live in one per-user directory, `%APPDATA%\LaunchWatch\` on
/// Windows and `$XDG_CONFIG_HOME/launchwatch/` (or `~/.config/launchwatch/`)
/// elsewhere:
///   - config.toml  Written by the settings UI, read by the daemon every check.
///   - status.toml  Written by the daemon, read by the settings UI.
use std::path::PathBuf;

#[cfg(windows)]
const APP_DIR_NAME: &str = "LaunchWatch";
#[cfg(not(windows))]
const APP_DIR_NAME: &str = "launchwatch";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the LaunchWatch application data directory.
///
/// Falls back to the system temp directory when no per-user location is
/// known, so the daemon still starts in stripped-down service environments.
pub fn app_data_dir() -> PathBuf {
    base_dir().unwrap_or_else(std::env::temp_dir).join(APP_DIR_NAME)
}

#[cfg(windows)]
fn base_dir() -> Option<PathBuf> {
    std::env::var_os("APPDATA").map(PathBuf::from)
}

#[cfg(not(windows))]
fn base_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
}

pub fn config_file_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

/// Status lives next to whichever config file is in use, so a `--config`
/// override keeps both files together.
pub fn status_file_path_for(config_path: &std::path::Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(STATUS_FILE_NAME),
        _ => PathBuf::from(STATUS_FILE_NAME),
    }
}
