//! XDG directory helpers for config and log locations.

use std::path::PathBuf;

const APP_DIR: &str = "amqp-session";

/// Base directory for configuration files.
///
/// Uses `AMQP_SESSION_CONFIG_DIR` if set, otherwise
/// `$XDG_CONFIG_HOME/amqp-session` or `~/.config/amqp-session`.
pub(crate) fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("AMQP_SESSION_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }
    xdg_dir("XDG_CONFIG_HOME", &[".config"]).join(APP_DIR)
}

/// Default directory for rolling log files:
/// `$XDG_STATE_HOME/amqp-session/logs` or `~/.local/state/amqp-session/logs`.
pub(crate) fn log_dir() -> PathBuf {
    xdg_dir("XDG_STATE_HOME", &[".local", "state"])
        .join(APP_DIR)
        .join("logs")
}

fn xdg_dir(var: &str, home_fallback: &[&str]) -> PathBuf {
    std::env::var(var)
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
            home_fallback.iter().fold(home, |path, part| path.join(part))
        })
}
