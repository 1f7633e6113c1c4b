use std::path::PathBuf;
use std::time::Duration;

/// Daemon-wide configuration. Values are fixed at construction time; there is
/// no user-facing config file; the one thing operators can override is where
/// synced-op dumps and logs land, via CLI flags.
#[derive(Debug, Clone)]
pub struct Preferences {
    pub upload_url: String,
    pub client_id: String,
    pub client_version: String,
    pub os_name: String,
    pub lock_filename: PathBuf,
    pub dump_directory: Option<PathBuf>,
    pub log_filename: Option<PathBuf>,
    pub scan_delay: Duration,
    pub sync_delay: Duration,
}

impl Preferences {
    pub fn new() -> Self {
        let cfg_home = config_home();
        Self {
            upload_url: "https://client.fitbit.com/device/tracker/uploadData".to_string(),
            client_id: "2ea32002-a079-48f4-8020-0badd22939e3".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            os_name: format!("fitbitd-{}", std::env::consts::OS),
            lock_filename: cfg_home.join("lock"),
            dump_directory: None,
            log_filename: None,
            scan_delay: Duration::from_secs(10),
            sync_delay: Duration::from_secs(15 * 60),
        }
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self::new()
    }
}

fn config_home() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("fitbitd");
        }
    }
    if let Some(dir) = dirs_next::home_dir() {
        return dir.join(".config").join("fitbitd");
    }
    PathBuf::from("/tmp/fitbitd")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_upstream_constants() {
        let prefs = Preferences::new();
        assert_eq!(prefs.upload_url, "https://client.fitbit.com/device/tracker/uploadData");
        assert_eq!(prefs.client_id, "2ea32002-a079-48f4-8020-0badd22939e3");
        assert_eq!(prefs.scan_delay, Duration::from_secs(10));
        assert_eq!(prefs.sync_delay, Duration::from_secs(900));
    }
}
