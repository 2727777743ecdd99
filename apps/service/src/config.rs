use std::{env, fmt, fs, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::SchedulerSettings;
use crate::notification::NotificationSettings;
use crate::orchestrator::retention::RetentionPolicy;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file: {0}")]
    ReadFailed(#[source] std::io::Error),
    #[error("failed to write config file: {0}")]
    WriteFailed(#[source] std::io::Error),
    #[error("failed to parse config file: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("invalid value for {name}: {value}")]
    InvalidOverride { name: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub monitoring: Monitoring,
    pub retention: Retention,
    pub notifications: Notifications,
    pub database: Database,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Monitoring {
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub max_concurrent_probes: usize,
    pub stream_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Retention {
    pub max_history: usize,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notifications {
    pub reminder_interval_ms: u64,
    pub evaluation_interval_ms: u64,
    /// 0 retries on every evaluation
    pub retry_backoff_max_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    pub path: path::PathBuf,
    pub max_connections: usize,
}

impl Default for Monitoring {
    fn default() -> Self {
        Self { interval_ms: 30_000, timeout_ms: 5_000, max_concurrent_probes: 32, stream_capacity: 256 }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self { max_history: 5_000, cleanup_interval_secs: 3_600 }
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Self { reminder_interval_ms: 300_000, evaluation_interval_ms: 30_000, retry_backoff_max_ms: 0 }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self { path: "upwatch.db".into(), max_connections: 8 }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/upwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("upwatch/config.toml"))
}

fn parse_override<T: std::str::FromStr>(
    name: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<Option<T>, Error> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidOverride { name, value }),
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Monitoring")?;
        write_1(f, "Check Interval (ms)", &self.monitoring.interval_ms)?;
        write_1(f, "Probe Timeout (ms)", &self.monitoring.timeout_ms)?;
        write_1(f, "Max Concurrent Probes", &self.monitoring.max_concurrent_probes)?;
        write_1(f, "Live Stream Capacity", &self.monitoring.stream_capacity)?;

        write_title_1(f, "Retention")?;
        write_1(f, "Max History Per Target", &self.retention.max_history)?;
        write_1(f, "Cleanup Interval (s)", &self.retention.cleanup_interval_secs)?;

        write_title_1(f, "Notifications")?;
        write_1(f, "Reminder Interval (ms)", &self.notifications.reminder_interval_ms)?;
        write_1(f, "Evaluation Interval (ms)", &self.notifications.evaluation_interval_ms)?;
        write_1(f, "Retry Backoff Max (ms)", &self.notifications.retry_backoff_max_ms)?;

        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_1(f, "Max Connections", &self.database.max_connections)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/upwatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist.
    /// Environment overrides are applied on top and the result is validated.
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let mut config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(Error::ReadFailed)?;
            toml::from_str(raw_string.as_str())?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.apply_overrides(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::WriteFailed)?;
        }

        std::fs::write(path, config_str).map_err(Error::WriteFailed)
    }

    /// Apply `UPWATCH_*` overrides; `lookup` is `std::env::var` outside tests
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), Error> {
        if let Some(value) = parse_override("UPWATCH_INTERVAL_MS", &lookup)? {
            self.monitoring.interval_ms = value;
        }
        if let Some(value) = parse_override("UPWATCH_TIMEOUT_MS", &lookup)? {
            self.monitoring.timeout_ms = value;
        }
        if let Some(value) = parse_override("UPWATCH_MAX_HISTORY", &lookup)? {
            self.retention.max_history = value;
        }
        if let Some(value) = parse_override("UPWATCH_REMINDER_INTERVAL_MS", &lookup)? {
            self.notifications.reminder_interval_ms = value;
        }
        if let Some(path) = lookup("UPWATCH_DATABASE_PATH").filter(|p| !p.trim().is_empty()) {
            self.database.path = path.into();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Error> {
        let positive = [
            ("monitoring.interval_ms", self.monitoring.interval_ms as u128),
            ("monitoring.timeout_ms", self.monitoring.timeout_ms as u128),
            ("monitoring.max_concurrent_probes", self.monitoring.max_concurrent_probes as u128),
            ("monitoring.stream_capacity", self.monitoring.stream_capacity as u128),
            ("retention.max_history", self.retention.max_history as u128),
            ("retention.cleanup_interval_secs", self.retention.cleanup_interval_secs as u128),
            ("notifications.evaluation_interval_ms", self.notifications.evaluation_interval_ms as u128),
            ("database.max_connections", self.database.max_connections as u128),
        ];

        match positive.into_iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(Error::NotPositive(name)),
            None => Ok(()),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.monitoring.timeout_ms)
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            interval: Duration::from_millis(self.monitoring.interval_ms),
            max_concurrent_probes: self.monitoring.max_concurrent_probes,
            stream_capacity: self.monitoring.stream_capacity,
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_history: self.retention.max_history,
            cleanup_interval: Duration::from_secs(self.retention.cleanup_interval_secs),
        }
    }

    pub fn notification_settings(&self) -> NotificationSettings {
        NotificationSettings {
            reminder_interval: Duration::from_millis(self.notifications.reminder_interval_ms),
            evaluation_interval: Duration::from_millis(self.notifications.evaluation_interval_ms),
            retry_backoff_max: Duration::from_millis(self.notifications.retry_backoff_max_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.monitoring.interval_ms, 30_000);
        assert_eq!(config.monitoring.timeout_ms, 5_000);
        assert_eq!(config.retention.max_history, 5_000);
        assert_eq!(config.notifications.reminder_interval_ms, 300_000);
        assert_eq!(config.notifications.retry_backoff_max_ms, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_normalize_toml_path() {
        assert_eq!(normalize_toml_path(path::Path::new("/tmp/upwatch")), path::PathBuf::from("/tmp/upwatch.toml"));
        assert_eq!(normalize_toml_path(path::Path::new("/tmp/a.toml")), path::PathBuf::from("/tmp/a.toml"));
        assert_eq!(normalize_toml_path(path::Path::new("/tmp/a.json")), path::PathBuf::from("/tmp/a.toml"));
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        Config::from_config(Some(&path)).unwrap();
        assert!(path.exists());

        let written: Config = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            "[monitoring]\ninterval_ms = 1000\n\n[database]\npath = \"/var/lib/upwatch.db\"\n",
        )
        .unwrap();

        assert_eq!(config.monitoring.interval_ms, 1000);
        assert_eq!(config.monitoring.timeout_ms, 5_000);
        assert_eq!(config.database.path, path::PathBuf::from("/var/lib/upwatch.db"));
        assert_eq!(config.database.max_connections, 8);
        assert_eq!(config.retention, Retention::default());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(env_of(&[
                ("UPWATCH_INTERVAL_MS", "1500"),
                ("UPWATCH_TIMEOUT_MS", " 750 "),
                ("UPWATCH_MAX_HISTORY", "10"),
                ("UPWATCH_REMINDER_INTERVAL_MS", "60000"),
                ("UPWATCH_DATABASE_PATH", "/data/up.db"),
            ]))
            .unwrap();

        assert_eq!(config.monitoring.interval_ms, 1500);
        assert_eq!(config.monitoring.timeout_ms, 750);
        assert_eq!(config.retention.max_history, 10);
        assert_eq!(config.notification_settings().reminder_interval, Duration::from_secs(60));
        assert_eq!(config.database.path, path::PathBuf::from("/data/up.db"));
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let mut config = Config::default();
        let err = config.apply_overrides(env_of(&[("UPWATCH_INTERVAL_MS", "soon")])).unwrap_err();
        assert!(matches!(err, Error::InvalidOverride { name: "UPWATCH_INTERVAL_MS", .. }));
    }

    #[test]
    fn test_zero_values_fail_validation() {
        let mut config = Config::default();
        config.retention.max_history = 0;
        assert!(matches!(config.validate(), Err(Error::NotPositive("retention.max_history"))));

        let mut config = Config::default();
        config.monitoring.timeout_ms = 0;
        assert!(matches!(config.validate(), Err(Error::NotPositive("monitoring.timeout_ms"))));
    }

    #[test]
    fn test_from_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom");

        let mut config = Config::default();
        config.monitoring.max_concurrent_probes = 4;
        config.write_config(&normalize_toml_path(&path)).unwrap();

        let loaded = Config::from_config(Some(&path)).unwrap();
        assert_eq!(loaded.monitoring.max_concurrent_probes, 4);
    }

    #[test]
    fn test_display_lists_sections() {
        let rendered = Config::default().to_string();
        assert!(rendered.contains("Monitoring"));
        assert!(rendered.contains("Check Interval (ms): 30000"));
        assert!(rendered.contains("Max History Per Target: 5000"));
        assert!(rendered.contains("Path: upwatch.db"));
    }
}
