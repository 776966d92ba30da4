use anyhow::anyhow;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::Debug,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "WEATHER_ALERTS_CONFIG";

const DEFAULT_FORECAST_DAYS: u8 = 3;
const DEFAULT_SCHEDULE_TIME: &str = "07:30";
const DEFAULT_TIMEZONE: &str = "UTC";
const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Weather provider credentials and query defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub forecast_days: u8,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self { api_key: None, forecast_days: DEFAULT_FORECAST_DAYS }
    }
}

/// Bot credentials and the recipient access lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    pub bot_token: Option<String>,
    /// Recipient that is always whitelisted.
    pub admin_chat_id: Option<String>,
    pub whitelisted_users: Vec<String>,
    pub admins: Vec<String>,
}

/// Daily alert schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Local wall-clock time, `HH:MM`.
    pub time: String,
    /// IANA timezone name, e.g. `Europe/London`.
    pub timezone: String,
    /// Upper bound on concurrent deliveries during a dispatch run.
    pub max_concurrency: usize,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            time: DEFAULT_SCHEDULE_TIME.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// [telegram]
/// whitelisted_users = ["123"]
///
/// [locations]
/// "123" = ["Paris", "London"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderSettings,
    pub telegram: TelegramSettings,
    pub schedule: ScheduleSettings,
    /// Recipient id → locations in insertion order.
    pub locations: BTreeMap<String, Vec<String>>,
}

impl Config {
    /// Adds the admin chat to the whitelist if it is missing. Returns whether
    /// the whitelist changed.
    pub fn ensure_admin_whitelisted(&mut self) -> bool {
        let Some(admin) = self.telegram.admin_chat_id.as_deref().map(str::trim) else {
            return false;
        };

        if admin.is_empty() || self.telegram.whitelisted_users.iter().any(|u| u == admin) {
            return false;
        }

        self.telegram.whitelisted_users.push(admin.to_string());
        true
    }

    pub fn provider_api_key(&self) -> Option<&str> {
        self.provider.api_key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn bot_token(&self) -> Option<&str> {
        self.telegram.bot_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Read a config file, or return an empty default if it doesn't exist yet.
    pub fn load_from(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut cfg: Config = toml::from_str(&contents).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        // Entries are trimmed the same way the lists are written back.
        for list in [&mut cfg.telegram.whitelisted_users, &mut cfg.telegram.admins] {
            list.iter_mut().for_each(|id| *id = id.trim().to_string());
            list.retain(|id| !id.is_empty());
        }
        cfg.locations.retain(|_, locations| {
            locations.iter_mut().for_each(|l| *l = l.trim().to_string());
            locations.retain(|l| !l.is_empty());
            !locations.is_empty()
        });
        cfg.ensure_admin_whitelisted();

        Ok(cfg)
    }

    /// Write the whole snapshot next to `path` and rename it into place, so
    /// readers only ever observe a complete file.
    pub fn save_to(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let toml = toml::to_string_pretty(self)?;

        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, toml).map_err(|source| StoreError::Io { path: tmp.clone(), source })?;
        fs::rename(&tmp, path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }

    /// Path to the config file: `$WEATHER_ALERTS_CONFIG` or the platform config dir.
    pub fn config_file_path() -> anyhow::Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let dirs = ProjectDirs::from("dev", "weather-alerts", "weather-alerts")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Durable storage of the configuration snapshot.
pub trait ConfigStore: Send + Sync + Debug {
    fn load(&self) -> Result<Config, StoreError>;

    /// Persist a full snapshot. Either the whole snapshot is stored or nothing is.
    fn save(&self, snapshot: &Config) -> Result<(), StoreError>;
}

/// TOML file backed [`ConfigStore`].
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `$WEATHER_ALERTS_CONFIG` or the platform config directory.
    pub fn at_default_location() -> anyhow::Result<Self> {
        Ok(Self::new(Config::config_file_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<Config, StoreError> {
        Config::load_from(&self.path)
    }

    fn save(&self, snapshot: &Config) -> Result<(), StoreError> {
        Config::save_to(snapshot, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("absent.toml"));

        let cfg = store.load().expect("missing file is not an error");
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.schedule.time, "07:30");
        assert_eq!(cfg.provider.forecast_days, 3);
    }

    #[test]
    fn save_then_load_preserves_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("nested").join("config.toml"));

        let mut cfg = Config::default();
        cfg.provider.api_key = Some("KEY".into());
        cfg.telegram.whitelisted_users = vec!["1".into(), "2".into()];
        cfg.locations.insert("1".into(), vec!["Paris".into(), "London".into()]);

        store.save(&cfg).expect("save succeeds");
        let loaded = store.load().expect("load succeeds");

        assert_eq!(loaded, cfg);
        assert!(!store.path().with_extension("toml.tmp").exists());
    }

    #[test]
    fn admin_is_whitelisted_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[telegram]
admin_chat_id = "42"
whitelisted_users = [" 7 ", ""]

[locations]
"7" = ["Paris", " "]
"8" = []
"#,
        )
        .unwrap();

        let cfg = Config::load_from(&path).expect("config parses");

        assert_eq!(cfg.telegram.whitelisted_users, vec!["7".to_string(), "42".to_string()]);
        assert_eq!(cfg.locations.get("7"), Some(&vec!["Paris".to_string()]));
        assert!(!cfg.locations.contains_key("8"));
    }

    #[test]
    fn ensure_admin_whitelisted_is_idempotent() {
        let mut cfg = Config::default();
        cfg.telegram.admin_chat_id = Some("42".into());

        assert!(cfg.ensure_admin_whitelisted());
        assert!(!cfg.ensure_admin_whitelisted());
        assert_eq!(cfg.telegram.whitelisted_users, vec!["42".to_string()]);
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[schedule\ntime = ").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }
}
