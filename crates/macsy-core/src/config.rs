//! Library configuration
//!
//! Values are layered, later layers winning:
//! 1. Built-in defaults
//! 2. TOML file (`$MACSY_CONFIG`, else `<config dir>/macsy/config.toml`)
//! 3. `MACSY_*` environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::storage::DEFAULT_BATCH_SIZE;

const ENV_PREFIX: &str = "MACSY";

/// Where the blackboard database lives and how it is read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the database file
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Database file name inside `data_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Documents fetched per round trip when streaming results
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Default log filter, used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
            batch_size: default_batch_size(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Resolve the config file location and load from it
    ///
    /// Overrides: MACSY_DATA_DIR, MACSY_DATABASE_FILE, MACSY_BATCH_SIZE,
    /// MACSY_LOG_LEVEL.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load `path` (defaults when it is absent), apply overrides and
    /// create the data directory
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = match path.exists() {
            true => Self::read_file(path)?,
            false => Self::default(),
        };
        config.apply_env_overrides()?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Parse TOML text and apply overrides; the data directory is left alone
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(toml_content).context("Invalid config TOML")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {:?}", path))?;
        toml::from_str(&text).with_context(|| format!("Invalid config file {:?}", path))
    }

    /// Apply environment variable overrides; empty values are ignored
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(dir) = env_value("DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(file) = env_value("DATABASE_FILE") {
            self.database_file = file;
        }
        if let Some(size) = env_value("BATCH_SIZE") {
            self.batch_size = size
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}_BATCH_SIZE: {:?}", ENV_PREFIX, size))?;
        }
        if let Some(level) = env_value("LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    fn ensure_data_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Cannot create data directory {:?}", self.data_dir))
    }

    pub fn config_file_path() -> PathBuf {
        if let Some(path) = env_value("CONFIG") {
            return PathBuf::from(path);
        }
        base_dir(dirs::config_dir()).join("config.toml")
    }

    /// Full path of the SQLite database file
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }
}

/// `<dir>/macsy`, or `./macsy` when the platform has no such directory
fn base_dir(dir: Option<PathBuf>) -> PathBuf {
    dir.unwrap_or_default().join("macsy")
}

/// Non-empty value of `MACSY_<key>`
fn env_value(key: &str) -> Option<String> {
    std::env::var(format!("{}_{}", ENV_PREFIX, key))
        .ok()
        .filter(|val| !val.is_empty())
}

fn default_data_dir() -> PathBuf {
    base_dir(dirs::data_local_dir())
}

fn default_database_file() -> String {
    "macsy.db".to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, MutexGuard};
    use tempfile::TempDir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Holds the env lock with every MACSY_* test variable cleared,
    /// putting the previous values back on drop
    struct EnvGuard {
        previous: Vec<(&'static str, Option<String>)>,
        _lock: MutexGuard<'static, ()>,
    }

    impl EnvGuard {
        fn new(vars: &[&'static str]) -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let previous = vars
                .iter()
                .map(|&name| {
                    let old = env::var(name).ok();
                    env::remove_var(name);
                    (name, old)
                })
                .collect();
            Self { previous, _lock: lock }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, old) in self.previous.drain(..) {
                if let Some(value) = old {
                    env::set_var(name, value);
                } else {
                    env::remove_var(name);
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "MACSY_CONFIG",
        "MACSY_DATA_DIR",
        "MACSY_DATABASE_FILE",
        "MACSY_BATCH_SIZE",
        "MACSY_LOG_LEVEL",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.data_dir.ends_with("macsy"));
        assert_eq!(config.database_file, "macsy.db");
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_database_path() {
        let config = Config {
            data_dir: PathBuf::from("/data/macsy"),
            ..Config::default()
        };
        assert_eq!(config.database_path(), PathBuf::from("/data/macsy/macsy.db"));
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("MACSY_DATA_DIR", "/tmp/macsy-test");
        env::set_var("MACSY_DATABASE_FILE", "blackboards.db");
        config.apply_env_overrides().unwrap();

        assert_eq!(config.database_path(), PathBuf::from("/tmp/macsy-test/blackboards.db"));
    }

    #[test]
    fn test_env_override_batch_size() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("MACSY_BATCH_SIZE", "250");
        config.apply_env_overrides().unwrap();
        assert_eq!(config.batch_size, 250);

        env::set_var("MACSY_BATCH_SIZE", "lots");
        assert!(config.apply_env_overrides().is_err());
    }

    #[test]
    fn test_env_override_log_level() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("MACSY_LOG_LEVEL", "debug");
        config.apply_env_overrides().unwrap();
        assert_eq!(config.log_level, "debug");

        // Empty string keeps the current value
        env::set_var("MACSY_LOG_LEVEL", "");
        config.apply_env_overrides().unwrap();
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: temp_dir.path().join("data"),
            database_file: "bb.db".to_string(),
            batch_size: 50,
            log_level: "warn".to_string(),
        };
        let path = temp_dir.path().join("macsy.toml");
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        env::set_var("MACSY_CONFIG", &path);
        assert_eq!(Config::config_file_path(), path);

        let loaded = Config::load().unwrap();
        assert_eq!(loaded.database_path(), temp_dir.path().join("data").join("bb.db"));
        assert_eq!(loaded.batch_size, 50);
        assert_eq!(loaded.log_level, "warn");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let _guard = EnvGuard::new(ENV_VARS);

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "batch_size = \"many\"").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            batch_size = 10
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.database_file, "macsy.db");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_load_from_path_creates_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("nested").join("data");
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, format!("data_dir = {:?}\n", data_dir)).unwrap();

        let config = Config::load_from_path(&config_path).unwrap();
        assert_eq!(config.data_dir, data_dir);
        assert!(data_dir.exists());
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let temp_dir = TempDir::new().unwrap();
        env::set_var("MACSY_DATA_DIR", temp_dir.path());

        let config = Config::load_from_path(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.data_dir, temp_dir.path());
        assert_eq!(config.batch_size, 100);
    }
}
