// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

const APP_DIR_NAME: &str = "jobserver";
const CONFIG_FILE_NAME: &str = "jobserver.toml";
const CONFIG_ENV_VAR: &str = "JOBSERVER_CONFIG_PATH";
const TOKEN_ENV_VAR: &str = "JOBSERVER_PLATFORM_TOKEN";
const DATABASE_FILE_NAME: &str = "jobserver.sqlite";
const STORAGE_DIR_NAME: &str = "storage";
const DEFAULT_PORT: u16 = 30000;
const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    database_path: Option<String>,
    storage_path: Option<String>,
    port: Option<u16>,
    platform_api_base: Option<String>,
    platform_token: Option<String>,
    verbose: Option<bool>,
}

#[derive(Debug)]
pub struct Config {
    pub database_path: PathBuf,
    pub storage_path: PathBuf,
    pub port: u16,
    pub platform_api_base: String,
    pub platform_token: String,
    pub verbose: bool,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub database_path: Option<PathBuf>,
    pub storage_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub verbose: Option<bool>,
}

pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    let (config_path, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), true),
            None => (default_config_path().ok(), false),
        },
    };

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let config_dir = config_path.as_deref().and_then(|path| path.parent());

    let database_path = match overrides.database_path {
        Some(path) => expand_path(path),
        None => match file_config.database_path {
            Some(raw) => resolve_path(&raw, config_dir),
            None => default_database_path().with_context(|| {
                "failed to resolve default database path; specify --database-path or set database_path in the config file"
            })?,
        },
    };

    let storage_path = match overrides.storage_path {
        Some(path) => expand_path(path),
        None => match file_config.storage_path {
            Some(raw) => resolve_path(&raw, config_dir),
            None => default_storage_path().with_context(|| {
                "failed to resolve default storage path; specify --storage-path or set storage_path in the config file"
            })?,
        },
    };

    let port = overrides
        .port
        .or(file_config.port)
        .unwrap_or(DEFAULT_PORT);
    if port == 0 {
        anyhow::bail!("port must be between 1 and 65535");
    }

    let platform_api_base = file_config
        .platform_api_base
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
    let platform_token = match std::env::var(TOKEN_ENV_VAR) {
        Ok(token) if !token.is_empty() => token,
        _ => file_config.platform_token.unwrap_or_default(),
    };

    let verbose = overrides
        .verbose
        .or(file_config.verbose)
        .unwrap_or(false);

    Ok(Config {
        database_path,
        storage_path,
        port,
        platform_api_base,
        platform_token,
        verbose,
        config_path,
    })
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn default_database_path() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(DATABASE_FILE_NAME))
}

fn default_storage_path() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(STORAGE_DIR_NAME))
}

fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("failed to resolve data directory")?;
    Ok(base.join(APP_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        prev: Option<OsString>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn clear(key: &'static str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(value) => {
                    // SAFETY: tests serialize env mutations with ENV_LOCK.
                    unsafe {
                        std::env::set_var(self.key, value);
                    }
                }
                None => {
                    // SAFETY: tests serialize env mutations with ENV_LOCK.
                    unsafe {
                        std::env::remove_var(self.key);
                    }
                }
            }
        }
    }

    #[test]
    fn missing_optional_config_file_is_ok() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("missing.toml");
        let cfg = read_config_file(&config_path, false).unwrap();
        assert!(cfg.database_path.is_none());
        assert!(cfg.port.is_none());
    }

    #[test]
    fn missing_required_config_file_errors() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("missing.toml");
        let err = read_config_file(&config_path, true).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn resolves_relative_paths_from_config_dir() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = EnvVarGuard::clear(CONFIG_ENV_VAR);
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join("config");
        fs::create_dir_all(&config_dir).unwrap();
        let config_path = config_dir.join("jobserver.toml");
        fs::write(
            &config_path,
            "database_path = \"db/jobserver.sqlite\"\nstorage_path = \"objects\"\nport = 40001\n",
        )
        .unwrap();

        let config = load(Some(config_path.clone()), Overrides::default()).unwrap();
        assert_eq!(
            config.database_path,
            config_dir.join("db").join("jobserver.sqlite")
        );
        assert_eq!(config.storage_path, config_dir.join("objects"));
        assert_eq!(config.port, 40001);
        assert_eq!(config.platform_api_base, DEFAULT_API_BASE);
        assert_eq!(config.config_path, Some(config_path));
    }

    #[test]
    fn cli_overrides_take_precedence_over_file_config() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = EnvVarGuard::clear(CONFIG_ENV_VAR);
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("jobserver.toml");
        fs::write(
            &config_path,
            "database_path = \"from_config.sqlite\"\nport = 40001\nverbose = false\n",
        )
        .unwrap();

        let config = load(
            Some(config_path),
            Overrides {
                database_path: Some(PathBuf::from("from_flag.sqlite")),
                storage_path: None,
                port: Some(40002),
                verbose: Some(true),
            },
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("from_flag.sqlite"));
        assert_eq!(config.port, 40002);
        assert!(config.verbose);
    }

    #[test]
    fn env_config_path_used_when_no_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _cleared = EnvVarGuard::clear(CONFIG_ENV_VAR);
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("jobserver.toml");
        fs::write(&config_path, "port = 40003\ndatabase_path = \"db.sqlite\"\nstorage_path = \"s\"\n").unwrap();
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, config_path.to_str().unwrap());

        let config = load(None, Overrides::default()).unwrap();
        assert_eq!(config.port, 40003);
        assert_eq!(config.config_path, Some(config_path));
    }

    #[test]
    fn token_env_var_wins_over_file_config() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _cleared = EnvVarGuard::clear(CONFIG_ENV_VAR);
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("jobserver.toml");
        fs::write(
            &config_path,
            "database_path = \"db.sqlite\"\nstorage_path = \"s\"\nplatform_token = \"from-file\"\n",
        )
        .unwrap();
        let _token = EnvVarGuard::set(TOKEN_ENV_VAR, "from-env");

        let config = load(Some(config_path), Overrides::default()).unwrap();
        assert_eq!(config.platform_token, "from-env");
    }

    #[test]
    fn zero_port_is_rejected() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _cleared = EnvVarGuard::clear(CONFIG_ENV_VAR);
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("jobserver.toml");
        fs::write(&config_path, "database_path = \"db.sqlite\"\nstorage_path = \"s\"\n").unwrap();

        let err = load(
            Some(config_path),
            Overrides {
                port: Some(0),
                ..Overrides::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("port must be between"));
    }

    #[test]
    fn ensure_parent_dir_creates_directories() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("jobserver.sqlite");
        ensure_parent_dir(&db_path).unwrap();
        assert!(dir.path().join("nested").is_dir());
    }
}
