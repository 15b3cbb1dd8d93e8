//! Configuration file management for foreman.
//!
//! Provides a TOML-based config file at `~/.config/foreman/config.toml` and
//! a resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use foreman_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub llm: LlmSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LlmSection {
    /// Binary invoked by the subprocess LLM driver, e.g. a coding-agent CLI
    /// on `$PATH`.
    pub binary: String,
    /// Extra arguments passed to the binary ahead of the prompt.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            binary: "true".to_string(),
            args: Vec::new(),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the foreman config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/foreman` or `~/.config/foreman`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("foreman");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("foreman")
}

/// Return the path to the foreman config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct ForemanConfig {
    pub db_config: DbConfig,
    pub llm_binary: String,
    pub llm_args: Vec<String>,
}

impl ForemanConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default.
    ///
    /// - DB URL: `cli_db_url` > `FOREMAN_DATABASE_URL` env > `config_file.database.url` > `DbConfig::DEFAULT_URL`
    /// - LLM binary: `FOREMAN_LLM_BINARY` env > `config_file.llm.binary` > `"true"`
    pub fn resolve(cli_db_url: Option<&str>) -> Self {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("FOREMAN_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        let (llm_binary, llm_args) = if let Ok(binary) = std::env::var("FOREMAN_LLM_BINARY") {
            (binary, Vec::new())
        } else if let Some(ref cfg) = file_config {
            (cfg.llm.binary.clone(), cfg.llm.args.clone())
        } else {
            (LlmSection::default().binary, Vec::new())
        };

        Self {
            db_config,
            llm_binary,
            llm_args,
        }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("foreman");
        let path = dir.join("config.toml");

        let original = ConfigFile {
            database: DatabaseSection {
                url: "sqlite:///tmp/testdb.sqlite".to_string(),
            },
            llm: LlmSection {
                binary: "claude".to_string(),
                args: vec!["--print".to_string()],
            },
        };

        std::fs::create_dir_all(&dir).unwrap();
        let contents = toml::to_string_pretty(&original).unwrap();
        std::fs::write(&path, &contents).unwrap();

        let loaded_contents = std::fs::read_to_string(&path).unwrap();
        let loaded: ConfigFile = toml::from_str(&loaded_contents).unwrap();

        assert_eq!(loaded.database.url, original.database.url);
        assert_eq!(loaded.llm.binary, original.llm.binary);
        assert_eq!(loaded.llm.args, original.llm.args);
    }

    #[test]
    fn resolve_with_cli_flag_overrides_all() {
        let _lock = lock_env();
        unsafe { std::env::set_var("FOREMAN_DATABASE_URL", "sqlite:///tmp/env.sqlite") };

        let config = ForemanConfig::resolve(Some("sqlite:///tmp/cli.sqlite"));
        assert_eq!(config.db_config.database_url, "sqlite:///tmp/cli.sqlite");

        unsafe { std::env::remove_var("FOREMAN_DATABASE_URL") };
    }

    #[test]
    fn resolve_defaults_db_url_when_nothing_set() {
        let _lock = lock_env();
        unsafe { std::env::remove_var("FOREMAN_DATABASE_URL") };

        let config = ForemanConfig::resolve(None);
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("foreman/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
