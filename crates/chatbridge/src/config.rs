//! Layered configuration.
//!
//! Defaults, then `config.toml`, then `CHATBRIDGE__SECTION__KEY` environment
//! variables.

use anyhow::{Context, Result, anyhow};
use ::config::{Config, Environment, File, FileFormat};
use log::info;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::client::{BackfillOptions, ClientOptions, CommandOptions, ReconnectPolicy, SessionPaths};
use crate::driver::{
    DriverFactory, DriverKind, MemoryDriverFactory, MemoryNetwork, SidecarDriverFactory,
    SidecarOptions,
};
use crate::ws::RelayOptions;

pub const APP_NAME: &str = "chatbridge";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub api: ApiConfig,
    pub driver: DriverConfig,
    pub session: SessionConfig,
    pub reconnect: ReconnectPolicy,
    pub backfill: BackfillOptions,
    pub commands: CommandOptions,
    pub relay: RelayOptions,
    pub paths: PathsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
            api: ApiConfig::default(),
            driver: DriverConfig::default(),
            session: SessionConfig::default(),
            reconnect: ReconnectPolicy::default(),
            backfill: BackfillOptions::default(),
            commands: CommandOptions::default(),
            relay: RelayOptions::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Adapter options with session directories resolved under `data_dir`.
    pub fn client_options(&self, data_dir: &Path) -> Result<ClientOptions> {
        let (auth_dir, cache_dir) = self.session.resolve(data_dir)?;
        Ok(ClientOptions {
            reconnect: self.reconnect.clone(),
            backfill: self.backfill.clone(),
            commands: self.commands.clone(),
            session: SessionPaths {
                auth_dir: Some(auth_dir),
                cache_dir: Some(cache_dir),
            },
            reinit_delay: Duration::from_millis(self.session.reinit_delay_ms),
        })
    }

    /// Driver factory for the configured driver kind.
    pub fn driver_factory(&self, data_dir: &Path) -> Result<Arc<dyn DriverFactory>> {
        match self.driver.kind {
            DriverKind::Sidecar => {
                let (auth_dir, cache_dir) = self.session.resolve(data_dir)?;
                Ok(Arc::new(SidecarDriverFactory::new(SidecarOptions {
                    base_url: self.driver.sidecar.base_url.clone(),
                    timeout: Duration::from_secs(self.driver.sidecar.timeout_secs),
                    auth_dir,
                    cache_dir,
                })))
            }
            DriverKind::Memory => Ok(Arc::new(MemoryDriverFactory::new(Arc::new(
                MemoryNetwork::demo(),
            )))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `error`, `warn`, `info`, `debug` or `trace`; `-v` raises it.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Key for `/api/bot/*`. Supports `env:VAR_NAME`.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("environment variable {0} referenced by api.api_key is not set")]
    EnvVarNotFound(String),
    #[error("environment variable {0} referenced by api.api_key is empty")]
    EnvVarEmpty(String),
}

impl ApiConfig {
    /// Resolve the API key, expanding `env:VAR_NAME` syntax.
    pub fn resolve_api_key(&self) -> Result<Option<String>, ConfigValidationError> {
        match self.api_key.as_deref() {
            None | Some("") => Ok(None),
            Some(value) => {
                if let Some(var_name) = value.strip_prefix("env:") {
                    match env::var(var_name) {
                        Ok(key) if !key.is_empty() => Ok(Some(key)),
                        Ok(_) => Err(ConfigValidationError::EnvVarEmpty(var_name.to_string())),
                        Err(_) => Err(ConfigValidationError::EnvVarNotFound(var_name.to_string())),
                    }
                } else {
                    Ok(Some(value.to_string()))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub kind: DriverKind,
    pub sidecar: SidecarConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:41900".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Defaults to `<data_dir>/session/auth`.
    pub auth_dir: Option<String>,
    /// Defaults to `<data_dir>/session/cache`.
    pub cache_dir: Option<String>,
    pub reinit_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_dir: None,
            cache_dir: None,
            reinit_delay_ms: 2_000,
        }
    }
}

impl SessionConfig {
    pub fn resolve(&self, data_dir: &Path) -> Result<(PathBuf, PathBuf)> {
        let session_root = data_dir.join("session");
        let auth_dir = match &self.auth_dir {
            Some(dir) => expand_str_path(dir)?,
            None => session_root.join("auth"),
        };
        let cache_dir = match &self.cache_dir {
            Some(dir) => expand_str_path(dir)?,
            None => session_root.join("cache"),
        };
        Ok((auth_dir, cache_dir))
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: Option<String>,
    pub state_dir: Option<String>,
}

/// Load configuration from `config_file` and `<env_prefix>__*` variables.
pub fn load_config(config_file: &Path, env_prefix: &str) -> Result<AppConfig> {
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .add_source(
            File::from(config_file)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(
            Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("reading config {}", config_file.display()))?;

    built
        .try_deserialize()
        .context("deserializing configuration")
}

/// Write the default configuration, creating parent directories.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))?;
    info!("wrote default config to {}", path.display());
    Ok(())
}

fn default_config_header(path: &Path) -> String {
    format!(
        "# Configuration for {APP_NAME}\n# File: {}\n\n",
        path.display()
    )
}

pub fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

pub fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

pub fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::data_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("share").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine data directory"))
}

pub fn default_state_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::state_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("state").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine state directory"))
}

/// `CHATBRIDGE`: upper-cased app name, non-alphanumerics as `_`.
pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::RelayMode;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.driver.kind, DriverKind::Sidecar);
        assert_eq!(config.session.reinit_delay_ms, 2_000);
        assert_eq!(config.reconnect.initial_delay_ms, 5_000);
        assert_eq!(config.backfill.messages_per_chat, 50);
        assert_eq!(config.commands.prefix, "!");
        assert_eq!(config.relay.mode, RelayMode::Subscription);
        assert!(config.api.api_key.is_none());
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(env_prefix(), "CHATBRIDGE");
    }

    #[test]
    fn test_default_config_roundtrips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        write_default_config(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Configuration for chatbridge"));

        let config = load_config(&path, "CHATBRIDGE_TEST_UNUSED").unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.relay.ping_interval_secs, 30);
    }

    #[test]
    fn test_file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[server]
port = 8088

[driver]
kind = "memory"

[relay]
mode = "broadcast"

[reconnect]
max_attempts = 3
"#,
        )
        .unwrap();

        let config = load_config(&path, "CHATBRIDGE_TEST_FILE").unwrap();
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.driver.kind, DriverKind::Memory);
        assert_eq!(config.relay.mode, RelayMode::Broadcast);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.max_delay_ms, 60_000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml"), "CHATBRIDGE_TEST_ABSENT").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn test_default_config_lists_only_used_sections() {
        let value = toml::Value::try_from(AppConfig::default()).unwrap();
        let table = value.as_table().unwrap();
        let mut keys: Vec<&str> = table.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "api", "backfill", "commands", "driver", "logging", "paths", "reconnect",
                "relay", "server", "session"
            ]
        );
        let logging = table["logging"].as_table().unwrap();
        assert_eq!(logging.keys().collect::<Vec<_>>(), vec!["level"]);
    }

    #[test]
    fn test_api_key_resolution() {
        let plain = ApiConfig {
            api_key: Some("secret".to_string()),
        };
        assert_eq!(plain.resolve_api_key().unwrap().as_deref(), Some("secret"));

        let empty = ApiConfig {
            api_key: Some(String::new()),
        };
        assert_eq!(empty.resolve_api_key().unwrap(), None);

        let missing = ApiConfig {
            api_key: Some("env:CHATBRIDGE_TEST_KEY_THAT_DOES_NOT_EXIST".to_string()),
        };
        assert_eq!(
            missing.resolve_api_key(),
            Err(ConfigValidationError::EnvVarNotFound(
                "CHATBRIDGE_TEST_KEY_THAT_DOES_NOT_EXIST".to_string()
            ))
        );
    }

    #[test]
    fn test_session_dirs_default_under_data_dir() {
        let config = SessionConfig::default();
        let (auth, cache) = config.resolve(Path::new("/var/lib/chatbridge")).unwrap();
        assert_eq!(auth, PathBuf::from("/var/lib/chatbridge/session/auth"));
        assert_eq!(cache, PathBuf::from("/var/lib/chatbridge/session/cache"));
    }

    #[test]
    fn test_client_options_carry_sections() {
        let mut config = AppConfig::default();
        config.session.reinit_delay_ms = 250;
        config.commands.enabled = false;
        let options = config.client_options(Path::new("/data")).unwrap();
        assert_eq!(options.reinit_delay, Duration::from_millis(250));
        assert!(!options.commands.enabled);
        assert_eq!(
            options.session.auth_dir,
            Some(PathBuf::from("/data/session/auth"))
        );
    }
}
