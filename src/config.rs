use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "FIREFLY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000/api".into()
}

fn default_user_agent() -> String {
    format!("firefly-client/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    /// Minimum interval between scroll-triggered fetch evaluations.
    #[serde(default = "default_throttle", with = "humantime_serde")]
    pub throttle: Duration,
    /// Base distance from the bottom, in pixels, that counts as "near".
    /// Scaled by rendered-item count before use.
    #[serde(default = "default_near_bottom_px")]
    pub near_bottom_px: f64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            throttle: default_throttle(),
            near_bottom_px: default_near_bottom_px(),
        }
    }
}

fn default_throttle() -> Duration {
    Duration::from_millis(300)
}

fn default_near_bottom_px() -> f64 {
    200.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AccountConfig {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix)?);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.api.base_url.is_empty() && other.api.base_url != default_base_url() {
        base.api.base_url = other.api.base_url;
    }
    if !other.api.user_agent.is_empty() && other.api.user_agent != default_user_agent() {
        base.api.user_agent = other.api.user_agent;
    }
    if other.api.timeout != default_timeout() {
        base.api.timeout = other.api.timeout;
    }

    if other.feed.throttle != default_throttle() {
        base.feed.throttle = other.feed.throttle;
    }
    if other.feed.near_bottom_px != default_near_bottom_px() {
        base.feed.near_bottom_px = other.feed.near_bottom_px;
    }

    if !other.account.email.is_empty() {
        base.account.email = other.account.email;
    }
    if !other.account.password.is_empty() {
        base.account.password = other.account.password;
    }

    if other.storage.path.is_some() {
        base.storage.path = other.storage.path;
    }

    base
}

fn load_env(prefix: &str) -> Result<Config> {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    if map.is_empty() {
        return Ok(Config::default());
    }

    let mut cfg = Config::default();

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.api.timeout = duration;
            }
        }
        "feed.throttle" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.feed.throttle = duration;
            }
        }
        "feed.near_bottom_px" => {
            if let Ok(parsed) = value.parse::<f64>() {
                cfg.feed.near_bottom_px = parsed;
            }
        }
        "account.email" => cfg.account.email = value,
        "account.password" => cfg.account.password = value,
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("firefly").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(LoadOptions {
            env_prefix: Some("FIREFLY_TEST_NONE".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(cfg.api.base_url, "http://127.0.0.1:5000/api");
        assert_eq!(cfg.feed.throttle, Duration::from_millis(300));
        assert_eq!(cfg.feed.near_bottom_px, 200.0);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "api:\n  base_url: https://feed.example/api\nfeed:\n  throttle: 500ms\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("FIREFLY_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.api.base_url, "https://feed.example/api");
        assert_eq!(cfg.feed.throttle, Duration::from_millis(500));
        assert_eq!(cfg.feed.near_bottom_px, 200.0);
    }

    #[test]
    fn env_overrides() {
        env::set_var("FIREFLY_TEST_ENV_API__BASE_URL", "https://env.example/api");
        let cfg = load(LoadOptions {
            env_prefix: Some("FIREFLY_TEST_ENV".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(cfg.api.base_url, "https://env.example/api");
        env::remove_var("FIREFLY_TEST_ENV_API__BASE_URL");
    }
}
