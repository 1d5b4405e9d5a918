use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::push::Urgency;
use crate::push::crypto;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub reminders: RemindersConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token for the API. Optional on localhost binds only.
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_key: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Deserialize)]
pub struct PushConfig {
    /// URL-safe base64 raw P-256 scalar; `hydromate init` generates one.
    /// Empty means the transport refuses to start.
    #[serde(default)]
    pub vapid_private_key: String,
    /// VAPID `sub` claim; push services use it to contact the operator.
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u32,
    #[serde(default)]
    pub urgency: Urgency,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            vapid_private_key: String::new(),
            subject: default_subject(),
            ttl_seconds: default_ttl(),
            urgency: Urgency::default(),
        }
    }
}

fn default_subject() -> String {
    "mailto:ops@example.com".to_string()
}

fn default_ttl() -> u32 {
    300
}

#[derive(Debug, Deserialize)]
pub struct RemindersConfig {
    /// Deployment-wide IANA zone, the fallback for users without one.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Local hour at which the daily subscription cleanup runs.
    #[serde(default = "default_cleanup_hour")]
    pub cleanup_hour: u8,
    /// Disables test mode and manual triggers entirely.
    #[serde(default)]
    pub production_locked: bool,
    /// User ids allowed to select the everyMinuteTest frequency.
    #[serde(default)]
    pub test_accounts: Vec<Uuid>,
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            cleanup_hour: default_cleanup_hour(),
            production_locked: false,
            test_accounts: Vec::new(),
        }
    }
}

impl RemindersConfig {
    pub fn zone(&self) -> Result<Tz> {
        self.timezone
            .parse()
            .map_err(|_| anyhow::anyhow!("Unknown timezone '{}'", self.timezone))
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_cleanup_hour() -> u8 {
    4
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hydromate")
}

pub fn load(path: &str) -> Result<Config> {
    let path = expand_tilde(path);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config.toml")?;
    let expanded = config
        .store
        .base_dir
        .to_str()
        .filter(|dir| dir.starts_with("~/"))
        .map(expand_tilde);
    if let Some(base_dir) = expanded {
        config.store.base_dir = base_dir;
    }
    config.reminders.zone()?;
    anyhow::ensure!(
        config.reminders.cleanup_hour <= 23,
        "cleanup_hour must be in 0..=23, got {}",
        config.reminders.cleanup_hour
    );
    Ok(config)
}

/// Scaffold `~/.hydromate/` with a fresh VAPID key pair. Existing files are
/// left alone so re-running `init` is safe.
pub async fn init_config_dir() -> Result<()> {
    let base = default_base_dir();
    for dir in ["users", "subscriptions", "water"] {
        tokio::fs::create_dir_all(base.join(dir)).await?;
    }

    let config_path = base.join("config.toml");
    if !config_path.exists() {
        let (private_key, public_key) = crypto::generate_vapid_keys();
        tokio::fs::write(
            &config_path,
            format!(
                r#"[server]
bind = "127.0.0.1:8080"
# Required for non-localhost binds:
# api_key = "change-me"

[push]
# Generated by `hydromate init`. Hand the matching public key to the web
# client as the applicationServerKey for PushManager.subscribe():
#   {public_key}
vapid_private_key = "{private_key}"
subject = "mailto:ops@example.com"
ttl_seconds = 300
urgency = "normal"

[reminders]
timezone = "UTC"
cleanup_hour = 4
production_locked = false
# User ids allowed to use the everyMinuteTest frequency:
# test_accounts = ["00000000-0000-0000-0000-000000000000"]

# [store]
# base_dir = "~/.hydromate"
"#
            ),
        )
        .await?;
    }

    Ok(())
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&path[2..]);
        }
    }
    PathBuf::from(path)
}
