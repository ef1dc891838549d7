//! Bottlemail configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BottleError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BottleConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl BottleConfig {
    /// Load config from the default path (~/.bottlemail/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BottleError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| BottleError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| BottleError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `BOTTLEMAIL_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup("BOTTLEMAIL_DB") {
            self.store.path = db;
        }
        if let Some(host) = lookup("BOTTLEMAIL_MAIL_SERVER") {
            self.mail.smtp_host = host;
        }
        if let Some(port) = lookup("BOTTLEMAIL_MAIL_PORT") {
            match port.parse() {
                Ok(p) => self.mail.smtp_port = p,
                Err(_) => tracing::warn!("⚠️ Ignoring invalid BOTTLEMAIL_MAIL_PORT '{port}'"),
            }
        }
        if let Some(from) = lookup("BOTTLEMAIL_MAIL_FROM") {
            self.mail.from_address = from;
        }
        if let Some(password) = lookup("BOTTLEMAIL_MAIL_PASSWORD") {
            self.mail.password = password;
        }
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Bottlemail home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".bottlemail")
    }
}

/// Expand `~` in a configured path.
pub fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

/// Message store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file, or ":memory:".
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String { "~/.bottlemail/mailbox.db".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: default_store_path() }
    }
}

/// Task runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_lottery_cron")]
    pub lottery_cron: String,
    #[serde(default = "default_max_pending_tasks")]
    pub max_pending_tasks: usize,
    /// Directory for the pending-task JSON snapshot. None = in-memory only.
    #[serde(default)]
    pub snapshot_dir: Option<String>,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_message_concurrency")]
    pub message_concurrency: usize,
    #[serde(default = "default_notification_concurrency")]
    pub notification_concurrency: usize,
    #[serde(default = "default_default_concurrency")]
    pub default_concurrency: usize,
}

fn default_tick_interval_ms() -> u64 { 500 }
fn default_sweep_interval_secs() -> u64 { 15 * 60 }
fn default_lottery_cron() -> String { "0 0 1 * *".into() }
fn default_max_pending_tasks() -> usize { 10_000 }
fn default_retry_max_attempts() -> u32 { 3 }
fn default_retry_backoff_secs() -> u64 { 30 }
fn default_message_concurrency() -> usize { 4 }
fn default_notification_concurrency() -> usize { 2 }
fn default_default_concurrency() -> usize { 2 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            lottery_cron: default_lottery_cron(),
            max_pending_tasks: default_max_pending_tasks(),
            snapshot_dir: None,
            retry_max_attempts: default_retry_max_attempts(),
            retry_backoff_secs: default_retry_backoff_secs(),
            message_concurrency: default_message_concurrency(),
            notification_concurrency: default_notification_concurrency(),
            default_concurrency: default_default_concurrency(),
        }
    }
}

/// Mail transport mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailMode {
    Smtp,
    Log,
}

/// Outbound mail configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_mail_mode")]
    pub mode: MailMode,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    /// Empty = plain connection without auth.
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default = "default_mail_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_mail_mode() -> MailMode { MailMode::Log }
fn default_smtp_host() -> String { "localhost".into() }
fn default_smtp_port() -> u16 { 1025 }
fn default_from_address() -> String { "noreply@bottlemail.localhost".into() }
fn default_mail_timeout_secs() -> u64 { 10 }

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            mode: default_mail_mode(),
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: default_from_address(),
            timeout_secs: default_mail_timeout_secs(),
        }
    }
}

/// Mailbox economics and delivery behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    #[serde(default = "default_cancel_penalty")]
    pub cancel_penalty: i64,
    #[serde(default = "default_lottery_reward")]
    pub lottery_reward: i64,
    /// Deliver without enqueueing notifications.
    #[serde(default)]
    pub silent: bool,
}

fn default_cancel_penalty() -> i64 { 60 }
fn default_lottery_reward() -> i64 { 20 }

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            cancel_penalty: default_cancel_penalty(),
            lottery_reward: default_lottery_reward(),
            silent: false,
        }
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Header carrying the authenticated caller id, set by the upstream auth layer.
    #[serde(default = "default_user_header")]
    pub user_header: String,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 5000 }
fn default_user_header() -> String { "x-user-id".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user_header: default_user_header(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BottleConfig::default();
        assert_eq!(config.scheduler.sweep_interval_secs, 900);
        assert_eq!(config.scheduler.lottery_cron, "0 0 1 * *");
        assert_eq!(config.mailbox.cancel_penalty, 60);
        assert_eq!(config.mailbox.lottery_reward, 20);
        assert_eq!(config.mail.timeout_secs, 10);
        assert_eq!(config.mail.mode, MailMode::Log);
    }

    #[test]
    fn test_partial_toml() {
        let config = BottleConfig::from_toml(
            r#"
            [mail]
            mode = "smtp"
            smtp_host = "mail.example.com"

            [scheduler]
            sweep_interval_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.mail.mode, MailMode::Smtp);
        assert_eq!(config.mail.smtp_host, "mail.example.com");
        assert_eq!(config.mail.smtp_port, 1025);
        assert_eq!(config.scheduler.sweep_interval_secs, 60);
        assert_eq!(config.scheduler.retry_max_attempts, 3);
        assert_eq!(config.gateway.port, 5000);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            BottleConfig::from_toml("[mail\nmode = 1"),
            Err(BottleError::Config(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let mut config = BottleConfig::default();
        config.apply_overrides(|key| match key {
            "BOTTLEMAIL_MAIL_SERVER" => Some("smtp.test".into()),
            "BOTTLEMAIL_MAIL_PORT" => Some("not-a-port".into()),
            "BOTTLEMAIL_DB" => Some(":memory:".into()),
            _ => None,
        });
        assert_eq!(config.mail.smtp_host, "smtp.test");
        assert_eq!(config.mail.smtp_port, 1025);
        assert_eq!(config.store.path, ":memory:");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join("bottlemail-test-config");
        let path = dir.join("config.toml");
        let mut config = BottleConfig::default();
        config.gateway.port = 8088;
        config.save_to(&path).unwrap();

        let loaded = BottleConfig::load_from(&path).unwrap();
        assert_eq!(loaded.gateway.port, 8088);
        std::fs::remove_dir_all(&dir).ok();
    }
}
