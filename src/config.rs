use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::delta::{BaselinePolicy, Timeframe, default_timeframes};
use crate::fetch::FetchSettings;
use crate::groups::GroupSource;
use crate::history::{DEFAULT_RETENTION_DAYS, HISTORY_PATH};
use crate::transport::Credentials;
use crate::BOT_USERNAME;

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

const DEFAULT_SESSION_NAME: &str = "quantus_balance_session";
const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8080";

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,
    /// Group manifest. Empty means "discover `nodes*.txt`".
    #[serde(default)]
    pub groups: Vec<GroupSource>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot: BotConfig::default(),
            history: HistoryConfig::default(),
            report: ReportConfig::default(),
            timeframes: default_timeframes(),
            groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Bot contact the balance command is sent to.
    #[serde(default = "default_bot_username")]
    pub username: String,
}

fn default_bot_username() -> String {
    BOT_USERNAME.to_string()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            username: default_bot_username(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: PathBuf,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default)]
    pub baseline_policy: BaselinePolicy,
}

fn default_history_path() -> PathBuf {
    PathBuf::from(HISTORY_PATH)
}

fn default_retention_days() -> i64 {
    DEFAULT_RETENTION_DAYS
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            retention_days: default_retention_days(),
            baseline_policy: BaselinePolicy::default(),
        }
    }
}

impl HistoryConfig {
    pub fn retention(&self) -> Result<chrono::Duration, ConfigError> {
        chrono::Duration::try_days(self.retention_days).ok_or_else(|| ConfigError::Invalid {
            key: "history.retention_days",
            value: self.retention_days.to_string(),
            reason: "out of range",
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Append a `TOTAL (ALL)` section after the per-group sections.
    #[serde(default = "default_grand_total")]
    pub grand_total: bool,
}

fn default_grand_total() -> bool {
    true
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            grand_total: default_grand_total(),
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`AppConfig::load`], but a missing file means defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No {} found, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeframes.is_empty() {
            return Err(ConfigError::Invalid {
                key: "timeframes",
                value: "[]".into(),
                reason: "at least one timeframe is required",
            });
        }
        if self.history.retention_days <= 0 {
            return Err(ConfigError::Invalid {
                key: "history.retention_days",
                value: self.history.retention_days.to_string(),
                reason: "must be positive",
            });
        }
        self.history.retention()?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing {} in environment / .env", .0.join("/"))]
    MissingCredentials(Vec<&'static str>),

    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Process settings read from the environment.
#[derive(Debug, Clone)]
pub struct RuntimeEnv {
    pub fetch: FetchSettings,
    pub credentials: Credentials,
    /// `None` disables publishing.
    pub webhook_url: Option<Url>,
    pub session_name: String,
    pub relay_url: Url,
}

/// `DEBUG=1` in the process environment.
pub fn debug_from_env() -> bool {
    debug_flag(std::env::var("DEBUG").ok())
}

fn debug_flag(value: Option<String>) -> bool {
    value.is_some_and(|v| v.trim() == "1")
}

impl RuntimeEnv {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup; unset or blank keys fall
    /// back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = FetchSettings::default();

        let fetch = FetchSettings {
            reply_timeout: secs(&get, "REPLY_TIMEOUT", defaults.reply_timeout)?,
            step_wait: secs(&get, "STEP_WAIT", defaults.step_wait)?,
            delay_between: secs(&get, "DELAY_BETWEEN", defaults.delay_between)?,
        };

        let api_id = match get("API_ID") {
            Some(v) => v.parse::<i64>().map_err(|_| ConfigError::Invalid {
                key: "API_ID",
                value: v.clone(),
                reason: "expected an integer",
            })?,
            None => 0,
        };
        let api_hash = get("API_HASH");
        let phone = get("PHONE");

        let mut missing = Vec::new();
        if api_id == 0 {
            missing.push("API_ID");
        }
        if api_hash.is_none() {
            missing.push("API_HASH");
        }
        if phone.is_none() {
            missing.push("PHONE");
        }
        let (Some(api_hash), Some(phone), true) = (api_hash, phone, missing.is_empty()) else {
            return Err(ConfigError::MissingCredentials(missing));
        };

        let webhook_url = get("DISCORD_WEBHOOK")
            .map(|v| parse_url("DISCORD_WEBHOOK", v))
            .transpose()?;
        let relay_url = parse_url(
            "RELAY_URL",
            get("RELAY_URL").unwrap_or_else(|| DEFAULT_RELAY_URL.to_string()),
        )?;

        Ok(Self {
            fetch,
            credentials: Credentials {
                api_id,
                api_hash,
                phone,
            },
            webhook_url,
            session_name: get("SESSION_NAME").unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string()),
            relay_url,
        })
    }
}

fn secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    // Rejects negative, NaN and values past `Duration::MAX`
    match raw.parse::<f64>().map(Duration::try_from_secs_f64) {
        Ok(Ok(d)) => Ok(d),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected a non-negative number of seconds",
        }),
    }
}

fn parse_url(key: &'static str, raw: String) -> Result<Url, ConfigError> {
    Url::parse(&raw).map_err(|_| ConfigError::Invalid {
        key,
        value: raw,
        reason: "expected an absolute URL",
    })
}
