//! Typed settings for the follower runtime.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `FTL_` using `__` between sections
//! (for example `FTL_POLL__INTERVAL_MS=2000`). The result is validated before
//! it is handed out.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "FTL";

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_channel_capacity() -> usize {
    1_024
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// Settings for the leaderboard HTTP client.
#[derive(Clone, Debug, Deserialize)]
pub struct ApiConfig {
    /// API base; the connector default applies when unset.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Headers merged over the connector's default header set.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Upper bound on requests per second across all accounts.
    #[serde(default)]
    pub requests_per_second: Option<u32>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: default_timeout_ms(),
            headers: BTreeMap::new(),
            requests_per_second: None,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Capacity of the event channel between pollers and the consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Also write daily rolling log files into this directory.
    #[serde(default)]
    pub directory: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

/// One leaderboard account to follow.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AccountConfig {
    /// Encrypted user id as it appears in the leaderboard profile URL.
    pub uid: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl AccountConfig {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            label: None,
        }
    }

    /// Label used in logs, falling back to the uid.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.uid)
    }
}

impl AppConfig {
    /// Load and validate settings, reading `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        let config: AppConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Add accounts given on the command line, skipping ones already listed.
    pub fn merge_accounts<I, S>(&mut self, uids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for uid in uids {
            let uid = uid.into();
            if !self.accounts.iter().any(|account| account.uid == uid) {
                self.accounts.push(AccountConfig::new(uid));
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll.interval_ms == 0 {
            bail!("poll.interval_ms must be greater than zero");
        }
        if self.poll.channel_capacity == 0 {
            bail!("poll.channel_capacity must be greater than zero");
        }
        if self.api.timeout_ms == 0 {
            bail!("api.timeout_ms must be greater than zero");
        }
        if let Some(url) = &self.api.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("api.base_url must be an http(s) URL, got '{url}'");
            }
        }
        if self.api.requests_per_second == Some(0) {
            bail!("api.requests_per_second must be greater than zero when set");
        }
        let mut seen = HashSet::new();
        for account in &self.accounts {
            if account.uid.is_empty() {
                bail!("account uid must not be empty");
            }
            if account.uid.chars().any(char::is_whitespace) {
                bail!("account uid '{}' contains whitespace", account.uid);
            }
            if !seen.insert(account.uid.as_str()) {
                bail!("account uid '{}' is listed more than once", account.uid);
            }
        }
        Ok(())
    }
}
