use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub poller: PollerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollerConfig {
    /// Seconds between two polling cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Maximum number of feeds fetched per cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_port() -> u16 {
    8080
}

fn default_database_url() -> String {
    "sqlite:aggregator.db?mode=rwc".to_string()
}

fn default_interval_secs() -> u64 {
    60
}

fn default_batch_size() -> u32 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    "BlogAggregator/1.0 (RSS Aggregator)".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            database_url: default_database_url(),
            poller: PollerConfig::default(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// `DATABASE_URL` and `PORT` take precedence over the file.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(
            std::env::var("DATABASE_URL").ok(),
            std::env::var("PORT").ok().as_deref(),
        )
    }

    fn apply_overrides(
        &mut self,
        database_url: Option<String>,
        port: Option<&str>,
    ) -> anyhow::Result<()> {
        if let Some(url) = database_url {
            self.database_url = url;
        }
        if let Some(port) = port {
            self.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid PORT '{}': {}", port, e))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poller.interval_secs == 0 {
            anyhow::bail!("poller.interval_secs must be greater than zero");
        }
        if self.poller.batch_size == 0 {
            anyhow::bail!("poller.batch_size must be greater than zero");
        }
        if self.poller.request_timeout_secs == 0 {
            anyhow::bail!("poller.request_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}
