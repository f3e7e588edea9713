//! Scraper configuration.
//!
//! Every field has a default, so a config file only needs the values it overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result, DEFAULT_BUCKET_SIZE, DEFAULT_PAGE_COUNT, ENDPOINT};

/// Leaderboard hosts the scraper knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Server {
    Www,
    Br,
    Friends,
}

impl Server {
    pub fn base_url(self) -> &'static str {
        match self {
            Server::Www => "https://www.kogama.com/",
            Server::Br => "https://www.kogama.com.br/",
            Server::Friends => "https://friends.kogama.com/",
        }
    }

    /// Name of the storage folder for this server.
    pub fn name(self) -> &'static str {
        match self {
            Server::Www => "www",
            Server::Br => "br",
            Server::Friends => "friends",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Parent of the per-server storage roots.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub crawl: CrawlConfig,
}

/// Remote API and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Records requested per page.
    #[serde(default = "default_count")]
    pub count: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first attempt on transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Pager and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Width of every rank bucket.
    #[serde(default = "default_bucket_size")]
    pub bucket_size: u64,

    /// Politeness delay between two page requests.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    /// Pause before retrying a page whose request failed.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// How often dirty buckets are written out.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("Data")
}

fn default_endpoint() -> String {
    ENDPOINT.to_string()
}

fn default_count() -> u32 {
    DEFAULT_PAGE_COUNT
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    800
}

fn default_backoff_max_ms() -> u64 {
    120_000
}

fn default_user_agent() -> String {
    format!("leaderscrap/{}", env!("CARGO_PKG_VERSION"))
}

fn default_bucket_size() -> u64 {
    DEFAULT_BUCKET_SIZE
}

fn default_pacing_ms() -> u64 {
    1000
}

fn default_retry_delay_ms() -> u64 {
    3000
}

fn default_flush_interval_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api: ApiConfig::default(),
            crawl: CrawlConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            count: default_count(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            bucket_size: default_bucket_size(),
            pacing_ms: default_pacing_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

impl Config {
    /// Loads the config from a TOML file, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                debug!(path = %path.display(), "loading config");
                let raw = std::fs::read_to_string(path)?;
                toml::from_str::<Config>(&raw)?
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.crawl.bucket_size == 0 {
            return Err(Error::Config("crawl.bucket_size must be at least 1".into()));
        }
        if self.api.count == 0 {
            return Err(Error::Config("api.count must be at least 1".into()));
        }
        Ok(())
    }

    /// Storage root of one server: `{data_dir}/{server}`.
    pub fn storage_root(&self, server: Server) -> PathBuf {
        self.data_dir.join(server.name())
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CrawlConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}
