use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Config Error: {0}")]
    Config(String),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Request to {url} failed with status {status}")]
    Status {
        url: String,
        status: StatusCode,
        /// Wait the server asked for in its `Retry-After` header.
        retry_after: Option<Duration>,
    },
    #[error("Response from {url} is not valid JSON: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Toml Error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Failures of a single page request. The pager retries these instead of giving up.
    /// A request reqwest refuses to build is not one of them: asking again cannot help.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Reqwest(e) => !e.is_builder(),
            Error::Status { .. } | Error::Decode { .. } => true,
            _ => false,
        }
    }
}
