use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::{Error, Result};

/// Statuses worth asking again for: rate limiting and overloaded or unreachable upstreams.
const TRANSIENT_STATUSES: [StatusCode; 5] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Doubling delay between attempts, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `retry` (0 for the first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(retry.min(20)))
            .min(self.max)
    }

    /// Like [`Backoff::delay`], but a `Retry-After` from the server wins, still capped.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(wait) => wait.min(self.max),
            None => self.delay(retry),
        }
    }
}

/// GETs JSON documents with a timeout, retrying connection errors and transient statuses.
#[derive(Debug, Clone)]
pub struct RetryingClient {
    // Client uses Arc so we can clone cheaply
    client: Client,
    max_retries: u32,
    backoff: Backoff,
}

impl RetryingClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
            backoff: Backoff::new(
                Duration::from_millis(config.backoff_base_ms),
                Duration::from_millis(config.backoff_max_ms),
            ),
        })
    }

    /// Fetches `url` and parses the body as JSON. Returns the last failure once the
    /// retries are used up.
    pub async fn fetch(&self, url: &str) -> Result<Value> {
        let mut retry = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(body) => return parse_body(url, &body),
                Err(e) if is_retriable(&e) && retry < self.max_retries => {
                    let retry_after = match &e {
                        Error::Status { retry_after, .. } => *retry_after,
                        _ => None,
                    };
                    let delay = self.backoff.delay_for(retry, retry_after);
                    warn!(
                        url,
                        attempt = retry + 1,
                        ?delay,
                        error = %e,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "GET");
        let res = self.client.get(url).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(Error::Status {
                url: url.to_string(),
                status,
                retry_after: retry_after(res.headers()),
            });
        }
        Ok(res.bytes().await?.to_vec())
    }
}

/// `Retry-After` in its delay-seconds form. HTTP dates are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn is_retriable(err: &Error) -> bool {
    match err {
        Error::Reqwest(e) => !e.is_builder(),
        Error::Status { status, .. } => TRANSIENT_STATUSES.contains(status),
        _ => false,
    }
}

fn parse_body(url: &str, body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body).map_err(|source| Error::Decode {
        url: url.to_string(),
        source,
    })
}
