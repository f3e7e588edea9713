use chrono::Local;
use reqwest::Url;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::bucket::BucketStore;
use crate::checkpoint::{Checkpoint, CheckpointFile};
use crate::config::Config;
use crate::parse::{self, Envelope};
use crate::request::RetryingClient;
use crate::shutdown::Shutdown;
use crate::{info_time, Error, Result};

/// How a crawl run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// An empty page was reached. `page` is that empty page.
    Complete { page: u64 },
    /// A stop was requested. `next_page` is where the next run resumes.
    Stopped { next_page: u64 },
}

/// Walks the leaderboard one page at a time and files every record into its rank bucket.
///
/// Owns everything the loop touches: the HTTP client, the bucket cache, the checkpoint
/// and the stop flag.
pub struct Pager {
    base_url: String,
    config: Config,
    client: RetryingClient,
    store: BucketStore,
    checkpoint: CheckpointFile,
    shutdown: Shutdown,
}

impl Pager {
    pub fn new(
        base_url: impl Into<String>,
        root: &std::path::Path,
        config: Config,
        shutdown: Shutdown,
    ) -> Result<Self> {
        config.validate()?;
        let pager = Self {
            base_url: base_url.into(),
            client: RetryingClient::new(&config.api)?,
            store: BucketStore::new(root, config.crawl.bucket_size),
            checkpoint: CheckpointFile::new(root),
            shutdown,
            config,
        };
        pager.check_url()?;
        Ok(pager)
    }

    /// Page URLs must be absolute http(s) URLs, otherwise every request fails the same way.
    fn check_url(&self) -> Result<()> {
        let url = self.page_url(1);
        match Url::parse(&url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
            Ok(parsed) => Err(Error::Config(format!(
                "unsupported scheme '{}' in {url}, expected http or https",
                parsed.scheme()
            ))),
            Err(e) => Err(Error::Config(format!("invalid page URL {url}: {e}"))),
        }
    }

    pub fn store(&self) -> &BucketStore {
        &self.store
    }

    /// `{base}/{endpoint}?count={count}&page={page}`
    pub fn page_url(&self, page: u64) -> String {
        format!(
            "{}/{}?count={}&page={}",
            self.base_url.trim_end_matches('/'),
            self.config.api.endpoint.trim_start_matches('/'),
            self.config.api.count,
            page
        )
    }

    /// Runs until the leaderboard is exhausted or a stop is requested.
    /// Request failures are retried forever; storage failures end the run.
    pub async fn run(&mut self) -> Result<Outcome> {
        let start_time = Local::now();
        let mut state = self.checkpoint.load().await;
        if state.complete {
            info!(page = state.next_page, "previous crawl completed, checking the tail again");
        }
        info_time!("Started scraping at page {}", state.next_page);

        let mut total: Option<u64> = None;
        // `None` until the first flush, so the first committed page is written out right away.
        let mut last_flush: Option<Instant> = None;

        loop {
            if self.shutdown.is_requested() {
                self.commit(&state).await?;
                info_time!(start_time, "Stopped, resume at page {}", state.next_page);
                return Ok(Outcome::Stopped {
                    next_page: state.next_page,
                });
            }

            let page = state.next_page;
            let url = self.page_url(page);
            let body = match self.client.fetch(&url).await {
                Ok(body) => body,
                Err(e) if e.is_transport() => {
                    warn!(page, error = %e, "page request failed, retrying the same page");
                    sleep(self.config.crawl.retry_delay()).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let envelope = Envelope::from_value(body);
            if envelope.total.is_some() {
                total = envelope.total;
            }

            if envelope.records.is_empty() {
                state.complete = true;
                self.commit(&state).await?;
                info_time!(
                    start_time,
                    "Found EMPTY page {}, collected {} entries",
                    page,
                    self.store.collected()
                );
                return Ok(Outcome::Complete { page });
            }

            self.ingest(envelope.records, page).await?;

            state = Checkpoint {
                next_page: page + 1,
                complete: false,
            };
            self.checkpoint.save(&state).await?;

            self.report_progress(page, total);

            let interval = self.config.crawl.flush_interval();
            if last_flush.map_or(true, |at| at.elapsed() >= interval) {
                self.store.flush_dirty().await?;
                self.checkpoint.save(&state).await?;
                last_flush = Some(Instant::now());
            }

            sleep(self.config.crawl.pacing()).await;
        }
    }

    async fn ingest(&mut self, entries: Vec<serde_json::Value>, page: u64) -> Result<()> {
        for entry in entries {
            let Some(record) = parse::normalize(entry) else {
                warn!(page, "skipping entry that is not an object");
                continue;
            };
            let id = parse::identifier(&record);
            self.store.update(&id, record, page).await?;
        }
        Ok(())
    }

    /// Persists the checkpoint and every loaded bucket.
    async fn commit(&mut self, state: &Checkpoint) -> Result<()> {
        self.checkpoint.save(state).await?;
        let written = self.store.flush_all().await?;
        debug!(written, next_page = state.next_page, "committed crawl state");
        Ok(())
    }

    fn report_progress(&self, page: u64, total: Option<u64>) {
        let collected = self.store.collected();
        match total.and_then(|total| progress_percent(collected, total).map(|p| (total, p))) {
            Some((total, percent)) => info!(
                page,
                collected,
                total,
                "{:.6}% page={} collected={} total={}",
                percent,
                page,
                collected,
                total
            ),
            None => info!(page, collected, "page={} collected={}", page, collected),
        }
    }
}

/// Share of `total` collected so far, in percent. `None` when the total is unknown (0).
pub fn progress_percent(collected: usize, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(collected as f64 * 100.0 / total as f64)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn quick_config() -> Config {
        let mut config = Config::default();
        config.api.max_retries = 0;
        config.api.timeout_secs = 5;
        config.crawl.pacing_ms = 0;
        config.crawl.retry_delay_ms = 1;
        config.crawl.flush_interval_secs = 0;
        config
    }

    async fn mount_page(server: &MockServer, page: u64, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    fn new_pager(server: &MockServer, root: &std::path::Path, config: Config) -> Pager {
        Pager::new(server.uri(), root, config, Shutdown::new()).unwrap()
    }

    async fn requested_pages(server: &MockServer) -> Vec<String> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter_map(|req| {
                req.url
                    .query_pairs()
                    .find(|(k, _)| k == "page")
                    .map(|(_, v)| v.into_owned())
            })
            .collect()
    }

    #[test]
    fn progress_math() {
        assert_eq!(progress_percent(2500, 10000), Some(25.0));
        assert_eq!(progress_percent(10, 0), None);
    }

    #[test]
    fn page_url_shape() {
        let dir = tempfile::tempdir().unwrap();
        let pager = Pager::new(
            "https://www.kogama.com/",
            dir.path(),
            Config::default(),
            Shutdown::new(),
        )
        .unwrap();
        assert_eq!(
            pager.page_url(3),
            "https://www.kogama.com/api/leaderboard/top/?count=400&page=3"
        );
    }

    #[test]
    fn unusable_base_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for base_url in ["localhost:9", "not a url", "ftp://example.com"] {
            let res = Pager::new(base_url, dir.path(), Config::default(), Shutdown::new());
            assert!(
                matches!(res, Err(Error::Config(_))),
                "{base_url} should be rejected"
            );
        }
    }

    /// Serves one ranked record on pages 1 and 2, then fails page 3 for good.
    async fn mount_two_pages_then_outage(server: &MockServer) {
        mount_page(server, 1, json!([{"id": "a", "rank": 5}])).await;
        mount_page(server, 2, json!([{"id": "b", "rank": 1500}])).await;
        Mock::given(method("GET"))
            .and(query_param("page", "3"))
            .respond_with(ResponseTemplate::new(502))
            .mount(server)
            .await;
    }

    /// Runs until the pager is stuck retrying, then abandons it like a crash would.
    async fn crawl_until_stuck(pager: &mut Pager) {
        let res = tokio::time::timeout(std::time::Duration::from_millis(300), pager.run()).await;
        assert!(res.is_err(), "an outage must not end the run");
    }

    #[tokio::test]
    async fn first_page_is_flushed_then_flushes_wait_for_the_interval() {
        let server = MockServer::start().await;
        mount_two_pages_then_outage(&server).await;
        let dir = tempfile::tempdir().unwrap();

        let mut config = quick_config();
        config.crawl.flush_interval_secs = 3600;
        let mut pager = new_pager(&server, dir.path(), config);
        crawl_until_stuck(&mut pager).await;

        assert!(dir.path().join("1to1000").join("data.json").exists());
        assert!(!dir.path().join("1001to2000").join("data.json").exists());
        assert!(pager.store().is_dirty(&crate::bucket::BucketKey::for_rank(1500, 1000)));
        assert_eq!(CheckpointFile::new(dir.path()).load().await.next_page, 3);
    }

    #[tokio::test]
    async fn elapsed_interval_flushes_dirty_buckets_mid_crawl() {
        let server = MockServer::start().await;
        mount_two_pages_then_outage(&server).await;
        let dir = tempfile::tempdir().unwrap();

        let mut pager = new_pager(&server, dir.path(), quick_config());
        crawl_until_stuck(&mut pager).await;

        for bucket in ["1to1000", "1001to2000"] {
            assert!(dir.path().join(bucket).join("data.json").exists(), "{bucket}");
        }
        let saved = CheckpointFile::new(dir.path()).load().await;
        assert_eq!(
            saved,
            Checkpoint {
                next_page: 3,
                complete: false
            }
        );
    }

    #[tokio::test]
    async fn resumes_from_checkpoint() {
        let server = MockServer::start().await;
        mount_page(&server, 7, json!({"data": [], "total": 100})).await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("last.json"), r#"{"page": 7}"#).unwrap();

        let mut pager = new_pager(&server, dir.path(), quick_config());
        let outcome = pager.run().await.unwrap();

        assert_eq!(outcome, Outcome::Complete { page: 7 });
        assert_eq!(requested_pages(&server).await, vec!["7"]);
    }

    #[tokio::test]
    async fn empty_page_completes_without_advancing() {
        let server = MockServer::start().await;
        mount_page(&server, 1, json!([{"id": 1, "rank": 1}])).await;
        mount_page(&server, 2, json!([])).await;
        let dir = tempfile::tempdir().unwrap();

        let mut pager = new_pager(&server, dir.path(), quick_config());
        assert_eq!(pager.run().await.unwrap(), Outcome::Complete { page: 2 });

        let saved = CheckpointFile::new(dir.path()).load().await;
        assert_eq!(
            saved,
            Checkpoint {
                next_page: 2,
                complete: true
            }
        );
        assert_eq!(requested_pages(&server).await, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn unknown_shape_counts_as_end_of_data() {
        let server = MockServer::start().await;
        mount_page(&server, 1, json!({"message": "maintenance"})).await;
        let dir = tempfile::tempdir().unwrap();

        let mut pager = new_pager(&server, dir.path(), quick_config());
        assert_eq!(pager.run().await.unwrap(), Outcome::Complete { page: 1 });
    }

    #[tokio::test]
    async fn failed_page_is_retried_not_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .with_priority(2)
            .mount(&server)
            .await;
        mount_page(&server, 1, json!([{"id": 1, "rank": 3}])).await;
        mount_page(&server, 2, json!([])).await;
        let dir = tempfile::tempdir().unwrap();

        let mut pager = new_pager(&server, dir.path(), quick_config());
        assert_eq!(pager.run().await.unwrap(), Outcome::Complete { page: 2 });

        assert_eq!(requested_pages(&server).await, vec!["1", "1", "1", "2"]);
        assert_eq!(pager.store().collected(), 1);
    }

    #[tokio::test]
    async fn stop_request_is_honoured_before_the_next_fetch() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("last.json"), r#"{"page": 4}"#).unwrap();
        let shutdown = Shutdown::new();
        shutdown.request();

        let mut pager = Pager::new(server.uri(), dir.path(), quick_config(), shutdown)
            .unwrap();
        assert_eq!(pager.run().await.unwrap(), Outcome::Stopped { next_page: 4 });

        assert!(requested_pages(&server).await.is_empty());
        assert_eq!(CheckpointFile::new(dir.path()).load().await.next_page, 4);
    }

    #[tokio::test]
    async fn stop_mid_crawl_keeps_fetched_pages() {
        let server = MockServer::start().await;
        mount_page(&server, 1, json!([{"id": "a", "rank": 10}])).await;
        mount_page(&server, 2, json!([{"id": "b", "rank": 20}])).await;
        let dir = tempfile::tempdir().unwrap();
        let shutdown = Shutdown::new();

        let mut config = quick_config();
        config.crawl.pacing_ms = 200;
        config.crawl.flush_interval_secs = 3600;
        let mut pager = Pager::new(server.uri(), dir.path(), config, shutdown.clone())
            .unwrap();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            shutdown.request();
        });
        let outcome = pager.run().await.unwrap();
        stopper.await.unwrap();

        assert_eq!(outcome, Outcome::Stopped { next_page: 2 });
        let bucket: crate::bucket::Bucket = serde_json::from_slice(
            &std::fs::read(dir.path().join("1to1000").join("data.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(bucket["a"].pages, vec![1]);
        assert_eq!(requested_pages(&server).await, vec!["1"]);
    }
}
