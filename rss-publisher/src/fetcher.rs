use crate::types::{FetchConfig, PipelineError, Result};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// Build the HTTP client every outbound integration shares settings with.
pub fn build_client(config: &FetchConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_seconds))
        .gzip(true)
        .deflate(true)
        .brotli(true)
        .build()?;
    Ok(client)
}

fn retry_policy(config: &FetchConfig) -> ExponentialBackoff<backoff::SystemClock> {
    let base = Duration::from_secs(config.retry_delay_seconds);
    ExponentialBackoff {
        current_interval: base,
        initial_interval: base,
        max_interval: base * 32,
        multiplier: 2.0,
        // `max_retries` bounds the loop instead of wall-clock time.
        max_elapsed_time: None,
        ..Default::default()
    }
}

/// Run `op` until it succeeds, fails permanently, or `max_retries` is spent.
///
/// Only idempotent calls go through here; creating posts, tags or media is
/// never retried in-run.
pub async fn with_retry<T, F, Fut>(config: &FetchConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = retry_policy(config);
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                let Some(delay) = backoff.next_backoff() else {
                    return Err(e);
                };
                attempt += 1;
                warn!("Attempt {} for {} failed ({}), retrying in {:?}", attempt, what, e, delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Turn a non-2xx response into an `Upstream` error carrying the body.
pub async fn ensure_success(service: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("Unknown").to_string());
    Err(PipelineError::upstream(service, status.as_u16(), message))
}

/// Retrying GET client with per-host pacing.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = build_client(&config)?;
        Ok(Self {
            client,
            config,
            last_request: Mutex::new(HashMap::new()),
        })
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let start = Instant::now();
        let content = with_retry(&self.config, url, move || async move {
            let response = self.get(url).await?;
            Ok(response.text().await?)
        })
        .await?;
        info!("Fetched {} ({} bytes in {} ms)", url, content.len(), start.elapsed().as_millis());
        Ok(content)
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        with_retry(&self.config, url, move || async move {
            let response = self.get(url).await?;
            Ok(response.bytes().await?.to_vec())
        })
        .await
    }

    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T> {
        with_retry(&self.config, url.path(), move || async move {
            let response = self.get(url.as_str()).await?;
            Ok(response.json::<T>().await?)
        })
        .await
    }

    async fn get(&self, url: &str) -> Result<Response> {
        self.apply_rate_limit(url).await?;
        // Query strings may carry API keys; keep them out of error messages.
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Http(e.without_url()))?;
        let host = host_of(url).unwrap_or_default();
        let response = ensure_success(&host, response).await?;

        if let Some(content_length) = response.content_length() {
            let size_mb = content_length as usize / (1024 * 1024);
            if size_mb > self.config.max_body_size_mb {
                return Err(PipelineError::BodyTooLarge { size_mb });
            }
        }
        Ok(response)
    }

    async fn apply_rate_limit(&self, url: &str) -> Result<()> {
        let host = host_of(url)?;
        let min_interval = Duration::from_millis(self.config.min_host_interval_ms);

        let mut last_request = self.last_request.lock().await;
        if let Some(previous) = last_request.get(&host) {
            let elapsed = previous.elapsed();
            if elapsed < min_interval {
                let wait_time = min_interval - elapsed;
                debug!("Rate limiting {}: waiting {:?}", host, wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }
        last_request.insert(host, Instant::now());
        Ok(())
    }
}

fn host_of(url: &str) -> Result<String> {
    let parsed = Url::parse(url)?;
    Ok(parsed.host_str().unwrap_or("").to_string())
}
