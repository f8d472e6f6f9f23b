//! REST Client - Bounded, Retrying JSON Client
//!
//! Wraps reqwest with a concurrency limit and exponential retries on
//! transient errors (429, 5xx, transport). Shared by the pull feed and
//! the order executor; each gets its own retry budget.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for the REST client.
#[derive(Debug, Clone)]
pub struct RestClientConfig {
  /// Base URL for relative paths.
  pub base_url: String,
  /// Request timeout.
  pub timeout: Duration,
  /// Maximum concurrent requests.
  pub max_concurrent: usize,
  /// Maximum retries on transient errors.
  pub max_retries: u32,
  /// Base delay between retries (exponential backoff).
  pub retry_base_delay: Duration,
}

impl Default for RestClientConfig {
  fn default() -> Self {
    Self {
      base_url: String::new(),
      timeout: Duration::from_secs(10),
      max_concurrent: 10,
      max_retries: 3,
      retry_base_delay: Duration::from_millis(200),
    }
  }
}

/// JSON-over-HTTP client with bounded concurrency.
#[derive(Debug, Clone)]
pub struct RestClient {
  http: Client,
  config: RestClientConfig,
  semaphore: Arc<Semaphore>,
}

impl RestClient {
  /// Create a new client.
  pub fn new(config: RestClientConfig) -> Result<Self> {
    let http = Client::builder()
      .timeout(config.timeout)
      .pool_max_idle_per_host(5)
      .build()
      .context("Failed to build HTTP client")?;

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

    Ok(Self {
      http,
      config,
      semaphore,
    })
  }

  /// GET an absolute URL and decode the JSON body.
  pub async fn get_url(&self, url: &str) -> Result<Value> {
    let request = self.http.get(url);
    self.execute_with_retry(request, "GET", url).await
  }

  /// POST a JSON body to a path under the base URL.
  pub async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Value> {
    let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
    let request = self.http.post(&url).json(body);
    self.execute_with_retry(request, "POST", path).await
  }

  /// Execute request with concurrency limiting and retries.
  async fn execute_with_retry(
    &self,
    request: RequestBuilder,
    method: &str,
    target: &str,
  ) -> Result<Value> {
    let _permit = self
      .semaphore
      .acquire()
      .await
      .context("Semaphore closed")?;

    let mut last_error = None;

    for attempt in 0..=self.config.max_retries {
      if attempt > 0 {
        let delay = self.config.retry_base_delay * 2u32.pow((attempt - 1).min(16));
        debug!(attempt, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "Retrying request");
        sleep(delay).await;
      }

      let req = request
        .try_clone()
        .context("Failed to clone request")?;

      match req.send().await {
        Ok(response) => match response.status() {
          status if status.is_success() => {
            return response
              .json::<Value>()
              .await
              .with_context(|| format!("{method} {target}: invalid JSON body"));
          }
          StatusCode::TOO_MANY_REQUESTS => {
            warn!(method, target, "Rate limited, backing off");
            last_error = Some(anyhow::anyhow!("{method} {target}: rate limited"));
          }
          status if status.is_server_error() => {
            warn!(method, target, status = %status, "Server error");
            last_error = Some(anyhow::anyhow!("{method} {target}: server error {status}"));
          }
          status => {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{method} {target}: API error {status}: {body}");
          }
        },
        Err(e) => {
          warn!(method, target, error = %e, attempt, "Request failed");
          last_error = Some(anyhow::Error::new(e).context(format!("{method} {target}")));
        }
      }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Max retries exceeded")))
  }
}
