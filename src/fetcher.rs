//! Page fetching behind a single recovery boundary
//!
//! [`Fetcher::fetch`] never returns an error: transient failures are retried
//! per [`RetryConfig`](crate::config::RetryConfig) and, once exhausted, come
//! back as [`FetchOutcome::Failed`]. Everything above this layer relies on
//! that.

use crate::config::{HttpConfig, RetryConfig};
use crate::error::{Error, FetchError, Result};
use crate::retry::retry_with_backoff;
use crate::types::Event;
use async_trait::async_trait;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::broadcast;
use url::Url;

/// Raw response from a source: opaque bytes plus a status code
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawPage {
    /// Final URL after redirects
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: Vec<u8>,
}

impl RawPage {
    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Transport collaborator: retrieves one page
///
/// Implementations are expected to apply their own rate limits. Errors are
/// classified by [`IsRetryable`](crate::retry::IsRetryable).
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch the page at `target`
    async fn fetch_page(&self, target: &str) -> std::result::Result<RawPage, FetchError>;
}

/// [`PageSource`] over HTTP(S)
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    /// Build a client with the configured timeout and user agent
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::config("http", format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpSource {
    async fn fetch_page(&self, target: &str) -> std::result::Result<RawPage, FetchError> {
        let url = Url::parse(target)
            .map_err(|e| FetchError::InvalidTarget(format!("{}: {}", target, e)))?;

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                code: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let body = response.bytes().await?;

        Ok(RawPage {
            url: final_url,
            status: status.as_u16(),
            body: body.to_vec(),
        })
    }
}

/// Description of a target that could not be fetched
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchFailure {
    /// Requested target
    pub target: String,
    /// Attempts made
    pub attempts: u32,
    /// Error from the final attempt
    pub last_error: String,
}

/// Result of a bounded-retry fetch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Page retrieved
    Fetched(RawPage),
    /// Every attempt failed
    Failed(FetchFailure),
}

impl FetchOutcome {
    /// The page, if the fetch succeeded
    pub fn page(&self) -> Option<&RawPage> {
        match self {
            FetchOutcome::Fetched(page) => Some(page),
            FetchOutcome::Failed(_) => None,
        }
    }
}

/// Bounded-retry wrapper around a [`PageSource`]
#[derive(Clone)]
pub struct Fetcher {
    source: Arc<dyn PageSource>,
    retry: RetryConfig,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl Fetcher {
    /// Wrap a source with the given retry policy
    pub fn new(source: Arc<dyn PageSource>, retry: RetryConfig) -> Self {
        Self {
            source,
            retry,
            event_tx: None,
        }
    }

    /// Emit per-attempt diagnostics on this channel
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Fetch `target`, retrying transient failures
    pub async fn fetch(&self, target: &str) -> FetchOutcome {
        let events = &self.event_tx;

        let result = retry_with_backoff(
            &self.retry,
            || {
                let source = Arc::clone(&self.source);
                async move { source.fetch_page(target).await }
            },
            |attempt, error| {
                tracing::warn!(target_url = %target, attempt, error = %error, "Fetch attempt failed");
                if let Some(tx) = events {
                    tx.send(Event::FetchAttemptFailed {
                        target: target.to_string(),
                        attempt,
                        error: error.to_string(),
                    })
                    .ok();
                }
            },
        )
        .await;

        match result {
            Ok(page) => FetchOutcome::Fetched(page),
            Err(exhausted) => {
                if let Some(tx) = &self.event_tx {
                    tx.send(Event::FetchExhausted {
                        target: target.to_string(),
                        attempts: exhausted.attempts,
                    })
                    .ok();
                }
                FetchOutcome::Failed(FetchFailure {
                    target: target.to_string(),
                    attempts: exhausted.attempts,
                    last_error: exhausted.error.to_string(),
                })
            }
        }
    }
}
