//! Common test utilities for listing-tracker integration tests
//!
//! [`ScriptedSource`] serves canned pages from memory and counts every
//! request; [`TextAdapter`] understands a tiny line-based page format:
//!
//! - count pages: `count: 12`
//! - listing pages: one `id|YYYY-MM-DD` line per listing (`today` resolves to
//!   the run date) and an optional `pages: N` line
//! - detail pages: `status: open|closed|missing|<anything else>` plus
//!   optional `key: value` lines that end up in the payload

#![allow(dead_code)]
// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use listing_tracker::config::{PersistenceConfig, RetryConfig};
use listing_tracker::{
    Config, Crawler, DiscoveredListing, EntityRef, Extraction, FetchError, ListingPage,
    PageSource, PartitionSpec, RawPage, RunContext, SourceAdapter, StatusHint,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Canned response for one target
#[derive(Clone, Debug)]
pub enum Scripted {
    /// 200 with this body
    Page(String),
    /// Fails every attempt with this status
    Fail(u16),
}

/// In-memory [`PageSource`]
///
/// Targets without a script fail with 404.
#[derive(Default)]
pub struct ScriptedSource {
    pages: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<HashMap<String, u32>>,
    cancel_on: Mutex<Option<(String, CancellationToken)>>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve `body` for `target`
    pub fn page(&self, target: &str, body: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(target.to_string(), Scripted::Page(body.to_string()));
    }

    /// Fail every request for `target`
    pub fn fail(&self, target: &str, status: u16) {
        self.pages
            .lock()
            .unwrap()
            .insert(target.to_string(), Scripted::Fail(status));
    }

    /// Cancel `token` as soon as `target` is requested
    pub fn cancel_when(&self, target: &str, token: CancellationToken) {
        *self.cancel_on.lock().unwrap() = Some((target.to_string(), token));
    }

    /// Requests made for `target`, counting retries
    pub fn calls(&self, target: &str) -> u32 {
        self.calls.lock().unwrap().get(target).copied().unwrap_or(0)
    }

    /// Requests made across all targets
    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch_page(&self, target: &str) -> Result<RawPage, FetchError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(target.to_string())
            .or_insert(0) += 1;

        if let Some((trigger, token)) = self.cancel_on.lock().unwrap().as_ref() {
            if trigger == target {
                token.cancel();
            }
        }

        let scripted = self.pages.lock().unwrap().get(target).cloned();
        match scripted {
            Some(Scripted::Page(body)) => Ok(RawPage {
                url: target.to_string(),
                status: 200,
                body: body.into_bytes(),
            }),
            Some(Scripted::Fail(code)) => Err(FetchError::Status { code }),
            None => Err(FetchError::Status { code: 404 }),
        }
    }
}

/// [`SourceAdapter`] for the line-based test format
pub struct TextAdapter {
    pub name: String,
    pub table: String,
    pub base: String,
    pub partitions: Vec<String>,
    pub with_fallback: bool,
}

impl TextAdapter {
    pub fn new(name: &str, partitions: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            table: format!("{}.jobs", name),
            base: format!("mem://{}", name),
            partitions: partitions.iter().map(|p| p.to_string()).collect(),
            with_fallback: false,
        }
    }

    pub fn with_fallback(mut self) -> Self {
        self.with_fallback = true;
        self
    }

    pub fn count_url(&self, partition: &str) -> String {
        format!("{}/{}/count", self.base, partition)
    }

    pub fn page_url(&self, partition: &str, page_number: u32) -> String {
        format!("{}/{}/list?page={}", self.base, partition, page_number)
    }

    pub fn detail(&self, id: &str) -> String {
        format!("{}/ad/{}", self.base, id)
    }

    pub fn fallback(&self, id: &str) -> String {
        format!("{}/archive/ad/{}", self.base, id)
    }
}

impl SourceAdapter for TextAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn partitions(&self) -> Vec<PartitionSpec> {
        self.partitions
            .iter()
            .map(|name| PartitionSpec {
                name: name.clone(),
                count_url: self.count_url(name),
                listing_url: format!("{}/{}/list", self.base, name),
            })
            .collect()
    }

    fn parse_count(&self, _partition: &PartitionSpec, page: &RawPage) -> Option<i64> {
        page.text()
            .lines()
            .find_map(|line| line.strip_prefix("count:"))
            .and_then(|n| n.trim().parse().ok())
    }

    fn listing_url(&self, partition: &PartitionSpec, page_number: u32) -> String {
        format!("{}?page={}", partition.listing_url, page_number)
    }

    fn parse_listing(&self, _partition: &PartitionSpec, page: &RawPage, ctx: &RunContext) -> ListingPage {
        let mut parsed = ListingPage::default();
        for line in page.text().lines() {
            if let Some(total) = line.strip_prefix("pages:") {
                parsed.total_pages = total.trim().parse().ok();
                continue;
            }
            let Some((id, posted)) = line.split_once('|') else {
                continue;
            };
            let observed_on = match posted.trim() {
                "today" => ctx.run_date,
                other => match NaiveDate::parse_from_str(other, "%Y-%m-%d") {
                    Ok(date) => date,
                    Err(_) => continue,
                },
            };
            parsed.listings.push(DiscoveredListing {
                source_id: id.trim().to_string(),
                observed_on,
                locator: Some(self.detail(id.trim())),
            });
        }
        parsed
    }

    fn detail_url(&self, entity: &EntityRef) -> Option<String> {
        entity.locator.clone()
    }

    fn fallback_detail_url(&self, entity: &EntityRef) -> Option<String> {
        self.with_fallback
            .then(|| self.fallback(&entity.key.source_id))
    }

    fn extract(&self, _entity: &EntityRef, page: &RawPage) -> Extraction {
        let mut status = StatusHint::Ambiguous;
        let mut payload = serde_json::Map::new();
        for line in page.text().lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if key.trim() == "status" {
                status = match value {
                    "open" => StatusHint::Open,
                    "closed" => StatusHint::Closed,
                    "missing" => StatusHint::NotFound,
                    _ => StatusHint::Ambiguous,
                };
            } else {
                payload.insert(key.trim().to_string(), serde_json::Value::from(value));
            }
        }
        Extraction {
            status,
            payload: serde_json::Value::Object(payload),
        }
    }
}

/// Configuration with fast retries rooted in `dir`
pub fn test_config(dir: &TempDir) -> Config {
    Config {
        persistence: PersistenceConfig {
            database_path: dir.path().join("tracker.db"),
            export_dir: dir.path().join("exports"),
        },
        retry: RetryConfig {
            max_attempts: 2,
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        },
        ..Config::default()
    }
}

/// Crawler over a scripted source with a fresh database
pub async fn crawler(source: &Arc<ScriptedSource>) -> (Crawler, TempDir) {
    let dir = TempDir::new().unwrap();
    let crawler = Crawler::new(test_config(&dir), source.clone()).await.unwrap();
    (crawler, dir)
}

/// 08:00 UTC on the given day
pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 8, 0, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn context(adapter: &TextAdapter, now: DateTime<Utc>) -> RunContext {
    RunContext::new(adapter.name(), adapter.table(), now)
}
