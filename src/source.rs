//! Per-source capability set
//!
//! Everything that differs between sources (URLs, markup, how a closed
//! listing looks) lives behind [`SourceAdapter`]. The crawl core only ever
//! sees partition specs, listing pages of identities, and an opaque payload
//! with a [`StatusHint`].

use crate::fetcher::RawPage;
use crate::types::{EntityKey, RunContext};
use chrono::NaiveDate;

/// A partition as the source describes it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionSpec {
    /// Stable partition name (e.g. "amman/accounting")
    pub name: String,
    /// Page reporting the partition's aggregate listing count
    pub count_url: String,
    /// First listing page of the partition
    pub listing_url: String,
}

/// One listing discovered on a partition's listing page
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredListing {
    /// Source-scoped unique id
    pub source_id: String,
    /// Posting date as shown on the listing page
    pub observed_on: NaiveDate,
    /// Detail page locator
    pub locator: Option<String>,
}

impl DiscoveredListing {
    /// Identity of the discovered listing
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.source_id.clone(), self.observed_on)
    }
}

/// Parsed listing page
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Listings on this page, newest first as the source orders them
    pub listings: Vec<DiscoveredListing>,
    /// Total number of pages in the partition, when the page reports it
    pub total_pages: Option<u32>,
}

impl ListingPage {
    /// Oldest posting date on the page
    pub fn oldest(&self) -> Option<NaiveDate> {
        self.listings.iter().map(|l| l.observed_on).min()
    }
}

/// What the fetched content says about a listing's liveness
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusHint {
    /// Listing is active
    Open,
    /// Source explicitly marks the listing as removed or expired
    Closed,
    /// Source reports the listing as missing
    NotFound,
    /// Content lacks the structure needed to decide
    Ambiguous,
}

/// Fields extracted from a detail page
#[derive(Clone, Debug, PartialEq)]
pub struct Extraction {
    /// Liveness signal
    pub status: StatusHint,
    /// Source-specific fields (a JSON object)
    pub payload: serde_json::Value,
}

impl Extraction {
    /// Extraction carrying only a status
    pub fn status_only(status: StatusHint) -> Self {
        Self {
            status,
            payload: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

/// Reference to an entity handed to detail-page hooks
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityRef {
    /// Identity
    pub key: EntityKey,
    /// Partition the entity was discovered under
    pub partition: String,
    /// Detail page locator recorded at discovery
    pub locator: Option<String>,
}

/// Capability set implemented once per source
pub trait SourceAdapter: Send + Sync {
    /// Source name used in logs and reports
    fn name(&self) -> &str;

    /// Logical table every row of this source is keyed by
    fn table(&self) -> &str;

    /// Partitions making up the crawl space
    fn partitions(&self) -> Vec<PartitionSpec>;

    /// Aggregate listing count from a partition's count page
    ///
    /// `None` means the page did not contain a usable count; the partition is
    /// then treated like one whose count could not be fetched.
    fn parse_count(&self, partition: &PartitionSpec, page: &RawPage) -> Option<i64>;

    /// URL of listing page `page_number` (1-based) of a partition
    fn listing_url(&self, partition: &PartitionSpec, page_number: u32) -> String;

    /// Parse a listing page
    ///
    /// Relative dates ("Today", "Yesterday") are resolved against
    /// `ctx.run_date`.
    fn parse_listing(&self, partition: &PartitionSpec, page: &RawPage, ctx: &RunContext) -> ListingPage;

    /// Detail page URL for an entity, `None` if it cannot be re-fetched
    fn detail_url(&self, entity: &EntityRef) -> Option<String>;

    /// Alternative URL tried once when the detail URL fails
    fn fallback_detail_url(&self, _entity: &EntityRef) -> Option<String> {
        None
    }

    /// Extract status and payload from a detail page
    fn extract(&self, entity: &EntityRef, page: &RawPage) -> Extraction;
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn listing(id: &str, day: u32) -> DiscoveredListing {
        DiscoveredListing {
            source_id: id.to_string(),
            observed_on: NaiveDate::from_ymd_opt(2024, 2, day).unwrap(),
            locator: None,
        }
    }

    #[test]
    fn oldest_picks_minimum_date() {
        let page = ListingPage {
            listings: vec![listing("a", 20), listing("b", 3), listing("c", 11)],
            total_pages: Some(4),
        };
        assert_eq!(page.oldest(), NaiveDate::from_ymd_opt(2024, 2, 3));
    }

    #[test]
    fn oldest_of_empty_page_is_none() {
        assert_eq!(ListingPage::default().oldest(), None);
    }

    #[test]
    fn status_only_extraction_has_empty_object_payload() {
        let extraction = Extraction::status_only(StatusHint::Closed);
        assert_eq!(extraction.status, StatusHint::Closed);
        assert!(extraction.payload.as_object().unwrap().is_empty());
    }
}
