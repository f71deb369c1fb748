use crate::db::*;
use crate::types::{EntityKey, EntityStatus};
use chrono::NaiveDate;

mod archive;
mod close;
mod partitions;

const TABLE: &str = "olx.jobs";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn ts(y: i32, m: u32, d: u32) -> i64 {
    date(y, m, d).and_hms_opt(8, 0, 0).unwrap().and_utc().timestamp()
}

fn new_listing(id: &str, observed_on: NaiveDate, partition: &str) -> NewListing {
    NewListing {
        key: EntityKey::new(id, observed_on),
        partition: partition.to_string(),
        locator: Some(format!("https://example.com/ad/{}", id)),
        first_seen_at: ts(2024, 3, 1),
    }
}

fn new_entity(id: &str, observed_on: NaiveDate, status: EntityStatus) -> NewEntity {
    NewEntity {
        key: EntityKey::new(id, observed_on),
        partition: "amman/accounting".to_string(),
        locator: Some(format!("https://example.com/ad/{}", id)),
        status,
        not_found_streak: 0,
        payload: serde_json::json!({"title": format!("Job {}", id)}),
        first_seen_at: ts(2024, 3, 1),
        last_observed_at: Some(ts(2024, 3, 1)),
    }
}
