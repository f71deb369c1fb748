use super::*;
use tempfile::NamedTempFile;

async fn seed_partitions(db: &Database, names: &[&str]) {
    for name in names {
        db.register_partition(TABLE, name, Some(&format!("https://example.com/{}", name)))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_register_partition_updates_locator() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.register_partition(TABLE, "amman/sales", Some("https://old.example.com"))
        .await
        .unwrap();
    db.register_partition(TABLE, "amman/sales", Some("https://new.example.com"))
        .await
        .unwrap();

    let partitions = db.list_partitions(TABLE).await.unwrap();
    assert_eq!(partitions.len(), 1);
    assert_eq!(
        partitions[0].locator.as_deref(),
        Some("https://new.example.com")
    );
    assert!(partitions[0].last_crawl_at.is_none());

    db.close().await;
}

#[tokio::test]
async fn test_record_snapshot_once_per_day() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    seed_partitions(&db, &["amman/sales"]).await;

    assert!(
        db.record_snapshot(TABLE, "amman/sales", date(2024, 3, 1), 120, ts(2024, 3, 1))
            .await
            .unwrap()
    );
    assert!(
        !db.record_snapshot(TABLE, "amman/sales", date(2024, 3, 1), 999, ts(2024, 3, 1))
            .await
            .unwrap()
    );

    let snapshots = db.list_snapshots(TABLE, "amman/sales").await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].item_count, 120);

    let partition = db.get_partition(TABLE, "amman/sales").await.unwrap().unwrap();
    assert_eq!(partition.last_count, Some(120));
    assert_eq!(
        db.max_snapshot_on(TABLE).await.unwrap(),
        Some(date(2024, 3, 1))
    );

    db.close().await;
}

#[tokio::test]
async fn test_mark_partition_crawled_is_monotonic() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    seed_partitions(&db, &["amman/sales"]).await;

    db.mark_partition_crawled(TABLE, "amman/sales", ts(2024, 3, 5))
        .await
        .unwrap();
    db.mark_partition_crawled(TABLE, "amman/sales", ts(2024, 3, 2))
        .await
        .unwrap();

    let partition = db.get_partition(TABLE, "amman/sales").await.unwrap().unwrap();
    assert_eq!(partition.last_crawl_at.unwrap().timestamp(), ts(2024, 3, 5));

    db.close().await;
}

#[tokio::test]
async fn test_drifted_partitions() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    seed_partitions(&db, &["changed", "steady", "stale", "daily"]).await;

    let samples = [
        // Count moved between two snapshots two days apart
        ("changed", date(2024, 3, 1), 10),
        ("changed", date(2024, 3, 3), 12),
        // Same count two days apart
        ("steady", date(2024, 3, 1), 10),
        ("steady", date(2024, 3, 3), 10),
        // Moved, but long before the latest snapshot
        ("stale", date(2024, 2, 1), 5),
        ("stale", date(2024, 2, 3), 9),
        // Moved one day apart only
        ("daily", date(2024, 3, 2), 1),
        ("daily", date(2024, 3, 3), 2),
    ];
    for (name, on, count) in samples {
        db.record_snapshot(TABLE, name, on, count, ts(2024, 3, 3))
            .await
            .unwrap();
    }

    let drifted = db.drifted_partitions(TABLE, 2, 5).await.unwrap();
    assert_eq!(drifted, vec!["changed".to_string()]);

    // A one-day lag picks up the daily change instead
    let drifted = db.drifted_partitions(TABLE, 1, 5).await.unwrap();
    assert_eq!(drifted, vec!["daily".to_string()]);

    db.close().await;
}

#[tokio::test]
async fn test_cold_partitions() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    seed_partitions(&db, &["amman/sales", "irbid/sales"]).await;

    db.record_listing(TABLE, &new_listing("1", date(2024, 2, 20), "amman/sales"))
        .await
        .unwrap();

    let cold = db.cold_partitions(TABLE).await.unwrap();
    assert_eq!(cold, vec!["irbid/sales".to_string()]);

    db.close().await;
}

#[tokio::test]
async fn test_fully_archived_partition_is_not_cold() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    seed_partitions(&db, &["amman/accounting", "irbid/sales"]).await;

    db.upsert_if_absent(TABLE, &new_entity("1", date(2024, 2, 20), EntityStatus::Closed))
        .await
        .unwrap();
    db.archive_matching(TABLE, date(2023, 12, 2), 3, ts(2024, 3, 1), 500)
        .await
        .unwrap();
    assert_eq!(db.count_listings(TABLE).await.unwrap(), 0);

    let cold = db.cold_partitions(TABLE).await.unwrap();
    assert_eq!(cold, vec!["irbid/sales".to_string()]);

    db.close().await;
}
