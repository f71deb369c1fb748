use super::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_archive_matching_moves_closed_terminal_and_aged_rows() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.upsert_if_absent(TABLE, &new_entity("closed", date(2024, 2, 20), EntityStatus::Closed))
        .await
        .unwrap();

    let mut terminal = new_entity("terminal", date(2024, 2, 21), EntityStatus::NotFound);
    terminal.not_found_streak = 3;
    db.upsert_if_absent(TABLE, &terminal).await.unwrap();

    let mut transient = new_entity("transient", date(2024, 2, 22), EntityStatus::NotFound);
    transient.not_found_streak = 1;
    db.upsert_if_absent(TABLE, &transient).await.unwrap();

    db.upsert_if_absent(TABLE, &new_entity("aged", date(2023, 11, 1), EntityStatus::Open))
        .await
        .unwrap();
    db.record_listing(TABLE, &new_listing("aged-new", date(2023, 11, 2), "amman/sales"))
        .await
        .unwrap();
    db.upsert_if_absent(TABLE, &new_entity("live", date(2024, 2, 25), EntityStatus::Open))
        .await
        .unwrap();

    let moved = db
        .archive_matching(TABLE, date(2023, 12, 2), 3, ts(2024, 3, 1), 500)
        .await
        .unwrap();

    assert_eq!(moved, 4);
    assert_eq!(db.count_archived(TABLE).await.unwrap(), 4);
    assert_eq!(db.count_entities(TABLE).await.unwrap(), 2);
    assert_eq!(db.count_listings(TABLE).await.unwrap(), 2);

    let archived = db.list_archived(TABLE).await.unwrap();
    let ids: Vec<&str> = archived.iter().map(|e| e.source_id.as_str()).collect();
    assert_eq!(ids, vec!["aged", "aged-new", "closed", "terminal"]);
    assert_eq!(archived[1].status, EntityStatus::New);
    assert_eq!(archived[2].status, EntityStatus::Closed);
    assert_eq!(archived[2].partition, "amman/accounting");
    assert_eq!(archived[2].archived_at.timestamp(), ts(2024, 3, 1));

    db.close().await;
}

#[tokio::test]
async fn test_archive_matching_in_small_batches() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    for i in 0..7 {
        db.upsert_if_absent(
            TABLE,
            &new_entity(&format!("c{}", i), date(2024, 2, 20), EntityStatus::Closed),
        )
        .await
        .unwrap();
    }

    let moved = db
        .archive_matching(TABLE, date(2023, 12, 2), 3, ts(2024, 3, 1), 3)
        .await
        .unwrap();

    assert_eq!(moved, 7);
    assert_eq!(db.count_entities(TABLE).await.unwrap(), 0);

    // Nothing left to move
    let moved = db
        .archive_matching(TABLE, date(2023, 12, 2), 3, ts(2024, 3, 1), 3)
        .await
        .unwrap();
    assert_eq!(moved, 0);

    db.close().await;
}

#[tokio::test]
async fn test_purge_archived_removes_only_given_keys() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    for id in ["a", "b"] {
        db.upsert_if_absent(TABLE, &new_entity(id, date(2024, 2, 20), EntityStatus::Closed))
            .await
            .unwrap();
    }
    db.archive_matching(TABLE, date(2023, 12, 2), 3, ts(2024, 3, 1), 500)
        .await
        .unwrap();

    let removed = db
        .purge_archived(TABLE, &[EntityKey::new("a", date(2024, 2, 20))])
        .await
        .unwrap();

    assert_eq!(removed, 1);
    let remaining = db.list_archived(TABLE).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key(), EntityKey::new("b", date(2024, 2, 20)));

    assert_eq!(db.purge_archived(TABLE, &[]).await.unwrap(), 0);

    db.close().await;
}

#[tokio::test]
async fn test_archived_identity_is_not_reingested() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let entity = new_entity("7", date(2024, 2, 20), EntityStatus::Closed);
    db.upsert_if_absent(TABLE, &entity).await.unwrap();
    db.archive_matching(TABLE, date(2023, 12, 2), 3, ts(2024, 3, 1), 500)
        .await
        .unwrap();

    // Rediscovered by a later listing crawl
    let listing = new_listing("7", date(2024, 2, 20), "amman/accounting");
    assert!(!db.record_listing(TABLE, &listing).await.unwrap());
    assert_eq!(
        db.record_listings_batch(TABLE, std::slice::from_ref(&listing))
            .await
            .unwrap(),
        0
    );
    assert!(!db.upsert_if_absent(TABLE, &entity).await.unwrap());
    assert_eq!(db.count_listings(TABLE).await.unwrap(), 0);
    assert_eq!(
        db.max_observed_on(TABLE, Some("amman/accounting"))
            .await
            .unwrap(),
        Some(date(2024, 2, 20))
    );

    // Still retired once the archive has been exported and purged
    db.purge_archived(TABLE, &[entity.key.clone()]).await.unwrap();
    assert!(!db.record_listing(TABLE, &listing).await.unwrap());
    assert!(!db.upsert_if_absent(TABLE, &entity).await.unwrap());
    assert_eq!(db.count_listings(TABLE).await.unwrap(), 0);
    assert_eq!(db.count_entities(TABLE).await.unwrap(), 0);

    // Other identities in the same partition are unaffected
    assert!(
        db.record_listing(TABLE, &new_listing("8", date(2024, 2, 20), "amman/accounting"))
            .await
            .unwrap()
    );

    db.close().await;
}

#[tokio::test]
async fn test_archive_keeps_first_copy_of_identity() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.upsert_if_absent(TABLE, &new_entity("7", date(2024, 2, 20), EntityStatus::Closed))
        .await
        .unwrap();
    db.archive_matching(TABLE, date(2023, 12, 2), 3, ts(2024, 3, 1), 500)
        .await
        .unwrap();

    // Live row reappearing for an identity that is already archived
    sqlx::query("DELETE FROM retired_identities")
        .execute(db.pool())
        .await
        .unwrap();
    let mut again = new_entity("7", date(2024, 2, 20), EntityStatus::NotFound);
    again.not_found_streak = 3;
    again.payload = serde_json::json!({"title": "Overwritten"});
    assert!(db.upsert_if_absent(TABLE, &again).await.unwrap());

    let moved = db
        .archive_matching(TABLE, date(2023, 12, 2), 3, ts(2024, 3, 2), 500)
        .await
        .unwrap();

    assert_eq!(moved, 1);
    assert_eq!(db.count_listings(TABLE).await.unwrap(), 0);
    let archived = db.list_archived(TABLE).await.unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].archived_at.timestamp(), ts(2024, 3, 1));
    assert_eq!(archived[0].status, EntityStatus::Closed);
    assert_eq!(archived[0].payload["title"], "Job 7");

    db.close().await;
}
