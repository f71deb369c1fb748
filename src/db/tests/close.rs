use super::*;
use tempfile::NamedTempFile;

/// Verify that querying the database after closing the pool returns an error
/// rather than hanging or panicking.
#[tokio::test]
async fn test_get_entity_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let entity = new_entity("1", date(2024, 2, 20), EntityStatus::Open);
    db.upsert_if_absent(TABLE, &entity).await.unwrap();

    // Verify the entity exists before closing
    let before = db.get_entity(TABLE, &entity.key).await.unwrap();
    assert!(before.is_some(), "entity should exist before close");

    // Close the pool (but keep the Database struct alive)
    db.pool().close().await;

    // Querying after close should return an error, not hang or panic
    let result = db.get_entity(TABLE, &entity.key).await;
    assert!(
        result.is_err(),
        "get_entity after pool close should return an error, got: {:?}",
        result
    );
}

/// Verify that an upsert after closing the pool returns an error
#[tokio::test]
async fn test_upsert_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.pool().close().await;

    let entity = new_entity("2", date(2024, 2, 20), EntityStatus::Open);
    let result = db.upsert_if_absent(TABLE, &entity).await;
    assert!(
        result.is_err(),
        "upsert_if_absent after pool close should return an error, got: {:?}",
        result
    );
}
