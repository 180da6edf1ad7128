use super::*;

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn duplicate_username_is_reported_as_taken() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let alice = storage.create_user("alice").await.expect("insert");
    assert!(alice.is_some());

    let again = storage.create_user("alice").await.expect("insert");
    assert!(again.is_none());

    let found = storage
        .find_user_by_username("alice")
        .await
        .expect("lookup")
        .expect("alice exists");
    assert_eq!(Some(found.owner_id), alice);
}

#[tokio::test]
async fn unknown_username_is_not_found() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let missing = storage
        .find_user_by_username("nobody")
        .await
        .expect("lookup");
    assert!(missing.is_none());
}

#[tokio::test]
async fn created_devices_are_listed_per_owner_in_insert_order() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let alice = storage.create_user("alice").await.expect("user").expect("new");
    let bob = storage.create_user("bob").await.expect("user").expect("new");

    let trap = storage
        .create_device(alice, "VenusTrap", "flytrap")
        .await
        .expect("device");
    let pitcher = storage
        .create_device(alice, "Nepenthes", "pitcher")
        .await
        .expect("device");
    storage
        .create_device(bob, "Sundew", "drosera")
        .await
        .expect("device");

    assert_eq!(trap.health, DEFAULT_DEVICE_HEALTH);
    assert_eq!(trap.owner_id, alice);

    let devices = storage.list_devices_for_owner(alice).await.expect("list");
    let ids: Vec<_> = devices.iter().map(|d| d.device_id).collect();
    assert_eq!(ids, vec![trap.device_id, pitcher.device_id]);
    assert_eq!(devices[1].kind, "pitcher");
}

#[tokio::test]
async fn identical_devices_are_not_deduplicated() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let alice = storage.create_user("alice").await.expect("user").expect("new");

    let first = storage
        .create_device(alice, "VenusTrap", "flytrap")
        .await
        .expect("device");
    let second = storage
        .create_device(alice, "VenusTrap", "flytrap")
        .await
        .expect("device");

    assert_ne!(first.device_id, second.device_id);
    assert_eq!(
        storage
            .list_devices_for_owner(alice)
            .await
            .expect("list")
            .len(),
        2
    );
}

#[tokio::test]
async fn owner_without_devices_lists_nothing() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let devices = storage
        .list_devices_for_owner(OwnerId(42))
        .await
        .expect("list");
    assert!(devices.is_empty());
}

#[test]
fn memory_urls_have_no_parent_dir() {
    assert!(sqlite_path("sqlite::memory:").is_none());
    assert_eq!(
        sqlite_path("sqlite://./data/server.db?mode=rwc"),
        Some(PathBuf::from("./data/server.db"))
    );
}
