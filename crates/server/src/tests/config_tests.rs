use super::*;

use std::collections::HashMap;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_apply_without_file_or_env() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = load_settings_with(&dir.path().join("missing.toml"), env_from(&[]));
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.telemetry_interval_ms, 2_000);
}

#[test]
fn file_values_are_overridden_by_environment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("server.toml");
    fs::write(
        &path,
        "bind_addr = \"0.0.0.0:9000\"\ndatabase_url = \"sqlite://./file.db\"\ntelemetry_interval_ms = 500\n",
    )
    .expect("write settings");

    let settings = load_settings_with(
        &path,
        env_from(&[
            ("APP__DATABASE_URL", "sqlite://./env.db"),
            ("APP__LOG_FILTER", "debug"),
            ("APP__SESSION_IDLE_TTL_SECS", "90"),
        ]),
    );

    assert_eq!(settings.server_bind, "0.0.0.0:9000");
    assert_eq!(settings.database_url, "sqlite://./env.db");
    assert_eq!(settings.telemetry_interval_ms, 500);
    assert_eq!(settings.log_filter, "debug");
    assert_eq!(settings.session_idle_ttl_secs, 90);
}

#[test]
fn invalid_interval_override_is_ignored_and_zero_is_clamped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("none.toml");

    let settings = load_settings_with(
        &missing,
        env_from(&[("APP__TELEMETRY_INTERVAL_MS", "soon")]),
    );
    assert_eq!(settings.telemetry_interval_ms, 2_000);

    let settings = load_settings_with(&missing, env_from(&[("APP__TELEMETRY_INTERVAL_MS", "0")]));
    assert_eq!(settings.telemetry_interval_ms, 1);
}

#[test]
fn unparsable_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("server.toml");
    fs::write(&path, "telemetry_interval_ms = \"fast\"").expect("write settings");

    let settings = load_settings_with(&path, env_from(&[]));
    assert_eq!(settings, Settings::default());
}

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
    assert_eq!(
        normalize_database_url("sqlite:./data/test.db"),
        "sqlite://./data/test.db"
    );
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(normalize_database_url("  "), Settings::default().database_url);
}

#[test]
fn creates_parent_dir_for_sqlite_url() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("data").join("test.db");

    prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare db url");
    assert!(dir.path().join("data").exists());
}

#[tokio::test]
async fn prepared_database_url_creates_openable_sqlite_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("nested").join("server.db");

    let prepared = prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare");
    let storage = storage::Storage::new(&prepared).await.expect("open sqlite");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should be created: {}",
        db_path.display()
    );
}
