use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{Device, DeviceId, OwnerId, UserSummary, DEFAULT_DEVICE_HEALTH};

/// Device persistence as seen by the telemetry core: list-by-owner and create.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn list_devices_for_owner(&self, owner_id: OwnerId) -> Result<Vec<Device>>;
    async fn create_device(&self, owner_id: OwnerId, name: &str, kind: &str) -> Result<Device>;
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Returns `None` when the username is already taken.
    pub async fn create_user(&self, username: &str) -> Result<Option<OwnerId>> {
        let row = sqlx::query(
            "INSERT INTO users (username) VALUES (?)
             ON CONFLICT(username) DO NOTHING
             RETURNING id",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to insert user '{username}'"))?;
        Ok(row.map(|r| OwnerId(r.get::<i64, _>(0))))
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<UserSummary>> {
        let row = sqlx::query("SELECT id, username FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| UserSummary {
            owner_id: OwnerId(r.get::<i64, _>(0)),
            username: r.get::<String, _>(1),
        }))
    }
}

#[async_trait]
impl DeviceStore for Storage {
    async fn list_devices_for_owner(&self, owner_id: OwnerId) -> Result<Vec<Device>> {
        let rows = sqlx::query(
            "SELECT id, owner_id, name, kind, health, created_at
             FROM devices
             WHERE owner_id = ?
             ORDER BY id ASC",
        )
        .bind(owner_id.0)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to list devices for owner {}", owner_id.0))?;

        Ok(rows.iter().map(device_from_row).collect())
    }

    async fn create_device(&self, owner_id: OwnerId, name: &str, kind: &str) -> Result<Device> {
        let row = sqlx::query(
            "INSERT INTO devices (owner_id, name, kind, health)
             VALUES (?, ?, ?, ?)
             RETURNING id, owner_id, name, kind, health, created_at",
        )
        .bind(owner_id.0)
        .bind(name)
        .bind(kind)
        .bind(DEFAULT_DEVICE_HEALTH)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to create device for owner {}", owner_id.0))?;

        Ok(device_from_row(&row))
    }
}

fn device_from_row(row: &SqliteRow) -> Device {
    Device {
        device_id: DeviceId(row.get::<i64, _>(0)),
        owner_id: OwnerId(row.get::<i64, _>(1)),
        name: row.get::<String, _>(2),
        kind: row.get::<String, _>(3),
        health: row.get::<String, _>(4),
        created_at: row.get::<DateTime<Utc>, _>(5),
    }
}

/// Creates the directory holding a file-backed SQLite database. Memory and non-SQLite urls are left alone.
pub fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
