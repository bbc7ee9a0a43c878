use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One service's last-known update status, persisted across restarts so the
/// badge a user saw before a reboot is still there after it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImageUpdate {
    pub id: i64,
    #[serde(rename = "stackName")]
    pub stack_name: String,
    #[serde(rename = "serviceName")]
    pub service_name: String,
    #[serde(rename = "imageRef")]
    pub image_ref: String,
    #[serde(rename = "localDigest")]
    pub local_digest: Option<String>,
    #[serde(rename = "remoteDigest")]
    pub remote_digest: Option<String>,
    #[serde(rename = "hasUpdate")]
    pub has_update: bool,
    #[serde(rename = "lastChecked")]
    pub last_checked: i64,
}

impl ImageUpdate {
    pub async fn upsert(
        pool: &SqlitePool,
        stack_name: &str,
        service_name: &str,
        image_ref: &str,
        local_digest: Option<&str>,
        remote_digest: Option<&str>,
        has_update: bool,
        checked_at: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO image_update
                (stack_name, service_name, image_ref, local_digest, remote_digest, has_update, last_checked)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(stack_name, service_name) DO UPDATE SET
                image_ref = excluded.image_ref,
                local_digest = excluded.local_digest,
                remote_digest = excluded.remote_digest,
                has_update = excluded.has_update,
                last_checked = excluded.last_checked
            "#,
        )
        .bind(stack_name)
        .bind(service_name)
        .bind(image_ref)
        .bind(local_digest)
        .bind(remote_digest)
        .bind(has_update)
        .bind(checked_at)
        .execute(pool)
        .await
        .context("Failed to upsert image update")?;

        Ok(())
    }

    pub async fn delete_service(pool: &SqlitePool, stack_name: &str, service_name: &str) -> Result<()> {
        sqlx::query("DELETE FROM image_update WHERE stack_name = ? AND service_name = ?")
            .bind(stack_name)
            .bind(service_name)
            .execute(pool)
            .await
            .context("Failed to delete image update")?;
        Ok(())
    }

    /// Drop every row for a stack, called when the stack itself is deleted.
    pub async fn delete_for_stack(pool: &SqlitePool, stack_name: &str) -> Result<()> {
        sqlx::query("DELETE FROM image_update WHERE stack_name = ?")
            .bind(stack_name)
            .execute(pool)
            .await
            .context("Failed to delete image updates for stack")?;
        Ok(())
    }

    pub async fn for_stack(pool: &SqlitePool, stack_name: &str) -> Result<Vec<ImageUpdate>> {
        sqlx::query_as("SELECT * FROM image_update WHERE stack_name = ?")
            .bind(stack_name)
            .fetch_all(pool)
            .await
            .context("Failed to query image updates for stack")
    }

    pub async fn all(pool: &SqlitePool) -> Result<Vec<ImageUpdate>> {
        sqlx::query_as("SELECT * FROM image_update")
            .fetch_all(pool)
            .await
            .context("Failed to query all image updates")
    }

    /// Rows with `hasUpdate = true`, keyed by stack then service, ready to
    /// serialize straight into the `updates` broadcast channel.
    pub async fn all_with_updates(
        pool: &SqlitePool,
    ) -> Result<HashMap<String, HashMap<String, ImageUpdate>>> {
        let rows: Vec<ImageUpdate> = sqlx::query_as("SELECT * FROM image_update WHERE has_update = 1")
            .fetch_all(pool)
            .await
            .context("Failed to query pending image updates")?;

        let mut out: HashMap<String, HashMap<String, ImageUpdate>> = HashMap::new();
        for row in rows {
            out.entry(row.stack_name.clone())
                .or_default()
                .insert(row.service_name.clone(), row);
        }
        Ok(out)
    }
}

/// Derived, read-optimized view over the `image_update` table: which stacks
/// have at least one service with a pending update. Rebuilt wholesale after
/// every checker pass and swapped in atomically, so readers never block on
/// (or see a half-written) recompute.
#[derive(Clone)]
pub struct ImageUpdateStore {
    stack_has_updates: Arc<ArcSwap<HashMap<String, bool>>>,
    /// Keyed by `"stack/service"`, per spec §4.J's `allServiceUpdates` view —
    /// the one `buildContainerListJSON`'s `imageUpdatesAvailable` flag reads.
    service_updates: Arc<ArcSwap<HashMap<String, bool>>>,
}

impl Default for ImageUpdateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageUpdateStore {
    pub fn new() -> Self {
        Self {
            stack_has_updates: Arc::new(ArcSwap::from_pointee(HashMap::new())),
            service_updates: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }

    /// Recompute both derived views from the database. Call after any batch
    /// of upserts completes (the update checker does this once per sweep).
    pub async fn refresh(&self, pool: &SqlitePool) -> Result<()> {
        let rows = ImageUpdate::all(pool).await?;
        let mut by_stack: HashMap<String, bool> = HashMap::new();
        let mut by_service: HashMap<String, bool> = HashMap::new();
        for row in rows {
            let entry = by_stack.entry(row.stack_name.clone()).or_insert(false);
            *entry = *entry || row.has_update;
            by_service.insert(
                format!("{}/{}", row.stack_name, row.service_name),
                row.has_update,
            );
        }
        debug!("ImageUpdateStore refreshed: {} stacks tracked", by_stack.len());
        self.stack_has_updates.store(Arc::new(by_stack));
        self.service_updates.store(Arc::new(by_service));
        Ok(())
    }

    pub fn stack_has_updates(&self, stack_name: &str) -> bool {
        self.stack_has_updates
            .load()
            .get(stack_name)
            .copied()
            .unwrap_or(false)
    }

    /// `allServiceUpdates["stack/service"]` per spec §4.J.
    pub fn service_has_update(&self, stack_name: &str, service_name: &str) -> bool {
        self.service_updates
            .load()
            .get(&format!("{}/{}", stack_name, service_name))
            .copied()
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tempfile::TempDir;

    async fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(temp_dir.path()).await.unwrap();
        db.migrate().await.unwrap();
        (db, temp_dir)
    }

    #[tokio::test]
    async fn upsert_then_refresh_populates_store() {
        let (db, _tmp) = setup_test_db().await;
        let pool = db.pool();

        ImageUpdate::upsert(pool, "blog", "web", "nginx:latest", Some("sha256:a"), Some("sha256:b"), true, 1000)
            .await
            .unwrap();
        ImageUpdate::upsert(pool, "blog", "db", "postgres:16", Some("sha256:c"), Some("sha256:c"), false, 1000)
            .await
            .unwrap();

        let store = ImageUpdateStore::new();
        store.refresh(pool).await.unwrap();

        assert!(store.stack_has_updates("blog"));
        assert!(!store.stack_has_updates("unknown-stack"));
        assert!(store.service_has_update("blog", "web"));
        assert!(!store.service_has_update("blog", "db"));
        assert!(!store.service_has_update("blog", "unknown-service"));
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_service() {
        let (db, _tmp) = setup_test_db().await;
        let pool = db.pool();

        ImageUpdate::upsert(pool, "blog", "web", "nginx:latest", Some("sha256:a"), Some("sha256:a"), false, 1000)
            .await
            .unwrap();
        ImageUpdate::upsert(pool, "blog", "web", "nginx:latest", Some("sha256:a"), Some("sha256:b"), true, 2000)
            .await
            .unwrap();

        let rows = ImageUpdate::for_stack(pool, "blog").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].has_update);
        assert_eq!(rows[0].last_checked, 2000);
    }

    #[tokio::test]
    async fn delete_for_stack_removes_all_services() {
        let (db, _tmp) = setup_test_db().await;
        let pool = db.pool();

        ImageUpdate::upsert(pool, "blog", "web", "nginx", None, None, false, 1).await.unwrap();
        ImageUpdate::upsert(pool, "blog", "db", "postgres", None, None, false, 1).await.unwrap();

        ImageUpdate::delete_for_stack(pool, "blog").await.unwrap();
        assert!(ImageUpdate::for_stack(pool, "blog").await.unwrap().is_empty());
    }
}
