#![forbid(unsafe_code)]

use crate::error::Error;
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, instrument};
use usage::{Evaluation, TrackedApp};

pub type TrackedApps = Arc<Vec<TrackedApp>>;

#[async_trait]
pub trait TrackedAppStore: Send + Sync {
    /// Every row, ordered by package name.
    async fn all(&self) -> Result<Vec<TrackedApp>, Error>;

    /// Upsert `updates` and delete `packages_to_remove` in one transaction.
    async fn apply(&self, evaluation: &Evaluation) -> Result<(), Error>;

    /// Emits the full table after every committed write.
    fn subscribe(&self) -> watch::Receiver<TrackedApps>;
}

#[derive(Debug)]
pub struct MemoryTrackedAppStore {
    rows: Mutex<BTreeMap<String, TrackedApp>>,
    tx: watch::Sender<TrackedApps>,
}

impl MemoryTrackedAppStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::default());
        Self {
            rows: Mutex::default(),
            tx,
        }
    }
}

impl Default for MemoryTrackedAppStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrackedAppStore for MemoryTrackedAppStore {
    async fn all(&self) -> Result<Vec<TrackedApp>, Error> {
        Ok(self.rows.lock().values().cloned().collect())
    }

    async fn apply(&self, evaluation: &Evaluation) -> Result<(), Error> {
        let snapshot = {
            let mut rows = self.rows.lock();
            for app in &evaluation.updates {
                rows.insert(app.package_name.clone(), app.clone());
            }
            for name in &evaluation.packages_to_remove {
                rows.remove(name);
            }
            rows.values().cloned().collect::<Vec<_>>()
        };
        self.tx.send_replace(Arc::new(snapshot));
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<TrackedApps> {
        self.tx.subscribe()
    }
}

#[derive(Debug)]
pub struct SqliteTrackedAppStore {
    pool: SqlitePool,
    tx: watch::Sender<TrackedApps>,
}

impl SqliteTrackedAppStore {
    pub async fn open(pool: SqlitePool) -> Result<Self, Error> {
        let rows = fetch_all(&pool).await?;
        debug!(rows = rows.len(), "tracked apps loaded");
        let (tx, _) = watch::channel(Arc::new(rows));
        Ok(Self { pool, tx })
    }
}

async fn fetch_all(pool: &SqlitePool) -> Result<Vec<TrackedApp>, Error> {
    let rows = sqlx::query(
        "SELECT package_name, app_label, last_used_at, status, is_disabled, \
         scheduled_disable_at, notified_at FROM tracked_apps ORDER BY package_name",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(decode_row).collect()
}

fn decode_row(row: &SqliteRow) -> Result<TrackedApp, Error> {
    let status: String = row.try_get("status")?;
    Ok(TrackedApp {
        package_name: row.try_get("package_name")?,
        app_label: row.try_get("app_label")?,
        last_used_at: row.try_get::<Option<i64>, _>("last_used_at")?.map(to_millis),
        status: status.parse()?,
        is_disabled: row.try_get("is_disabled")?,
        scheduled_disable_at: row
            .try_get::<Option<i64>, _>("scheduled_disable_at")?
            .map(to_millis),
        notified_at: row.try_get::<Option<i64>, _>("notified_at")?.map(to_millis),
    })
}

fn to_millis(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn to_column(value: Option<u64>) -> Option<i64> {
    value.map(|v| i64::try_from(v).unwrap_or(i64::MAX))
}

#[async_trait]
impl TrackedAppStore for SqliteTrackedAppStore {
    async fn all(&self) -> Result<Vec<TrackedApp>, Error> {
        fetch_all(&self.pool).await
    }

    #[instrument(skip_all, fields(
        updates = evaluation.updates.len(),
        removed = evaluation.packages_to_remove.len(),
    ))]
    async fn apply(&self, evaluation: &Evaluation) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        for app in &evaluation.updates {
            sqlx::query(
                "INSERT INTO tracked_apps (package_name, app_label, last_used_at, status, \
                 is_disabled, scheduled_disable_at, notified_at) VALUES (?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(package_name) DO UPDATE SET app_label = excluded.app_label, \
                 last_used_at = excluded.last_used_at, status = excluded.status, \
                 is_disabled = excluded.is_disabled, \
                 scheduled_disable_at = excluded.scheduled_disable_at, \
                 notified_at = excluded.notified_at",
            )
            .bind(&app.package_name)
            .bind(&app.app_label)
            .bind(to_column(app.last_used_at))
            .bind(app.status.as_str())
            .bind(app.is_disabled)
            .bind(to_column(app.scheduled_disable_at))
            .bind(to_column(app.notified_at))
            .execute(&mut *tx)
            .await?;
        }

        for name in &evaluation.packages_to_remove {
            sqlx::query("DELETE FROM tracked_apps WHERE package_name = ?")
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        let rows = fetch_all(&self.pool).await?;
        self.tx.send_replace(Arc::new(rows));
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<TrackedApps> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usage::AppStatus;

    #[tokio::test]
    async fn memory_store_upserts_and_removes() {
        let store = MemoryTrackedAppStore::new();
        let mut rx = store.subscribe();
        store
            .apply(&Evaluation {
                updates: vec![
                    TrackedApp::new("b", AppStatus::Rare),
                    TrackedApp::new("a", AppStatus::Recent),
                ],
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .apply(&Evaluation {
                updates: vec![TrackedApp::new("b", AppStatus::Disabled)],
                packages_to_remove: vec!["a".into()],
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(rx.has_changed().unwrap());
        let rows = rx.borrow_and_update().clone();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, AppStatus::Disabled);
        assert!(rows[0].is_disabled);
    }
}
