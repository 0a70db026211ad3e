#![forbid(unsafe_code)]

//! Small named preference stores with atomic multi-key edits.

use crate::error::Error;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    Long(i64),
    StringSet(BTreeSet<String>),
}

impl PrefValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PrefValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            PrefValue::Long(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            PrefValue::StringSet(value) => Some(value),
            _ => None,
        }
    }
}

pub type Preferences = BTreeMap<String, PrefValue>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Put(String, PrefValue),
    Remove(String),
}

impl Edit {
    pub fn put(key: &str, value: PrefValue) -> Self {
        Edit::Put(key.to_owned(), value)
    }

    pub fn remove(key: &str) -> Self {
        Edit::Remove(key.to_owned())
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// All readable entries. Values that fail to decode are left out.
    async fn load(&self) -> Result<Preferences, Error>;

    /// Apply every edit or none of them.
    async fn edit(&self, edits: Vec<Edit>) -> Result<(), Error>;
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore(Mutex<Preferences>);

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn load(&self) -> Result<Preferences, Error> {
        Ok(self.0.lock().clone())
    }

    async fn edit(&self, edits: Vec<Edit>) -> Result<(), Error> {
        let mut prefs = self.0.lock();
        for edit in edits {
            match edit {
                Edit::Put(key, value) => {
                    prefs.insert(key, value);
                }
                Edit::Remove(key) => {
                    prefs.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// One named store inside the shared `preferences` table.
#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
    store: String,
}

impl SqliteKeyValueStore {
    pub fn new(pool: SqlitePool, store: impl Into<String>) -> Self {
        Self {
            pool,
            store: store.into(),
        }
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    #[instrument(skip(self), fields(store = %self.store))]
    async fn load(&self) -> Result<Preferences, Error> {
        let rows = sqlx::query("SELECT key, value FROM preferences WHERE store = ?")
            .bind(&self.store)
            .fetch_all(&self.pool)
            .await?;

        let mut prefs = Preferences::new();
        for row in rows {
            let key: String = row.try_get("key")?;
            let raw: String = row.try_get("value")?;
            match serde_json::from_str(&raw) {
                Ok(value) => {
                    prefs.insert(key, value);
                }
                Err(err) => warn!(%key, %err, "dropping unreadable preference"),
            }
        }
        Ok(prefs)
    }

    #[instrument(skip_all, fields(store = %self.store, edits = edits.len()))]
    async fn edit(&self, edits: Vec<Edit>) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        for edit in edits {
            match edit {
                Edit::Put(key, value) => {
                    sqlx::query(
                        "INSERT INTO preferences (store, key, value) VALUES (?, ?, ?) \
                         ON CONFLICT(store, key) DO UPDATE SET value = excluded.value",
                    )
                    .bind(&self.store)
                    .bind(key)
                    .bind(serde_json::to_string(&value)?)
                    .execute(&mut *tx)
                    .await?;
                }
                Edit::Remove(key) => {
                    sqlx::query("DELETE FROM preferences WHERE store = ? AND key = ?")
                        .bind(&self.store)
                        .bind(key)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}
