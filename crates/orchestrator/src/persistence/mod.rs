#![forbid(unsafe_code)]

mod database;
mod kv;
mod settings;
mod tracked_apps;

pub use database::open_database;
pub use kv::{Edit, KeyValueStore, MemoryKeyValueStore, PrefValue, Preferences, SqliteKeyValueStore};
pub use settings::{AppSettings, SettingsPreferences};
pub use tracked_apps::{MemoryTrackedAppStore, SqliteTrackedAppStore, TrackedAppStore};
