#![forbid(unsafe_code)]

//! The device's installed-application list and usage-event history.

use crate::{Error, Timestamp};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledApp {
    pub package_name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub is_disabled: bool,
    /// First install time, used to treat fresh installs as recent.
    #[serde(default)]
    pub installed_at: Option<Timestamp>,
}

impl InstalledApp {
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            label: None,
            is_disabled: false,
            installed_at: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.is_disabled = true;
        self
    }

    pub fn installed_at(mut self, at: Timestamp) -> Self {
        self.installed_at = Some(at);
        self
    }
}

/// A move-to-foreground transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundEvent {
    pub package_name: String,
    pub timestamp: Timestamp,
}

#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Precondition for every other call. Not checked by the callee.
    async fn has_usage_access(&self) -> bool;

    /// Installed, user-visible applications.
    async fn installed_applications(&self) -> Result<Vec<InstalledApp>, Error>;

    /// Look up one package. `Ok(None)` means it is not installed.
    async fn package_info(&self, package_name: &str) -> Result<Option<InstalledApp>, Error>;

    /// Foreground transitions within `[since, until]`, oldest first.
    async fn foreground_events(
        &self,
        since: Timestamp,
        until: Timestamp,
    ) -> Result<Vec<ForegroundEvent>, Error>;
}

/// Most recent foreground timestamp per package.
pub fn last_foreground<'a>(
    events: impl IntoIterator<Item = &'a ForegroundEvent>,
) -> HashMap<String, Timestamp> {
    let mut last = HashMap::new();
    for event in events {
        last.entry(event.package_name.clone())
            .and_modify(|t: &mut Timestamp| *t = (*t).max(event.timestamp))
            .or_insert(event.timestamp);
    }
    last
}

/// The package that moved to the foreground last.
///
/// On equal timestamps the later event in the sequence wins.
pub fn current_foreground<'a>(
    events: impl IntoIterator<Item = &'a ForegroundEvent>,
) -> Option<&'a str> {
    let mut current: Option<&ForegroundEvent> = None;
    for event in events {
        if current.is_none_or(|c| event.timestamp >= c.timestamp) {
            current = Some(event);
        }
    }
    current.map(|event| event.package_name.as_str())
}

/// A point-in-time dump of what a device reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSnapshot {
    pub usage_access: bool,
    pub apps: Vec<InstalledApp>,
    pub events: Vec<ForegroundEvent>,
}

/// A [`UsageSource`] answering from a replaceable [`UsageSnapshot`].
#[derive(Debug, Default)]
pub struct StaticUsageSource(RwLock<UsageSnapshot>);

impl StaticUsageSource {
    pub fn new(snapshot: UsageSnapshot) -> Self {
        Self(RwLock::new(snapshot))
    }

    pub fn replace(&self, snapshot: UsageSnapshot) {
        *self.0.write() = snapshot;
    }

    pub fn update(&self, f: impl FnOnce(&mut UsageSnapshot)) {
        f(&mut self.0.write());
    }
}

#[async_trait]
impl UsageSource for StaticUsageSource {
    async fn has_usage_access(&self) -> bool {
        self.0.read().usage_access
    }

    async fn installed_applications(&self) -> Result<Vec<InstalledApp>, Error> {
        Ok(self.0.read().apps.clone())
    }

    async fn package_info(&self, package_name: &str) -> Result<Option<InstalledApp>, Error> {
        Ok(self
            .0
            .read()
            .apps
            .iter()
            .find(|app| app.package_name == package_name)
            .cloned())
    }

    async fn foreground_events(
        &self,
        since: Timestamp,
        until: Timestamp,
    ) -> Result<Vec<ForegroundEvent>, Error> {
        let snapshot = self.0.read();
        let mut events: Vec<_> = snapshot
            .events
            .iter()
            .filter(|event| (since..=until).contains(&event.timestamp))
            .cloned()
            .collect();
        events.sort_by_key(|event| event.timestamp);
        Ok(events)
    }
}
