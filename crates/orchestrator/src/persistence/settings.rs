#![forbid(unsafe_code)]

//! User-adjustable settings that feed the classifier and the synchronizer.

use crate::error::Error;
use crate::persistence::{Edit, KeyValueStore, PrefValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

const ALLOW_DURATION: &str = "allow_duration";
const MANUAL_FIREWALL_UNBLOCK: &str = "manual_firewall_unblock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppSettings {
    /// How long an app may sit idle before it counts as rarely used.
    pub allow_duration: Duration,
    /// Keep packages blocked until the user unblocks them, even after use.
    pub manual_firewall_unblock: bool,
}

pub struct SettingsPreferences {
    store: Arc<dyn KeyValueStore>,
    default_allow: Duration,
    tx: watch::Sender<AppSettings>,
}

impl SettingsPreferences {
    pub async fn open(store: Arc<dyn KeyValueStore>, default_allow: Duration) -> Self {
        let (tx, _) = watch::channel(AppSettings {
            allow_duration: default_allow,
            manual_firewall_unblock: false,
        });
        let settings = Self {
            store,
            default_allow,
            tx,
        };
        settings.refresh().await;
        settings
    }

    pub fn current(&self) -> AppSettings {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AppSettings> {
        self.tx.subscribe()
    }

    /// Re-read the backing store and publish the result if it differs.
    pub async fn refresh(&self) -> AppSettings {
        let prefs = match self.store.load().await {
            Ok(prefs) => prefs,
            Err(err) => {
                warn!(%err, "settings unreadable, using defaults");
                Default::default()
            }
        };
        let allow_duration = prefs
            .get(ALLOW_DURATION)
            .and_then(PrefValue::as_long)
            .and_then(|ms| u64::try_from(ms).ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.default_allow);
        let manual_firewall_unblock = prefs
            .get(MANUAL_FIREWALL_UNBLOCK)
            .and_then(PrefValue::as_bool)
            .unwrap_or(false);
        let settings = AppSettings {
            allow_duration,
            manual_firewall_unblock,
        };
        self.tx.send_if_modified(|current| {
            let changed = *current != settings;
            *current = settings;
            changed
        });
        settings
    }

    pub async fn set_allow_duration(&self, duration: Duration) -> Result<(), Error> {
        let ms = i64::try_from(duration.as_millis()).map_err(|_| Error::InvalidDuration)?;
        if ms <= 0 {
            return Err(Error::InvalidDuration);
        }
        self.store
            .edit(vec![Edit::put(ALLOW_DURATION, PrefValue::Long(ms))])
            .await?;
        info!(?duration, "allow duration changed");
        self.publish(|s| s.allow_duration = duration);
        Ok(())
    }

    pub async fn set_manual_firewall_unblock(&self, enabled: bool) -> Result<(), Error> {
        self.store
            .edit(vec![Edit::put(MANUAL_FIREWALL_UNBLOCK, PrefValue::Bool(enabled))])
            .await?;
        info!(enabled, "manual firewall unblock changed");
        self.publish(|s| s.manual_firewall_unblock = enabled);
        Ok(())
    }

    fn publish(&self, f: impl FnOnce(&mut AppSettings)) {
        self.tx.send_if_modified(|current| {
            let before = *current;
            f(current);
            before != *current
        });
    }
}
