#![forbid(unsafe_code)]

use crate::error::Error;
use crate::firewall::state::{FirewallState, PackageSet, decode_unblock, encode_unblock};
use crate::persistence::{Edit, KeyValueStore, PrefValue, Preferences};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{instrument, warn};

const ENABLED: &str = "firewall_enabled";
const IS_BLOCKING: &str = "firewall_is_blocking";
const REACTIVATE_AT: &str = "firewall_reactivate_at";
const BLOCKED_PACKAGES: &str = "firewall_blocked_packages";
const WHITELISTED_PACKAGES: &str = "firewall_whitelisted_packages";
const TEMPORARY_UNBLOCKS: &str = "firewall_temporary_unblocks";

/// Durable firewall state with an observable copy of the last committed value.
pub struct FirewallPreferences {
    store: Arc<dyn KeyValueStore>,
    tx: watch::Sender<FirewallState>,
}

impl FirewallPreferences {
    pub async fn open(store: Arc<dyn KeyValueStore>) -> Self {
        let (tx, _) = watch::channel(FirewallState::default());
        let prefs = Self { store, tx };
        if let Err(err) = prefs.refresh().await {
            warn!(%err, "firewall state unreadable, starting disabled");
        }
        prefs
    }

    /// The last committed state.
    pub fn current(&self) -> FirewallState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FirewallState> {
        self.tx.subscribe()
    }

    /// Read the durable state and publish it if it differs from [`Self::current`].
    pub async fn refresh(&self) -> Result<FirewallState, Error> {
        let state = decode(&self.store.load().await?);
        self.publish(state.clone());
        Ok(state)
    }

    /// Persist every field of `state` in a single atomic edit.
    #[instrument(skip_all, fields(enabled = state.is_enabled, blocking = state.is_blocking))]
    pub async fn write(&self, state: &FirewallState) -> Result<(), Error> {
        self.store.edit(encode(state)).await?;
        self.publish(state.clone());
        Ok(())
    }

    fn publish(&self, state: FirewallState) {
        self.tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }
}

fn decode(prefs: &Preferences) -> FirewallState {
    let flag = |key: &str| prefs.get(key).and_then(PrefValue::as_bool).unwrap_or(false);
    let set = |key: &str| {
        prefs
            .get(key)
            .and_then(PrefValue::as_set)
            .cloned()
            .unwrap_or_default()
    };

    let temporary_unblocks = set(TEMPORARY_UNBLOCKS)
        .iter()
        .filter_map(|entry| {
            let decoded = decode_unblock(entry);
            if decoded.is_none() {
                warn!(%entry, "ignoring malformed temporary unblock");
            }
            decoded
        })
        .collect();

    FirewallState {
        is_enabled: flag(ENABLED),
        is_blocking: flag(IS_BLOCKING),
        reactivate_at: prefs
            .get(REACTIVATE_AT)
            .and_then(PrefValue::as_long)
            .and_then(|at| u64::try_from(at).ok()),
        blocked_packages: set(BLOCKED_PACKAGES),
        whitelisted_packages: set(WHITELISTED_PACKAGES),
        temporary_unblocks,
    }
    .normalized()
}

fn encode(state: &FirewallState) -> Vec<Edit> {
    let unblocks: PackageSet = state
        .temporary_unblocks
        .iter()
        .map(|(package, expiry)| encode_unblock(package, *expiry))
        .collect();

    vec![
        Edit::put(ENABLED, PrefValue::Bool(state.is_enabled)),
        Edit::put(IS_BLOCKING, PrefValue::Bool(state.is_blocking)),
        match state.reactivate_at.and_then(|at| i64::try_from(at).ok()) {
            Some(at) => Edit::put(REACTIVATE_AT, PrefValue::Long(at)),
            None => Edit::remove(REACTIVATE_AT),
        },
        Edit::put(
            BLOCKED_PACKAGES,
            PrefValue::StringSet(state.blocked_packages.clone()),
        ),
        Edit::put(
            WHITELISTED_PACKAGES,
            PrefValue::StringSet(state.whitelisted_packages.clone()),
        ),
        Edit::put(TEMPORARY_UNBLOCKS, PrefValue::StringSet(unblocks)),
    ]
}
