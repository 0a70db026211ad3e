#![forbid(unsafe_code)]

//! Derives the block set from classification and pushes it to the firewall.

use crate::clock::Clock;
use crate::error::Error;
use crate::firewall::{FirewallController, PackageSet};
use crate::persistence::AppSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use usage::{AppStatus, Timestamp, TrackedApp, millis};

/// Inputs that decide which packages are blocked.
#[derive(Debug, Clone, Copy)]
pub struct BlockRule<'a> {
    pub self_package: &'a str,
    /// Rare apps idle at least this long are blocked.
    pub eligibility: Duration,
    /// Keep everything already blocked until the user unblocks it.
    pub retain_blocked: bool,
}

/// Rare apps past the eligibility age plus disabled apps, plus the current
/// block set when retaining, minus the whitelist and ourselves.
pub fn desired_block_set(
    apps: &[TrackedApp],
    current_blocked: &PackageSet,
    whitelist: &PackageSet,
    rule: BlockRule<'_>,
    now: Timestamp,
) -> PackageSet {
    let cutoff = now.saturating_sub(millis(rule.eligibility));
    let classified = apps.iter().filter_map(|app| {
        let blocked = match app.status {
            AppStatus::Rare => app.last_used_at.is_none_or(|used| used <= cutoff),
            AppStatus::Disabled => true,
            AppStatus::Recent => false,
        };
        blocked.then(|| app.package_name.clone())
    });

    let retained = current_blocked
        .iter()
        .filter(|_| rule.retain_blocked)
        .cloned();

    classified
        .chain(retained)
        .filter(|package| package.as_str() != rule.self_package && !whitelist.contains(package))
        .collect()
}

pub struct BlockListSynchronizer {
    controller: Arc<FirewallController>,
    clock: Arc<dyn Clock>,
    self_package: String,
    eligibility: Duration,
    last_pushed: Mutex<Option<PackageSet>>,
}

impl BlockListSynchronizer {
    pub fn new(
        controller: Arc<FirewallController>,
        clock: Arc<dyn Clock>,
        config: &config::Firewall,
    ) -> Self {
        Self {
            controller,
            clock,
            self_package: config.self_package.clone(),
            eligibility: config.block_eligibility,
            last_pushed: Mutex::new(None),
        }
    }

    /// Forget the last pushed set so the next sync always pushes.
    pub async fn invalidate(&self) {
        *self.last_pushed.lock().await = None;
    }

    /// Push the desired block set if it differs from the last one pushed.
    /// Returns whether a push happened.
    #[instrument(skip_all, fields(apps = apps.len()))]
    pub async fn sync(&self, apps: &[TrackedApp], settings: &AppSettings) -> Result<bool, Error> {
        let state = self.controller.state();
        let desired = desired_block_set(
            apps,
            &state.blocked_packages,
            &state.whitelisted_packages,
            BlockRule {
                self_package: &self.self_package,
                eligibility: self.eligibility,
                retain_blocked: settings.manual_firewall_unblock,
            },
            self.clock.now(),
        );

        let mut last = self.last_pushed.lock().await;
        if last.as_ref() == Some(&desired) {
            debug!(blocked = desired.len(), "block set unchanged, not pushing");
            return Ok(false);
        }
        self.controller.update_blocked_packages(desired.clone()).await?;
        debug!(blocked = desired.len(), "block set pushed");
        *last = Some(desired);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DAY: u64 = 24 * 60 * 60 * 1000;
    const NOW: Timestamp = 100 * DAY;

    fn set(items: &[&str]) -> PackageSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn rule(retain_blocked: bool) -> BlockRule<'static> {
        BlockRule {
            self_package: "me",
            eligibility: Duration::from_millis(4 * DAY),
            retain_blocked,
        }
    }

    fn apps() -> Vec<TrackedApp> {
        vec![
            TrackedApp::new("rare.old", AppStatus::Rare).with_last_used(NOW - 5 * DAY),
            TrackedApp::new("rare.young", AppStatus::Rare).with_last_used(NOW - 3 * DAY),
            TrackedApp::new("rare.unknown", AppStatus::Rare),
            TrackedApp::new("off", AppStatus::Disabled),
            TrackedApp::new("recent", AppStatus::Recent).with_last_used(NOW),
            TrackedApp::new("me", AppStatus::Disabled),
        ]
    }

    #[test]
    fn rare_past_eligibility_and_disabled() {
        let desired = desired_block_set(&apps(), &set(&["stale"]), &set(&[]), rule(false), NOW);
        assert_eq!(desired, set(&["off", "rare.old", "rare.unknown"]));
    }

    #[test]
    fn retained_and_whitelisted() {
        let desired = desired_block_set(
            &apps(),
            &set(&["stale", "recent"]),
            &set(&["rare.old", "stale"]),
            rule(true),
            NOW,
        );
        assert_eq!(desired, set(&["off", "rare.unknown", "recent"]));
    }
}
