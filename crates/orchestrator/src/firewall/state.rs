#![forbid(unsafe_code)]

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use usage::Timestamp;

pub type PackageSet = BTreeSet<String>;

/// Persisted firewall state. Every transition replaces it as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FirewallState {
    pub is_enabled: bool,
    pub is_blocking: bool,
    /// When the allow window ends. Only meaningful while allowing.
    pub reactivate_at: Option<Timestamp>,
    pub blocked_packages: PackageSet,
    /// Never blocked, whatever the classification says.
    pub whitelisted_packages: PackageSet,
    /// Package to expiry.
    pub temporary_unblocks: BTreeMap<String, Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallPhase {
    Disabled,
    Allowing { reactivate_at: Option<Timestamp> },
    Blocking,
}

impl FirewallState {
    pub fn phase(&self) -> FirewallPhase {
        match (self.is_enabled, self.is_blocking) {
            (false, _) => FirewallPhase::Disabled,
            (true, true) => FirewallPhase::Blocking,
            (true, false) => FirewallPhase::Allowing {
                reactivate_at: self.reactivate_at,
            },
        }
    }

    /// Restore the structural invariants: whitelisted packages are never
    /// blocked, and a blocking firewall has no reactivation time.
    pub fn normalized(mut self) -> Self {
        let whitelist = &self.whitelisted_packages;
        self.blocked_packages.retain(|p| !whitelist.contains(p));
        if self.is_blocking || !self.is_enabled {
            self.reactivate_at = None;
        }
        if !self.is_enabled {
            self.is_blocking = false;
        }
        self
    }

    /// Unblocks that have not expired at `now`.
    pub fn active_unblocks(&self, now: Timestamp) -> impl Iterator<Item = (&str, Timestamp)> {
        self.temporary_unblocks
            .iter()
            .filter(move |(_, expiry)| **expiry > now)
            .map(|(package, expiry)| (package.as_str(), *expiry))
    }

    pub fn is_temporarily_unblocked(&self, package: &str, now: Timestamp) -> bool {
        self.temporary_unblocks
            .get(package)
            .is_some_and(|expiry| *expiry > now)
    }
}

/// Stored form of a temporary unblock: `"<package>:<expiry millis>"`.
pub fn encode_unblock(package: &str, expiry: Timestamp) -> String {
    format!("{package}:{expiry}")
}

pub fn decode_unblock(entry: &str) -> Option<(String, Timestamp)> {
    let (package, expiry) = entry.rsplit_once(':')?;
    if package.is_empty() {
        return None;
    }
    Some((package.to_owned(), expiry.parse().ok()?))
}
